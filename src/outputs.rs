use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Unable to write outputs cache {path}: {reason}")]
    WriteError { path: String, reason: String },

    #[error("Unable to read outputs cache {path}: {reason}")]
    ReadError { path: String, reason: String },

    #[error("Parsing error in outputs cache {path}: {reason}")]
    ParsingError { path: String, reason: String },
}

/// Output values of a stack that reached a completed state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackOutputs {
    values: BTreeMap<String, String>,
}

impl StackOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StackOutputs {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let init = StackOutputs::new();
        return iter.into_iter().fold(init, |mut acc, (key, value)| {
            acc.insert(key, value);
            return acc;
        });
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OutputRecord {
    output_key: String,
    output_value: String,
}

pub fn cache_path(work_dir: &Path, stack_name: &str) -> PathBuf {
    return work_dir.join(format!("{}-outputs.json", stack_name));
}

/// Handle on a written outputs cache. The file is removed when the handle is
/// dropped, whichever way the run ends.
#[derive(Debug)]
pub struct OutputsCache {
    path: PathBuf,
}

impl OutputsCache {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OutputsCache {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(_) => (),
            Err(error) if error.kind() == io::ErrorKind::NotFound => (),
            Err(error) => {
                warn!(path = %self.path.display(), "Unable to remove outputs cache: {}", error)
            }
        }
    }
}

pub fn write(path: &Path, outputs: &StackOutputs) -> Result<OutputsCache, Error> {
    let write_error = |reason: String| Error::WriteError {
        path: path.display().to_string(),
        reason,
    };

    let records: Vec<OutputRecord> = outputs
        .values
        .iter()
        .map(|(key, value)| OutputRecord {
            output_key: key.clone(),
            output_value: value.clone(),
        })
        .collect();
    let file_contents =
        serde_json::to_string(&records).map_err(|error| write_error(error.to_string()))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| write_error(error.to_string()))?;
    }
    fs::write(path, file_contents).map_err(|error| write_error(error.to_string()))?;

    return Ok(OutputsCache {
        path: path.to_path_buf(),
    });
}

/// Reads a cached snapshot. `None` means no upstream reconciliation produced one.
pub fn read(path: &Path) -> Result<Option<StackOutputs>, Error> {
    let contents = match fs::read_to_string(path) {
        Ok(raw_contents) => raw_contents,
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => return Ok(None),
            _ => {
                return Err(Error::ReadError {
                    path: path.display().to_string(),
                    reason: error.to_string(),
                })
            }
        },
    };

    let records: Vec<OutputRecord> = match serde_json::from_str(&contents) {
        Ok(data) => data,
        Err(error) => {
            return Err(Error::ParsingError {
                path: path.display().to_string(),
                reason: error.to_string(),
            })
        }
    };

    return Ok(Some(
        records
            .into_iter()
            .map(|record| (record.output_key, record.output_value))
            .collect(),
    ));
}
