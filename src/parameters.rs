use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::{Deserialize, Serialize};
use tracing::info;

pub const ENVIRONMENT_KEY: &str = "Environment";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Malformed parameter file {path}: {reason}")]
    MalformedParameterFile { path: String, reason: String },

    #[error("Duplicate parameter key {0}")]
    DuplicateKey(String),

    #[error("Unable to access parameter file {path}: {reason}")]
    Io { path: String, reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
struct ParameterRecord {
    parameter_key: String,
    parameter_value: String,
}

/// Ordered key/value parameters. Keys are unique; insertion order is kept so
/// that serialization is reproducible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    entries: Vec<(String, String)>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut set = Self::new();
        for (key, value) in pairs {
            let key = key.into();
            if set.get(&key).is_some() {
                return Err(Error::DuplicateKey(key));
            }
            set.entries.push((key, value.into()));
        }

        return Ok(set);
    }

    /// Replaces the value of an existing key in place, or appends it.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> String {
        let records: Vec<ParameterRecord> = self
            .entries
            .iter()
            .map(|(key, value)| ParameterRecord {
                parameter_key: key.clone(),
                parameter_value: value.clone(),
            })
            .collect();

        // Serializing plain strings cannot fail.
        let mut contents = serde_json::to_string_pretty(&records).unwrap_or_default();
        contents.push('\n');
        return contents;
    }

    pub fn from_json(contents: &str) -> Result<Self, String> {
        let records: Vec<ParameterRecord> = match serde_json::from_str(contents) {
            Ok(records) => records,
            Err(error) => return Err(error.to_string()),
        };

        return match Self::from_pairs(
            records
                .into_iter()
                .map(|record| (record.parameter_key, record.parameter_value)),
        ) {
            Ok(set) => Ok(set),
            Err(error) => Err(error.to_string()),
        };
    }
}

pub fn parameter_file_path(parameters_dir: &Path, environment: &str) -> PathBuf {
    return parameters_dir.join(format!("{}.json", environment));
}

/// Loads the parameter set for `environment` from `path`, synthesizing and
/// persisting a default set when the file does not exist yet.
///
/// `defaults` may reference `{environment}` in their values. An `Environment`
/// entry among the defaults is ignored: it always comes from `environment`.
pub fn resolve(
    environment: &str,
    path: &Path,
    defaults: &[(String, String)],
) -> Result<ParameterSet, Error> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            return match ParameterSet::from_json(&contents) {
                Ok(set) => Ok(set),
                Err(reason) => Err(Error::MalformedParameterFile {
                    path: path.display().to_string(),
                    reason,
                }),
            };
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => {
            return Err(Error::Io {
                path: path.display().to_string(),
                reason: error.to_string(),
            })
        }
    }

    let set = synthesize(environment, defaults)?;
    persist(path, &set)?;
    info!(path = %path.display(), "Synthesized default parameters for {}", environment);

    return Ok(set);
}

pub fn synthesize(environment: &str, defaults: &[(String, String)]) -> Result<ParameterSet, Error> {
    let mut pairs = vec![(ENVIRONMENT_KEY.to_string(), environment.to_string())];
    for (key, value) in defaults {
        if key == ENVIRONMENT_KEY {
            continue;
        }
        pairs.push((key.clone(), value.replace("{environment}", environment)));
    }

    return ParameterSet::from_pairs(pairs);
}

fn persist(path: &Path, set: &ParameterSet) -> Result<(), Error> {
    let io_error = |error: io::Error| Error::Io {
        path: path.display().to_string(),
        reason: error.to_string(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    fs::write(path, set.to_json()).map_err(io_error)?;

    return Ok(());
}
