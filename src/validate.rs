use std::path::{Path, PathBuf};
use std::{fs, io};

use tracing::{info, warn};

use crate::config::DeploymentConfig;
use crate::orchestrator::Orchestrator;
use crate::process::CommandRunner;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Unable to read template {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Template {path} failed structural validation: {reason}")]
    Structural { path: String, reason: String },

    #[error("Template {path} has {} lint error(s): {}", .errors.len(), .errors.join("; "))]
    Lint { path: String, errors: Vec<String> },

    #[error("Linter could not check {path}: {reason}")]
    LinterFailed { path: String, reason: String },

    #[error("Document {path} is not valid JSON: {reason}")]
    InvalidDocument { path: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Informational,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LintFinding {
    pub severity: Severity,
    pub rule: String,
    pub location: String,
    pub message: String,
}

impl LintFinding {
    fn describe(&self) -> String {
        return format!("{} {} {}", self.rule, self.location, self.message);
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct ValidationReport {
    pub templates: usize,
    pub warnings: Vec<LintFinding>,
    pub documents: usize,
    pub skipped_documents: Vec<PathBuf>,
}

/// Validates every template the deployment uses, then the JSON documents
/// (dashboards) it ships alongside them.
pub async fn validate(
    config: &DeploymentConfig,
    orchestrator: &dyn Orchestrator,
    runner: &dyn CommandRunner,
) -> Result<ValidationReport, Error> {
    let mut report = ValidationReport::default();

    for template in config.templates() {
        let linter = &config.project.linter;
        let warnings = validate_template(&template, orchestrator, runner, linter).await?;
        report.templates += 1;
        report.warnings.extend(warnings);
    }

    let (documents, skipped) = validate_documents(&config.dashboards())?;
    report.documents = documents;
    report.skipped_documents = skipped;

    info!(
        templates = report.templates,
        warnings = report.warnings.len(),
        documents = report.documents,
        "Validation passed"
    );
    return Ok(report);
}

/// Structural check against the service, then a lint pass. Lint errors are
/// fatal; warnings are logged and returned.
pub async fn validate_template(
    path: &Path,
    orchestrator: &dyn Orchestrator,
    runner: &dyn CommandRunner,
    linter: &str,
) -> Result<Vec<LintFinding>, Error> {
    let location = path.display().to_string();
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(error) => {
            return Err(Error::Unreadable {
                path: location,
                reason: error.to_string(),
            })
        }
    };

    if let Err(error) = orchestrator.validate_template(&body).await {
        return Err(Error::Structural {
            path: location,
            reason: error.to_string(),
        });
    }
    info!(template = %location, "Structural validation passed");

    let args = vec!["--format".to_string(), "parseable".to_string(), location.clone()];
    let output = match runner.run(linter, &args, None).await {
        Ok(output) => output,
        Err(error) => {
            return Err(Error::LinterFailed {
                path: location,
                reason: error.to_string(),
            })
        }
    };

    // Exit status is a bitmask: 2 errors, 4 warnings, 8 informational.
    let status = match output.status {
        Some(status) if status & !0b1110 == 0 => status,
        _ => {
            return Err(Error::LinterFailed {
                path: location,
                reason: output.stderr.trim().to_string(),
            })
        }
    };

    let findings = parse_lint_output(&output.stdout);
    let mut errors: Vec<String> = findings
        .iter()
        .filter(|finding| finding.severity == Severity::Error)
        .map(LintFinding::describe)
        .collect();
    if errors.is_empty() && status & 2 != 0 {
        errors.push(format!("linter reported errors: {}", output.stderr.trim()));
    }
    if !errors.is_empty() {
        return Err(Error::Lint { path: location, errors });
    }

    let warnings: Vec<LintFinding> = findings
        .into_iter()
        .filter(|finding| finding.severity == Severity::Warning)
        .collect();
    for warning in &warnings {
        warn!(template = %location, "Lint warning: {}", warning.describe());
    }

    return Ok(warnings);
}

/// Parses `--format parseable` lines: `file:line:col:line:col:RULE:message`.
pub fn parse_lint_output(stdout: &str) -> Vec<LintFinding> {
    return stdout
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(':').collect();
            let index = parts.iter().position(|part| is_rule_id(part))?;
            let rule = parts[index];
            let severity = match rule.chars().next() {
                Some('E') => Severity::Error,
                Some('W') => Severity::Warning,
                _ => Severity::Informational,
            };

            Some(LintFinding {
                severity,
                rule: rule.to_string(),
                location: parts[..index].join(":"),
                message: parts[index + 1..].join(":").trim().to_string(),
            })
        })
        .collect();
}

fn is_rule_id(part: &str) -> bool {
    let mut chars = part.chars();
    return match chars.next() {
        Some('E') | Some('W') | Some('I') => {
            let rest = chars.as_str();
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
        }
        _ => false,
    };
}

/// Every present document must parse as JSON; absent ones are skipped.
pub fn validate_documents(paths: &[PathBuf]) -> Result<(usize, Vec<PathBuf>), Error> {
    let mut validated = 0;
    let mut skipped = Vec::new();

    for path in paths {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                warn!(document = %path.display(), "Document not found, skipping");
                skipped.push(path.clone());
                continue;
            }
            Err(error) => {
                return Err(Error::InvalidDocument {
                    path: path.display().to_string(),
                    reason: error.to_string(),
                })
            }
        };

        if let Err(error) = serde_json::from_str::<serde_json::Value>(&contents) {
            return Err(Error::InvalidDocument {
                path: path.display().to_string(),
                reason: error.to_string(),
            });
        }
        validated += 1;
    }

    return Ok((validated, skipped));
}
