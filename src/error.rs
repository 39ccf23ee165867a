use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ConvertError {
    #[error("invalid subject id: {0}")]
    InvalidSubjectId(String),

    #[error("invalid value for entity {key}: {value:?}")]
    InvalidEntity { key: String, value: String },

    #[error("invalid phase-encoding direction: {0}")]
    InvalidDirection(String),

    #[error("invalid subject pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing required option: {0}")]
    MissingOption(String),

    #[error("derived file not found: {0}")]
    #[diagnostic(help("run the preprocessing step that produces this file, or drop the derived-data flag"))]
    MissingDerivedFile(PathBuf),

    #[error("destination already exists: {0}")]
    #[diagnostic(help("pass --overwrite to replace it, or drop --strict to skip existing outputs"))]
    DestinationExists(PathBuf),

    #[error("cannot determine acquisition time for {path}: {reason}")]
    AcquisitionTime { path: PathBuf, reason: String },

    #[error("failed to parse JSON sidecar {path}: {message}")]
    SidecarParse { path: PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
