use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("data directory `{0}` does not exist")]
    MissingDataDirectory(PathBuf),
    #[error("dataset `{0}` is not available in the store")]
    UnknownDataset(String),
    #[error("file format `{0}` is not supported (supported formats: .csv)")]
    UnsupportedFormat(String),
    #[error("data frequency is not set; period alignment requires one")]
    FrequencyNotSet,
    #[error("derived field `{field}` depends on `{dependency}`, which is neither registered nor a raw column")]
    UnknownDependency { field: String, dependency: String },
    #[error("derived field `{0}` is part of a dependency cycle")]
    CyclicDependency(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("field `{0}` is neither a registered derived field nor a raw column")]
    UnknownField(String),
    #[error("left merge changed the row count: expected {expected}, got {actual}")]
    AlignmentViolation { expected: usize, actual: usize },
    #[error("column `{0}` must have the Date dtype")]
    NotADate(String),
    #[error("column `{0}` must be numeric")]
    NotNumeric(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Polars(#[from] PolarsError),
}
