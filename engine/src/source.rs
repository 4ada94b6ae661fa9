use std::collections::HashMap;
use std::path::{Path, PathBuf};

use polars::prelude::*;

use crate::error::{ConfigError, ResolveError};

/// Input to a field-resolution request: either the name of a converted
/// dataset in the store or a frame the caller already holds in memory.
/// Resolved once at the engine boundary.
#[derive(Debug, Clone)]
pub enum DataSource {
    Named(String),
    InMemory(DataFrame),
}

impl From<&str> for DataSource {
    fn from(name: &str) -> Self {
        DataSource::Named(name.to_string())
    }
}

impl From<DataFrame> for DataSource {
    fn from(frame: DataFrame) -> Self {
        DataSource::InMemory(frame)
    }
}

/// Interface of the ingestion collaborator. The core only projects columns
/// and introspects schemas; conversion from raw vendor files and any
/// caching of opened datasets live behind this trait.
pub trait DataStore {
    /// Open a converted dataset, optionally projecting to `columns`.
    fn open_dataset(
        &self,
        name: &str,
        columns: Option<&[String]>,
    ) -> Result<DataFrame, ResolveError>;

    /// Column names of a dataset, without materializing its rows.
    fn column_names(&self, name: &str) -> Result<Vec<String>, ResolveError>;

    /// Convert a raw file into a dataset and return its id.
    fn convert(&mut self, path: &Path) -> Result<String, ResolveError>;
}

fn project(frame: &DataFrame, columns: Option<&[String]>) -> Result<DataFrame, ResolveError> {
    match columns {
        Some(cols) => Ok(frame.select(cols.iter().map(|c| c.as_str()))?),
        None => Ok(frame.clone()),
    }
}

fn dataset_id(path: &Path) -> Result<String, ResolveError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if ext != "csv" {
        return Err(ConfigError::UnsupportedFormat(ext).into());
    }
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset");
    Ok(stem.to_ascii_lowercase())
}

fn read_csv(path: &Path) -> Result<DataFrame, ResolveError> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_try_parse_dates(true))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// In-memory store, used by tests and by callers that already hold frames.
#[derive(Debug, Default)]
pub struct MemoryStore {
    frames: HashMap<String, DataFrame>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn insert(&mut self, name: &str, frame: DataFrame) {
        self.frames.insert(name.to_string(), frame);
    }

    pub fn with_frame(mut self, name: &str, frame: DataFrame) -> Self {
        self.insert(name, frame);
        self
    }

    fn frame(&self, name: &str) -> Result<&DataFrame, ResolveError> {
        self.frames
            .get(name)
            .ok_or_else(|| ConfigError::UnknownDataset(name.to_string()).into())
    }
}

impl DataStore for MemoryStore {
    fn open_dataset(
        &self,
        name: &str,
        columns: Option<&[String]>,
    ) -> Result<DataFrame, ResolveError> {
        project(self.frame(name)?, columns)
    }

    fn column_names(&self, name: &str) -> Result<Vec<String>, ResolveError> {
        Ok(self
            .frame(name)?
            .get_column_names()
            .iter()
            .map(|c| c.to_string())
            .collect())
    }

    fn convert(&mut self, path: &Path) -> Result<String, ResolveError> {
        let id = dataset_id(path)?;
        let df = read_csv(path)?;
        self.frames.insert(id.clone(), df);
        Ok(id)
    }
}

/// Store backed by a directory of converted csv datasets.
#[derive(Debug)]
pub struct DirStore {
    datadir: PathBuf,
}

impl DirStore {
    pub fn new(datadir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let datadir = datadir.into();
        if !datadir.is_dir() {
            return Err(ConfigError::MissingDataDirectory(datadir));
        }
        Ok(DirStore { datadir })
    }

    fn dataset_path(&self, name: &str) -> Result<PathBuf, ResolveError> {
        let path = self.datadir.join(format!("{}.csv", name));
        if !path.is_file() {
            return Err(ConfigError::UnknownDataset(name.to_string()).into());
        }
        Ok(path)
    }
}

impl DataStore for DirStore {
    fn open_dataset(
        &self,
        name: &str,
        columns: Option<&[String]>,
    ) -> Result<DataFrame, ResolveError> {
        let df = read_csv(&self.dataset_path(name)?)?;
        project(&df, columns)
    }

    fn column_names(&self, name: &str) -> Result<Vec<String>, ResolveError> {
        let df = read_csv(&self.dataset_path(name)?)?;
        Ok(df.get_column_names().iter().map(|c| c.to_string()).collect())
    }

    /// Csv files are already in the store's native layout, so conversion is
    /// a copy into the data directory. Sas and other vendor formats belong
    /// to the external conversion tool.
    fn convert(&mut self, path: &Path) -> Result<String, ResolveError> {
        let id = dataset_id(path)?;
        let target = self.datadir.join(format!("{}.csv", id));
        if target != path {
            std::fs::copy(path, &target).map_err(|e| {
                ResolveError::Polars(PolarsError::ComputeError(
                    format!("failed to copy `{}`: {}", path.display(), e).into(),
                ))
            })?;
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        let df = df![
            "permno" => [1i64, 2, 3],
            "prc" => [10.0, 11.0, 12.0],
            "vol" => [100i64, 200, 300],
        ]
        .unwrap();
        MemoryStore::new().with_frame("msf", df)
    }

    #[test]
    fn projects_requested_columns() {
        let s = store();
        let cols = vec!["permno".to_string(), "prc".to_string()];
        let df = s.open_dataset("msf", Some(&cols)).unwrap();
        assert_eq!(df.get_column_names().len(), 2);
        assert_eq!(df.height(), 3);
    }

    #[test]
    fn unknown_dataset_is_a_config_error() {
        let s = store();
        let err = s.open_dataset("dsf", None).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Config(ConfigError::UnknownDataset(_))
        ));
    }

    #[test]
    fn convert_rejects_unsupported_formats() {
        let mut s = store();
        let err = s.convert(Path::new("/tmp/funda.sas7bdat")).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Config(ConfigError::UnsupportedFormat(_))
        ));
    }
}
