pub mod align;
pub mod calendar;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod linker;
pub mod registry;
pub mod rolling;
pub mod source;
mod util;

use polars::prelude::*;

pub use align::{lag, merge_on_key, merge_on_period};
pub use calendar::{Direction, SortedCalendar, TradingCalendar};
pub use config::{detect_frequency, FieldRequest, Frequency, KeyAlignment, PanelConfig};
pub use dedupe::{count_key_duplicates, dedupe, DedupeReport};
pub use error::{ConfigError, ResolveError};
pub use linker::{translate, LinkColumns, LinkFilter, LinkTable, Translation};
pub use registry::{DerivedField, FieldRegistry, FnField};
pub use rolling::{rolling_stat, rolling_stat_at, RollingSpec, Stat, Window, WindowDirection};
pub use source::{DataSource, DataStore, DirStore, MemoryStore};

/// Field-resolution engine. Owns the ingestion collaborator, the derived
/// field registry and the panel configuration; every request is resolved
/// against explicit parameters, no state is mutated across calls.
pub struct Engine<S: DataStore> {
    store: S,
    registry: FieldRegistry,
    config: PanelConfig,
}

impl<S: DataStore> Engine<S> {
    pub fn new(store: S, config: PanelConfig) -> Self {
        Engine {
            store,
            registry: FieldRegistry::new(),
            config,
        }
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FieldRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn raw_schema(&self, source: &DataSource) -> Result<Vec<String>, ResolveError> {
        match source {
            DataSource::Named(name) => self.store.column_names(name),
            DataSource::InMemory(frame) => Ok(frame
                .get_column_names()
                .iter()
                .map(|c| c.to_string())
                .collect()),
        }
    }

    fn materialize(
        &self,
        source: &DataSource,
        columns: &[String],
    ) -> Result<DataFrame, ResolveError> {
        match source {
            DataSource::Named(name) => self.store.open_dataset(name, Some(columns)),
            DataSource::InMemory(frame) => {
                Ok(frame.select(columns.iter().map(|c| c.as_str()))?)
            }
        }
    }

    /// Resolve the requested fields against `source`.
    ///
    /// Fields are looked up in the derived-field registry first and in the
    /// dataset's raw schema second; a name found in neither fails with an
    /// unknown-field error. Duplicate (entity, date) keys in the raw data
    /// are repaired deterministically before any merge. With a caller
    /// frame, the result carries exactly the requested field columns,
    /// row-aligned to the caller; without one, the working frame is
    /// returned with its natural (entity, date) key.
    pub fn resolve(
        &self,
        source: &DataSource,
        request: &FieldRequest,
        caller: Option<&DataFrame>,
    ) -> Result<DataFrame, ResolveError> {
        let entity = self.config.entity_col.as_str();
        let date = self.config.date_col.as_str();

        // Period alignment needs a frequency before any data is opened.
        let frequency = match request.alignment {
            KeyAlignment::Period => match self.config.frequency {
                Some(f) => Some(f),
                None => return Err(ConfigError::FrequencyNotSet.into()),
            },
            KeyAlignment::Exact => self.config.frequency,
        };

        let schema = self.raw_schema(source)?;
        let mut derived: Vec<String> = Vec::new();
        let mut raw_needed: Vec<String> = Vec::new();
        for field in &request.fields {
            if self.registry.contains(field) {
                derived.push(field.clone());
            } else if schema.contains(field) {
                raw_needed.push(field.clone());
            } else {
                return Err(ResolveError::UnknownField(field.clone()));
            }
        }

        // Dependencies first; raw dependencies of derived fields are
        // fetched alongside the requested raw fields.
        let order = self.registry.resolution_order(&derived)?;
        for name in &order {
            let Some(field) = self.registry.get(name) else {
                continue;
            };
            for dep in field.dependencies() {
                if self.registry.contains(dep) {
                    continue;
                }
                if !schema.contains(dep) {
                    return Err(ConfigError::UnknownDependency {
                        field: name.clone(),
                        dependency: dep.clone(),
                    }
                    .into());
                }
                if !raw_needed.contains(dep) {
                    raw_needed.push(dep.clone());
                }
            }
        }

        log::info!(
            "resolving {} field(s): {} derived, {} raw",
            request.fields.len(),
            order.len(),
            raw_needed.len()
        );

        let mut columns: Vec<String> = vec![entity.to_string(), date.to_string()];
        for c in &raw_needed {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
        let mut working = self.materialize(source, &columns)?;

        for name in &order {
            let Some(field) = self.registry.get(name) else {
                continue;
            };
            let computed = field.compute(&working)?;
            working.with_column(
                computed
                    .take_materialized_series()
                    .with_name(name.as_str().into()),
            )?;
        }

        let fields: Vec<&str> = request.fields.iter().map(|f| f.as_str()).collect();

        // Repair duplicate raw keys before lagging or merging; the report
        // is logged by the resolver itself.
        let (working, _report) = dedupe::dedupe(&working, &[entity, date], &fields)?;

        let working = if request.lag != 0 {
            align::lag(&working, entity, date, &fields, request.lag)?
        } else {
            working
        };

        let mut selection: Vec<&str> = vec![entity, date];
        selection.extend(fields.iter().copied());
        let working = working.select(selection)?;

        let Some(caller) = caller else {
            return Ok(working);
        };

        let caller_keys = caller.select([entity, date])?;
        let merged = match request.alignment {
            KeyAlignment::Exact => merge_on_key(&caller_keys, &working, &[entity, date])?,
            KeyAlignment::Period => {
                let Some(frequency) = frequency else {
                    return Err(ConfigError::FrequencyNotSet.into());
                };
                merge_on_period(&caller_keys, &working, entity, date, frequency, &fields)?
            }
        };
        debug_assert_eq!(merged.height(), caller.height());
        Ok(merged.select(fields)?)
    }
}
