use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use polars::prelude::*;

use crate::error::ConfigError;

/// A derived field: a pure computation over a working frame that already
/// holds the field's dependencies, returning one column. User-declared
/// fields take precedence over raw columns of the same name.
pub trait DerivedField: Send + Sync {
    fn name(&self) -> &str;

    /// Field names this computation reads. Dependencies may themselves be
    /// derived or raw.
    fn dependencies(&self) -> &[String];

    fn compute(&self, frame: &DataFrame) -> PolarsResult<Column>;
}

type ComputeFn = dyn Fn(&DataFrame) -> PolarsResult<Column> + Send + Sync;

/// Closure-backed [`DerivedField`], for fields that do not warrant a
/// dedicated type.
pub struct FnField {
    name: String,
    dependencies: Vec<String>,
    func: Box<ComputeFn>,
}

impl DerivedField for FnField {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn compute(&self, frame: &DataFrame) -> PolarsResult<Column> {
        (self.func)(frame)
    }
}

/// Registry mapping field names to derived computations. Replaces lookup
/// of computation methods by name at call time: the full dependency graph
/// is known up front and checked for cycles before any data is touched.
#[derive(Default)]
pub struct FieldRegistry {
    fields: HashMap<String, Arc<dyn DerivedField>>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        FieldRegistry::default()
    }

    pub fn register(&mut self, field: Arc<dyn DerivedField>) {
        self.fields.insert(field.name().to_string(), field);
    }

    pub fn register_fn(
        &mut self,
        name: &str,
        dependencies: &[&str],
        func: impl Fn(&DataFrame) -> PolarsResult<Column> + Send + Sync + 'static,
    ) {
        self.register(Arc::new(FnField {
            name: name.to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            func: Box::new(func),
        }));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DerivedField>> {
        self.fields.get(name)
    }

    /// Order the requested derived fields so that every dependency is
    /// computed before its dependents. Dependencies that are not registered
    /// are raw columns and are left to the fetch step. Fails on cycles.
    pub fn resolution_order(&self, requested: &[String]) -> Result<Vec<String>, ConfigError> {
        let mut order = Vec::new();
        let mut done: HashSet<String> = HashSet::new();
        let mut in_progress: HashSet<String> = HashSet::new();
        for name in requested {
            if self.contains(name) {
                self.visit(name, &mut order, &mut done, &mut in_progress)?;
            }
        }
        Ok(order)
    }

    fn visit(
        &self,
        name: &str,
        order: &mut Vec<String>,
        done: &mut HashSet<String>,
        in_progress: &mut HashSet<String>,
    ) -> Result<(), ConfigError> {
        if done.contains(name) {
            return Ok(());
        }
        if !in_progress.insert(name.to_string()) {
            return Err(ConfigError::CyclicDependency(name.to_string()));
        }
        if let Some(field) = self.get(name) {
            let deps: Vec<String> = field.dependencies().to_vec();
            for dep in deps {
                if self.contains(&dep) {
                    self.visit(&dep, order, done, in_progress)?;
                }
            }
            order.push(name.to_string());
        }
        in_progress.remove(name);
        done.insert(name.to_string());
        Ok(())
    }

    /// Check the whole registry for dependency cycles.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let all: Vec<String> = self.fields.keys().cloned().collect();
        self.resolution_order(&all).map(|_| ())
    }
}
