//! Read-only lookup of loaded definitions.

use crate::error::{ConfigFault, RestelError, Result};
use crate::graph;
use crate::model::{
    BaseConfig, DefinitionSet, ExecutionGroup, TestDefinition, TestSuite,
};
use indexmap::IndexMap;
use tracing::debug;

/// Source of definitions for the engine. Implementations must be
/// immutable once handed to an [`crate::Engine`].
pub trait DefinitionRegistry: Send + Sync {
    fn execution_definition(&self, name: &str) -> Option<&ExecutionGroup>;
    fn test_definition(&self, name: &str) -> Option<&TestDefinition>;
    fn test_suite(&self, name: &str) -> Option<&TestSuite>;
    fn base_config(&self) -> &BaseConfig;
}

/// In-memory registry built from a [`DefinitionSet`].
///
/// Construction validates name uniqueness, that every `depends_on`
/// entry exists and that neither graph contains a cycle, then records
/// `parent_executions` back-references.
#[derive(Debug, Clone, Default)]
pub struct DefinitionStore {
    config: BaseConfig,
    suites: IndexMap<String, TestSuite>,
    definitions: IndexMap<String, TestDefinition>,
    executions: IndexMap<String, ExecutionGroup>,
}

impl DefinitionStore {
    pub fn from_set(set: DefinitionSet) -> Result<Self> {
        let suites = index_by_name(set.suites, |s| &s.name)?;
        let definitions = index_by_name(set.definitions, |d| &d.name)?;
        let mut executions = index_by_name(set.executions, |e| &e.name)?;

        for definition in definitions.values() {
            check_dependencies(&definition.name, &definition.depends_on, |n| {
                definitions.contains_key(n)
            })?;
            graph::post_order(&definition.name, |n| {
                definitions.get(n).map(|d| d.depends_on.as_slice())
            })
            .map_err(|at| RestelError::config(ConfigFault::DependencyCycle, at))?;
        }

        for group in executions.values() {
            check_dependencies(&group.name, &group.depends_on, |n| {
                executions.contains_key(n)
            })?;
            graph::post_order(&group.name, |n| {
                executions.get(n).map(|e| e.depends_on.as_slice())
            })
            .map_err(|at| RestelError::config(ConfigFault::DependencyCycle, at))?;
        }

        let lineage: Vec<(String, String)> = executions
            .values()
            .flat_map(|group| {
                group
                    .depends_on
                    .iter()
                    .map(|dep| (dep.clone(), group.name.clone()))
            })
            .collect();
        for (ancestor, child) in lineage {
            if let Some(group) = executions.get_mut(&ancestor) {
                group.add_parent_execution(child);
            }
        }

        debug!(
            "Loaded {} suites, {} definitions, {} executions",
            suites.len(),
            definitions.len(),
            executions.len()
        );

        Ok(Self {
            config: set.config,
            suites,
            definitions,
            executions,
        })
    }

    /// Override the base URL from the loaded config.
    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.config.base_url = base_url.into();
    }

    pub fn set_timeout(&mut self, timeout: u64) {
        self.config.timeout = timeout;
    }

    pub fn executions(&self) -> impl Iterator<Item = &ExecutionGroup> {
        self.executions.values()
    }

    /// Executions needed to run `names`, ancestors first, each once.
    pub fn execution_order<'a>(
        &'a self,
        names: &'a [String],
    ) -> Result<Vec<&'a ExecutionGroup>> {
        let mut ordered: IndexMap<&str, &ExecutionGroup> = IndexMap::new();
        for name in names {
            let walk = graph::post_order(name, |n| {
                self.executions.get(n).map(|e| e.depends_on.as_slice())
            })
            .map_err(|at| RestelError::config(ConfigFault::DependencyCycle, at))?;
            for step in walk {
                let group = self.executions.get(step).ok_or_else(|| {
                    RestelError::config(ConfigFault::UnknownExecution, step)
                })?;
                ordered.entry(step).or_insert(group);
            }
        }
        Ok(ordered.into_values().collect())
    }
}

impl DefinitionRegistry for DefinitionStore {
    fn execution_definition(&self, name: &str) -> Option<&ExecutionGroup> {
        self.executions.get(name)
    }

    fn test_definition(&self, name: &str) -> Option<&TestDefinition> {
        self.definitions.get(name)
    }

    fn test_suite(&self, name: &str) -> Option<&TestSuite> {
        self.suites.get(name)
    }

    fn base_config(&self) -> &BaseConfig {
        &self.config
    }
}

fn index_by_name<T>(
    items: Vec<T>,
    name_of: impl Fn(&T) -> &String,
) -> Result<IndexMap<String, T>> {
    let mut indexed = IndexMap::with_capacity(items.len());
    for item in items {
        let name = name_of(&item).clone();
        if indexed.contains_key(&name) {
            return Err(RestelError::config(ConfigFault::DuplicateName, name));
        }
        indexed.insert(name, item);
    }
    Ok(indexed)
}

fn check_dependencies(
    owner: &str,
    depends_on: &[String],
    exists: impl Fn(&str) -> bool,
) -> Result<()> {
    match depends_on.iter().find(|dep| !exists(dep)) {
        Some(dep) => Err(RestelError::config(
            ConfigFault::UnknownDependency,
            format!("{owner} -> {dep}"),
        )),
        None => Ok(()),
    }
}
