//! Loading definition sets from YAML files.

use crate::model::DefinitionSet;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Finds and loads definition files from a list of search paths.
#[derive(Debug)]
pub struct DefinitionLoader {
    pub search_paths: Vec<PathBuf>,
}

impl DefinitionLoader {
    pub fn new() -> Self {
        Self {
            search_paths: vec![PathBuf::from("tests/definitions")],
        }
    }

    pub fn add_path<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Load a single YAML definition file.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<DefinitionSet> {
        let path = path.as_ref();
        info!("Loading definitions from {}", path.display());

        let content = fs::read_to_string(path).context(format!(
            "Failed to read definition file: {}",
            path.display()
        ))?;
        let set = DefinitionSet::from_yaml(&content).context(format!(
            "Failed to parse YAML from {}",
            path.display()
        ))?;

        debug!(
            "Loaded {} executions and {} definitions from {}",
            set.executions.len(),
            set.definitions.len(),
            path.display()
        );
        Ok(set)
    }

    /// Load and merge every `.yaml`/`.yml` file in `dir`, in file name
    /// order. Files that fail to load are skipped.
    pub fn load_dir<P: AsRef<Path>>(&self, dir: P) -> Result<DefinitionSet> {
        let dir = dir.as_ref();
        info!("Loading definitions from directory: {}", dir.display());

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).context(format!(
            "Failed to read directory: {}",
            dir.display()
        ))? {
            let path = entry?.path();
            if path.is_file() && is_definition_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut merged = DefinitionSet::default();
        let mut loaded = 0;
        for path in paths {
            match self.load_file(&path) {
                Ok(set) => {
                    merged.merge(set);
                    loaded += 1;
                }
                Err(err) => {
                    debug!(
                        "Failed to load definitions from {}: {:#}",
                        path.display(),
                        err
                    );
                }
            }
        }

        info!("Loaded {} definition files from {}", loaded, dir.display());
        Ok(merged)
    }

    /// Load `path` as a file or directory.
    pub fn load_path<P: AsRef<Path>>(&self, path: P) -> Result<DefinitionSet> {
        let path = path.as_ref();
        if path.is_dir() {
            self.load_dir(path)
        } else {
            self.load_file(path)
        }
    }

    /// Load and merge every existing search path.
    pub fn load_all(&self) -> Result<DefinitionSet> {
        let mut merged = DefinitionSet::default();

        for path in &self.search_paths {
            if path.exists() && path.is_dir() {
                match self.load_dir(path) {
                    Ok(set) => merged.merge(set),
                    Err(err) => {
                        debug!(
                            "Failed to load definitions from {}: {}",
                            path.display(),
                            err
                        );
                    }
                }
            }
        }

        info!(
            "Loaded {} executions in total",
            merged.executions.len()
        );
        Ok(merged)
    }
}

impl Default for DefinitionLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn is_definition_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}
