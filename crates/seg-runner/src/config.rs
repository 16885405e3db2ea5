use crate::matrix::{build_matrix, Task};
use crate::stage::Stage;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What the dispatcher does with the pending queue once a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and keep dispatching.
    #[default]
    Isolate,
    /// Stop taking new tasks; running tasks still finish.
    AbortBatch,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Isolate => "isolate",
            FailurePolicy::AbortBatch => "abort_batch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageScripts {
    pub kmeans: String,
    pub diffusion: String,
    pub baselines: String,
    pub metrics: String,
}

impl Default for StageScripts {
    fn default() -> Self {
        Self {
            kmeans: Stage::Kmeans.default_script().to_string(),
            diffusion: Stage::Diffusion.default_script().to_string(),
            baselines: Stage::Baselines.default_script().to_string(),
            metrics: Stage::Metrics.default_script().to_string(),
        }
    }
}

/// Immutable description of one sweep. Built once at startup and shared
/// read-only by every worker slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    pub methods: Vec<String>,
    pub seeds: Vec<i64>,
    pub max_processes: usize,
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    pub script_dir: PathBuf,
    /// Program and leading arguments placed before the script name. When
    /// empty the script itself is executed.
    pub interpreter: Vec<String>,
    pub scripts: StageScripts,
    pub failure_policy: FailurePolicy,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            methods: vec!["brain_tumor".to_string()],
            seeds: vec![1, 2, 3],
            max_processes: 3,
            config_dir: PathBuf::from("../../config"),
            log_dir: PathBuf::from("../../logs"),
            script_dir: PathBuf::from("src/scripts_analysis"),
            interpreter: vec!["python".to_string(), "-u".to_string()],
            scripts: StageScripts::default(),
            failure_policy: FailurePolicy::Isolate,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_processes must be at least 1")]
    NoWorkerSlots,
    #[error("method name must not be empty")]
    EmptyMethod,
    #[error("method name '{0}' must not contain a path separator")]
    MethodHasSeparator(String),
    #[error("method '{0}' is listed more than once")]
    DuplicateMethod(String),
    #[error("seed {0} is listed more than once")]
    DuplicateSeed(i64),
    #[error("script for stage '{0}' must not be empty")]
    EmptyScript(&'static str),
}

impl SweepConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read sweep config {}", path.display()))?;
        let config: SweepConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse sweep config {}", path.display()))?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_processes == 0 {
            return Err(ConfigError::NoWorkerSlots);
        }
        let mut seen_methods = BTreeSet::new();
        for method in &self.methods {
            if method.trim().is_empty() {
                return Err(ConfigError::EmptyMethod);
            }
            if method.contains('/') || method.contains('\\') {
                return Err(ConfigError::MethodHasSeparator(method.clone()));
            }
            if !seen_methods.insert(method.as_str()) {
                return Err(ConfigError::DuplicateMethod(method.clone()));
            }
        }
        let mut seen_seeds = BTreeSet::new();
        for seed in &self.seeds {
            if !seen_seeds.insert(*seed) {
                return Err(ConfigError::DuplicateSeed(*seed));
            }
        }
        for stage in Stage::ALL {
            if self.script_for(stage).trim().is_empty() {
                return Err(ConfigError::EmptyScript(stage.name()));
            }
        }
        Ok(())
    }

    pub fn tasks(&self) -> Vec<Task> {
        build_matrix(&self.methods, &self.seeds)
    }

    pub fn config_path(&self, task: &Task) -> PathBuf {
        self.config_dir.join(format!("{}.yaml", task.file_stem()))
    }

    pub fn log_path(&self, task: &Task) -> PathBuf {
        self.log_dir.join(format!("{}.log", task.file_stem()))
    }

    pub fn script_for(&self, stage: Stage) -> &str {
        match stage {
            Stage::Kmeans => &self.scripts.kmeans,
            Stage::Diffusion => &self.scripts.diffusion,
            Stage::Baselines => &self.scripts.baselines,
            Stage::Metrics => &self.scripts.metrics,
        }
    }
}
