//! Configuration management with YAML support and an environment overlay

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main configuration structure (`spine.yaml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub warehouse: WarehouseConfig,

    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    /// Values read from the process environment, never from YAML.
    #[serde(skip)]
    pub env: Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Directory holding the project and dataset database files.
    /// Relative paths resolve against `PIPELINE_HOME`.
    #[serde(default = "default_warehouse_path")]
    pub path: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_load_jobs")]
    pub max_load_jobs: u64,

    #[serde(default = "default_max_query_jobs")]
    pub max_query_jobs: u64,

    /// Table stem, so stage tables are `{dataset}.{stem}_stage_{n}`.
    #[serde(default = "default_table_stem")]
    pub table_stem: String,
}

/// Individual source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub base_path: Option<String>,

    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Overrides the source base path for every stage when set.
    #[serde(default)]
    pub source_dir: Option<String>,

    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Worker threads for per-file parsing; 0 means min(CPU, 8).
    #[serde(default)]
    pub workers: usize,

    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    #[serde(default = "default_enrichment_timeout")]
    pub enrichment_timeout_secs: u64,

    #[serde(default)]
    pub emit_sentences: bool,

    #[serde(default = "default_keywords_top_n")]
    pub keywords_top_n: usize,

    #[serde(default = "default_emotion_batch")]
    pub emotion_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial")]
    pub initial_secs: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: u32,

    #[serde(default = "default_backoff_cap")]
    pub cap_secs: u64,

    #[serde(default = "default_backoff_retries")]
    pub max_retries: u32,
}

/// Process environment the pipeline depends on.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub project: Option<String>,
    pub dataset: Option<String>,
    pub llm_api_key: Option<String>,
    pub pipeline_home: Option<PathBuf>,
}

// Default value functions
fn default_warehouse_path() -> String {
    "warehouse".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_load_jobs() -> u64 {
    10_000
}

fn default_max_query_jobs() -> u64 {
    200_000
}

fn default_table_stem() -> String {
    "claude_code".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_sample_size() -> usize {
    100
}

fn default_stage_timeout() -> u64 {
    30 * 60
}

fn default_enrichment_timeout() -> u64 {
    2 * 60 * 60
}

fn default_keywords_top_n() -> usize {
    5
}

fn default_emotion_batch() -> usize {
    64
}

fn default_llm_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_llm_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_max_input_chars() -> usize {
    4000
}

fn default_request_timeout() -> u64 {
    60
}

fn default_backoff_initial() -> u64 {
    2
}

fn default_backoff_multiplier() -> u32 {
    2
}

fn default_backoff_cap() -> u64 {
    60
}

fn default_backoff_retries() -> u32 {
    5
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: default_warehouse_path(),
            batch_size: default_batch_size(),
            max_load_jobs: default_max_load_jobs(),
            max_query_jobs: default_max_query_jobs(),
            table_stem: default_table_stem(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_dir: None,
            sample_size: default_sample_size(),
            workers: 0,
            stage_timeout_secs: default_stage_timeout(),
            enrichment_timeout_secs: default_enrichment_timeout(),
            emit_sentences: false,
            keywords_top_n: default_keywords_top_n(),
            emotion_batch_size: default_emotion_batch(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            max_input_chars: default_max_input_chars(),
            request_timeout_secs: default_request_timeout(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_secs: default_backoff_initial(),
            multiplier: default_backoff_multiplier(),
            cap_secs: default_backoff_cap(),
            max_retries: default_backoff_retries(),
        }
    }
}

impl Environment {
    pub fn from_process() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            project: get("WAREHOUSE_PROJECT"),
            dataset: get("WAREHOUSE_DATASET"),
            llm_api_key: get("LLM_API_KEY"),
            pipeline_home: get("PIPELINE_HOME").map(|p| PathBuf::from(shellexpand::tilde(&p).to_string())),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./spine.yaml (current directory)
    /// 3. ~/.config/spine/spine.yaml
    ///
    /// The process environment is overlaid afterwards.
    pub fn load(path: &str) -> Result<Self> {
        let mut search_paths = vec![
            PathBuf::from(shellexpand::tilde(path).to_string()),
            PathBuf::from("spine.yaml"),
        ];
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("spine").join("spine.yaml"));
        }

        let mut config = Config::default();
        for search_path in &search_paths {
            if search_path.exists() {
                config = Self::from_file(search_path)?;
                break;
            }
        }

        config.env = Environment::from_process();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    pub fn project(&self) -> Result<&str> {
        self.env
            .project
            .as_deref()
            .ok_or_else(|| Error::Config("WAREHOUSE_PROJECT is not set".to_string()))
    }

    pub fn dataset(&self) -> Result<&str> {
        self.env
            .dataset
            .as_deref()
            .ok_or_else(|| Error::Config("WAREHOUSE_DATASET is not set".to_string()))
    }

    /// `PIPELINE_HOME`, defaulting to the current directory.
    pub fn pipeline_home(&self) -> PathBuf {
        self.env
            .pipeline_home
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn resolve(&self, raw: &str) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(raw).to_string());
        if expanded.is_absolute() {
            expanded
        } else {
            self.pipeline_home().join(expanded)
        }
    }

    pub fn warehouse_dir(&self) -> PathBuf {
        self.resolve(&self.warehouse.path)
    }

    /// Where S0 writes its assessment manifests.
    pub fn assessment_dir(&self) -> PathBuf {
        self.pipeline_home().join("staging").join("assessment")
    }

    /// Check if a source is enabled; unknown sources default to enabled.
    pub fn is_source_enabled(&self, source_name: &str) -> bool {
        self.sources.get(source_name).map_or(true, |s| s.enabled)
    }

    /// Source base path: `pipeline.source_dir` wins over the per-source value.
    pub fn source_path(&self, source_name: &str) -> Option<PathBuf> {
        if let Some(dir) = &self.pipeline.source_dir {
            return Some(self.resolve(dir));
        }
        self.sources
            .get(source_name)
            .and_then(|s| s.base_path.as_ref())
            .map(|p| self.resolve(p))
    }

    pub fn source_pattern(&self, source_name: &str) -> Option<&str> {
        self.sources
            .get(source_name)
            .and_then(|s| s.pattern.as_deref())
    }

    pub fn worker_count(&self) -> usize {
        if self.pipeline.workers > 0 {
            return self.pipeline.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(8)
    }
}
