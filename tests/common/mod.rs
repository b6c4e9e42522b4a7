//! Shared harness for the end-to-end tests: a throwaway pipeline home and a
//! source directory of session files.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

use spine::config::Environment;
use spine::executor::{Executor, StageReport};
use spine::stages::EXECUTION_ORDER;
use spine::{Config, PipelineContext, Result, RunOptions};

pub struct Harness {
    pub home: TempDir,
    pub source: PathBuf,
}

impl Harness {
    /// Fresh home, source directory inside a separate temp dir.
    pub fn new(source: &Path) -> Self {
        Self {
            home: TempDir::new().unwrap(),
            source: source.to_path_buf(),
        }
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default().with_env(Environment {
            project: Some("proj".to_string()),
            dataset: Some("ds".to_string()),
            pipeline_home: Some(self.home.path().to_path_buf()),
            ..Environment::default()
        });
        config.pipeline.source_dir = Some(self.source.to_string_lossy().to_string());
        config.pipeline.workers = 2;
        config
    }

    pub fn context(&self) -> PipelineContext {
        self.context_with(RunOptions::default())
    }

    pub fn context_with(&self, options: RunOptions) -> PipelineContext {
        PipelineContext::open(self.config(), options).unwrap()
    }
}

/// Every stage, in execution order, under `run_id`.
pub fn run_all(ctx: &PipelineContext, run_id: &str) -> Result<Vec<StageReport>> {
    run_window(ctx, run_id, &EXECUTION_ORDER)
}

pub fn run_window(ctx: &PipelineContext, run_id: &str, window: &[u8]) -> Result<Vec<StageReport>> {
    let executor = Executor::new(ctx)?;
    executor.begin_run(Some(run_id), json!({ "stages": window }))?;
    executor.run_pipeline(run_id, window)
}

/// One JSONL line per `(type, content)` pair.
pub fn session_lines(messages: &[(&str, &str)]) -> String {
    messages
        .iter()
        .map(|(kind, content)| json!({ "type": kind, "content": content }).to_string() + "\n")
        .collect()
}

pub fn write_session(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

/// Source directory holding the two-message session.
pub fn hello_world_source() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_session(
        dir.path(),
        "session.jsonl",
        &session_lines(&[("user", "hello world"), ("assistant", "hi!")]),
    );
    dir
}
