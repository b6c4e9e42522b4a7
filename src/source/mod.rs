//! Session sources: where raw session files live and how their records parse.
//!
//! Ingestion families are described by a static descriptor table instead of
//! being matched by name at each use site. Only `claude_code` ships today.

mod claudecode;

pub use claudecode::ClaudeCodeFormat;

use chrono::{DateTime, Utc};
use glob::Pattern;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mint;

/// One record of a session file, normalised across formats.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub message_index: i64,
    pub line_number: usize,
    pub message_type: String,
    pub role: String,
    pub content: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub model: Option<String>,
    pub cost_usd: Option<f64>,
    pub tool_name: Option<String>,
    pub tool_input: Option<String>,
    pub tool_output: Option<String>,
    /// The record did not have a recognised shape.
    pub unknown_shape: bool,
}

/// A line that could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct LineError {
    pub line_number: usize,
    pub detail: String,
    /// Digest of the raw line, recorded as the DLQ fingerprint.
    pub line_digest: String,
}

#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub path: PathBuf,
    pub file_digest: String,
    pub records: Vec<SourceRecord>,
    pub errors: Vec<LineError>,
}

impl ParsedFile {
    pub fn session_id(&self) -> String {
        mint::mint_session_id(&self.path, &self.file_digest)
    }

    pub fn unknown_records(&self) -> usize {
        self.records.iter().filter(|r| r.unknown_shape).count()
    }
}

/// Parses one JSON record; implemented per ingestion family.
pub trait RecordFormat: Send + Sync {
    /// Fill a record from a decoded line. `message_index` and `line_number`
    /// are assigned by the caller.
    fn decode(&self, value: &Value) -> SourceRecord;
}

/// Static description of an ingestion family.
pub struct SourceDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    /// Used when neither `pipeline.source_dir` nor `sources.<name>.base_path` is set.
    pub default_base_path: &'static str,
    pub default_pattern: &'static str,
    pub format: fn() -> Box<dyn RecordFormat>,
}

pub const SOURCE_DESCRIPTORS: &[SourceDescriptor] = &[SourceDescriptor {
    name: "claude_code",
    description: "Claude Code CLI session exports (JSONL)",
    default_base_path: "~/.claude/projects",
    default_pattern: "**/*.jsonl",
    format: claude_code_format,
}];

fn claude_code_format() -> Box<dyn RecordFormat> {
    Box::new(ClaudeCodeFormat)
}

pub fn descriptor(name: &str) -> Option<&'static SourceDescriptor> {
    SOURCE_DESCRIPTORS.iter().find(|d| d.name == name)
}

/// A configured, enabled source.
pub struct Source {
    pub descriptor: &'static SourceDescriptor,
    pub base_path: PathBuf,
    pattern: Pattern,
    file_pattern: Option<Pattern>,
    format: Box<dyn RecordFormat>,
}

impl Source {
    pub fn new(descriptor: &'static SourceDescriptor, base_path: PathBuf, pattern: &str) -> Result<Self> {
        let compiled = Pattern::new(pattern)
            .map_err(|e| Error::Config(format!("bad source pattern {:?}: {}", pattern, e)))?;
        // `**/*.jsonl` should also match files directly under the base path
        let file_pattern = pattern
            .rsplit('/')
            .next()
            .filter(|last| *last != pattern)
            .and_then(|last| Pattern::new(last).ok());
        // session ids hash the file path, so it must not depend on how the root was spelled
        let base_path = std::fs::canonicalize(&base_path).unwrap_or(base_path);
        Ok(Self {
            descriptor,
            base_path,
            pattern: compiled,
            file_pattern,
            format: (descriptor.format)(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn is_available(&self) -> bool {
        self.base_path.exists()
    }

    fn matches(&self, relative: &Path) -> bool {
        if self.pattern.matches_path(relative) {
            return true;
        }
        match (&self.file_pattern, relative.file_name()) {
            (Some(p), Some(name)) if relative.components().count() == 1 => {
                p.matches(&name.to_string_lossy())
            }
            _ => false,
        }
    }

    /// Every matching file under the base path, sorted by path.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        if !self.is_available() {
            warn!(source = self.name(), path = %self.base_path.display(), "source directory does not exist");
            return Ok(vec![]);
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.base_path).follow_links(true) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.base_path)
                .unwrap_or(entry.path());
            if self.matches(relative) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        debug!(source = self.name(), files = files.len(), "discovered session files");
        Ok(files)
    }

    /// Parse a whole file. Blank lines are skipped; lines that are not JSON
    /// become [`LineError`]s. `message_index` counts parsed records only.
    pub fn parse_file(&self, path: &Path) -> Result<ParsedFile> {
        let bytes = std::fs::read(path)?;
        let file_digest = mint::content_digest(&bytes);
        let text = String::from_utf8_lossy(&bytes);
        Ok(self.parse_text(path, file_digest, &text))
    }

    pub fn parse_text(&self, path: &Path, file_digest: String, text: &str) -> ParsedFile {
        let mut records = Vec::new();
        let mut errors = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line_number = i + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => {
                    let mut record = self.format.decode(&value);
                    record.message_index = records.len() as i64;
                    record.line_number = line_number;
                    records.push(record);
                }
                Err(e) => errors.push(LineError {
                    line_number,
                    detail: format!("line {}: {}", line_number, e),
                    line_digest: mint::content_digest(trimmed.as_bytes()),
                }),
            }
        }
        ParsedFile {
            path: path.to_path_buf(),
            file_digest,
            records,
            errors,
        }
    }
}

/// Registry of enabled sources
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn new(config: &Config) -> Result<Self> {
        let mut sources = Vec::new();
        for descriptor in SOURCE_DESCRIPTORS {
            if !config.is_source_enabled(descriptor.name) {
                continue;
            }
            let base_path = config.source_path(descriptor.name).unwrap_or_else(|| {
                PathBuf::from(shellexpand::tilde(descriptor.default_base_path).to_string())
            });
            let pattern = config
                .source_pattern(descriptor.name)
                .unwrap_or(descriptor.default_pattern);
            sources.push(Source::new(descriptor, base_path, pattern)?);
        }
        Ok(Self { sources })
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.name() == name)
    }
}
