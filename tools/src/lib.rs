//! Shared helpers for the libtranslit command-line tools.

use std::io::BufRead;
use std::path::Path;

use anyhow::{bail, Context, Result};
use libtranslit_core::{BincodeModelSource, JsonModelSource, ModelBuilder, ModelSource};

/// Install a stderr subscriber honoring `RUST_LOG` (default `warn`).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
}

/// Serialized model formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Json,
    Bincode,
}

impl ModelFormat {
    /// `.json` is JSON, anything else bincode.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ModelFormat::Json,
            _ => ModelFormat::Bincode,
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "json" => Ok(ModelFormat::Json),
            "bincode" | "bin" => Ok(ModelFormat::Bincode),
            other => bail!("unsupported model format: {}. Use 'json' or 'bincode'", other),
        }
    }
}

/// Model source for a file, picked by extension.
pub fn model_source(path: &Path) -> Box<dyn ModelSource> {
    match ModelFormat::from_path(path) {
        ModelFormat::Json => Box::new(JsonModelSource::from_path(path)),
        ModelFormat::Bincode => Box::new(BincodeModelSource::from_path(path)),
    }
}

/// Feed `source<TAB>target<TAB>log_prob` rows into `builder`.
///
/// Blank lines and lines starting with `#` are skipped. Returns the number of
/// rows read.
pub fn read_lexicon<R: BufRead>(reader: R, builder: &mut ModelBuilder) -> Result<usize> {
    let mut rows = 0;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read line {}", lineno + 1))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(source), Some(target), Some(prob)) = (fields.next(), fields.next(), fields.next())
        else {
            bail!("line {}: expected source, target and log_prob", lineno + 1);
        };
        let prob: f64 = prob
            .trim()
            .parse()
            .with_context(|| format!("line {}: bad log_prob {:?}", lineno + 1, prob))?;
        builder.add(source.trim(), target.trim(), prob);
        rows += 1;
    }
    Ok(rows)
}

/// Non-empty, non-comment lines of a file, trimmed.
pub fn read_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}
