use super::compiler::{CompiledUnit, Diagnostic};
use crate::config::DebuggerConfig;
use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// One dumped cell. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Position in submission order, starting at 1.
    pub id: u64,
    pub path: String,
    pub code: String,
    /// Compiled-unit name the engine uses for this cell's code.
    pub unit: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Append-only table of dumped cells.
///
/// Each submission gets a path built from its sequence number and a content
/// hash, so submitting the same text twice still yields two sources.
pub struct SourceRegistry {
    prefix: String,
    suffix: String,
    hash_seed: u64,
    write_files: bool,
    sources: Vec<Arc<Source>>,
    by_path: HashMap<String, usize>,
    by_unit: HashMap<String, usize>,
}

impl SourceRegistry {
    pub fn new(config: &DebuggerConfig) -> Self {
        Self {
            prefix: config.tmp_file_prefix.clone(),
            suffix: config.tmp_file_suffix.clone(),
            hash_seed: config.hash_seed,
            write_files: config.write_cell_files,
            sources: Vec::new(),
            by_path: HashMap::new(),
            by_unit: HashMap::new(),
        }
    }

    pub fn content_hash(&self, code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.hash_seed.to_le_bytes());
        hasher.update(code.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Path the next registered cell with this text will get.
    pub fn next_path(&self, code: &str) -> String {
        format!(
            "{}{}_{}{}",
            self.prefix,
            self.sources.len() + 1,
            self.content_hash(code),
            self.suffix
        )
    }

    /// Registers a compiled cell under `path` (as returned by [`next_path`]).
    ///
    /// When file persistence is enabled the text is written out first; a
    /// failed write leaves the registry unchanged.
    ///
    /// [`next_path`]: SourceRegistry::next_path
    pub async fn insert(&mut self, path: String, code: String, compiled: CompiledUnit) -> Result<Arc<Source>> {
        if self.write_files {
            write_cell_file(&path, &code).await?;
        }

        let source = Arc::new(Source {
            id: self.sources.len() as u64 + 1,
            path,
            code,
            unit: compiled.unit_name,
            diagnostics: compiled.diagnostics,
        });

        let index = self.sources.len();
        self.by_path.insert(source.path.clone(), index);
        self.by_unit.insert(source.unit.clone(), index);
        self.sources.push(source.clone());

        info!("📄 Registered cell {} as {} ({})", source.id, source.path, source.unit);
        Ok(source)
    }

    pub fn get(&self, path: &str) -> Option<Arc<Source>> {
        self.by_path.get(path).map(|&i| self.sources[i].clone())
    }

    pub fn get_by_unit(&self, unit: &str) -> Option<Arc<Source>> {
        self.by_unit.get(unit).map(|&i| self.sources[i].clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Source>> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

async fn write_cell_file(path: &str, code: &str) -> Result<()> {
    if let Some(dir) = Path::new(path).parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, code).await?;
    debug!("Wrote cell file {}", path);
    Ok(())
}
