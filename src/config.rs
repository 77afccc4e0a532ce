//! Debugger configuration.
//!
//! Loaded from an optional TOML file and then patched with command-line
//! overrides. Every field has a default so an empty file (or no file at all)
//! yields a working configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebuggerConfig {
    /// Directory prefix of synthetic cell paths (must end with a separator).
    pub tmp_file_prefix: String,
    /// Extension appended to synthetic cell paths.
    pub tmp_file_suffix: String,
    /// Seed mixed into the content hash of synthetic cell paths.
    pub hash_seed: u64,
    /// Persist each dumped cell to its synthetic path.
    pub write_cell_files: bool,
    /// Hide stack frames that do not belong to a dumped cell.
    pub cell_frames_only: bool,
    /// Exception filters advertised through `debugInfo`.
    pub exception_paths: Vec<String>,
    /// Compiled-unit naming used by the interpreter for sequential inputs.
    pub unit_name_prefix: String,
    pub first_unit_index: u64,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// `lldb-dap` executable.
    pub program: String,
    pub host: String,
    pub connect_timeout_ms: u64,
    /// Commands run by the engine right after attaching.
    pub init_commands: Vec<String>,
    /// Process to attach to. `None` means the parent process for the
    /// binary and the current process when embedded.
    pub pid: Option<u32>,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        let tmp_dir = std::env::temp_dir();
        let prefix = tmp_dir.join(format!("xcpp_debug_{}", std::process::id()));

        Self {
            tmp_file_prefix: format!("{}{}", prefix.display(), std::path::MAIN_SEPARATOR),
            tmp_file_suffix: ".cpp".to_string(),
            hash_seed: 0,
            write_cell_files: true,
            cell_frames_only: true,
            exception_paths: vec!["C++ Exceptions".to_string()],
            unit_name_prefix: "input_line_".to_string(),
            first_unit_index: 1,
            engine: EngineConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "lldb-dap".to_string(),
            host: "127.0.0.1".to_string(),
            connect_timeout_ms: 5000,
            init_commands: vec![
                "settings set plugin.jit-loader.gdb.enable on".to_string(),
                "process interrupt".to_string(),
            ],
            pid: None,
        }
    }
}

impl DebuggerConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
        debug!("Loading debugger configuration from {}", expanded);

        let text = std::fs::read_to_string(&expanded)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", expanded, e)))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: DebuggerConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.message().to_string()))?;
        config.normalize()?;
        Ok(config)
    }

    /// Expands `~` in paths and checks cross-field constraints.
    pub fn normalize(&mut self) -> Result<()> {
        self.tmp_file_prefix = shellexpand::tilde(&self.tmp_file_prefix).into_owned();
        self.engine.program = shellexpand::tilde(&self.engine.program).into_owned();

        if self.tmp_file_prefix.is_empty() {
            return Err(Error::Config("tmp_file_prefix must not be empty".to_string()));
        }
        if self.unit_name_prefix.is_empty() {
            return Err(Error::Config("unit_name_prefix must not be empty".to_string()));
        }
        if self.engine.connect_timeout_ms == 0 {
            return Err(Error::Config(
                "engine.connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Process lldb-dap attaches to.
    ///
    /// Without an explicit pid this is the current process, which is only
    /// right when the debugger is embedded in the kernel through
    /// [`crate::serve`]. The standalone binary pins the pid first with
    /// [`DebuggerConfig::attach_to_parent_by_default`].
    pub fn attach_pid(&self) -> u32 {
        self.engine.pid.unwrap_or_else(std::process::id)
    }

    /// Attach to the process that spawned us unless a pid was configured.
    ///
    /// A standalone bridge is started by the kernel it debugs, so the parent
    /// is the kernel.
    #[cfg(unix)]
    pub fn attach_to_parent_by_default(&mut self) -> Result<()> {
        if self.engine.pid.is_none() {
            let parent = std::os::unix::process::parent_id();
            debug!("No kernel pid configured, attaching to parent process {}", parent);
            self.engine.pid = Some(parent);
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn attach_to_parent_by_default(&mut self) -> Result<()> {
        if self.engine.pid.is_none() {
            return Err(Error::Config(
                "engine.pid (or --pid) is required on this platform".to_string(),
            ));
        }
        Ok(())
    }
}
