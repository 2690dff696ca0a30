//! Runtime settings, loadable from TOML.
//!
//! ```toml
//! execution_mode = "recompiler"
//! code_buffer_size = 33554432
//! max_block_instructions = 64
//! ram_size = 2097152
//!
//! [recompiler]
//! check_downcount = true
//! disable_specialization = false
//! ```

use std::path::{Path, PathBuf};

use rec_backend::code_buffer::DEFAULT_CODE_BUF_SIZE;
use rec_backend::CompilerOptions;
use rec_frontend::DEFAULT_MAX_BLOCK_INSTRUCTIONS;
use serde::{Deserialize, Serialize};

use crate::memory::{DEFAULT_RAM_SIZE, RAM_MIRROR_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize settings")]
    Serialize(#[from] toml::ser::Error),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Fetch, decode and execute one instruction at a time.
    Interpreter,
    /// Decode blocks once and interpret the cached instructions.
    CachedInterpreter,
    #[default]
    Recompiler,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub execution_mode: ExecutionMode,
    pub code_buffer_size: usize,
    pub max_block_instructions: u32,
    pub ram_size: usize,
    pub recompiler: RecompilerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecompilerSettings {
    pub check_downcount: bool,
    pub disable_specialization: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::default(),
            code_buffer_size: DEFAULT_CODE_BUF_SIZE,
            max_block_instructions: DEFAULT_MAX_BLOCK_INSTRUCTIONS,
            ram_size: DEFAULT_RAM_SIZE,
            recompiler: RecompilerSettings::default(),
        }
    }
}

impl Default for RecompilerSettings {
    fn default() -> Self {
        Self {
            check_downcount: true,
            disable_specialization: false,
        }
    }
}

/// Smallest code buffer that still fits a worst-case block.
const MIN_CODE_BUFFER_SIZE: usize = 64 * 1024;

impl Settings {
    pub fn from_toml_str(s: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions {
            check_downcount: self.recompiler.check_downcount,
            disable_specialization: self.recompiler.disable_specialization,
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.ram_size.is_power_of_two() || self.ram_size > RAM_MIRROR_SIZE as usize {
            return Err(SettingsError::Invalid(format!(
                "ram_size {:#x} must be a power of two no larger than {RAM_MIRROR_SIZE:#x}",
                self.ram_size
            )));
        }
        if self.ram_size < rec_core::GUEST_PAGE_SIZE as usize {
            return Err(SettingsError::Invalid(format!(
                "ram_size {:#x} is smaller than one page",
                self.ram_size
            )));
        }
        if self.code_buffer_size < MIN_CODE_BUFFER_SIZE {
            return Err(SettingsError::Invalid(format!(
                "code_buffer_size {} is below the minimum of {MIN_CODE_BUFFER_SIZE}",
                self.code_buffer_size
            )));
        }
        if self.max_block_instructions == 0 {
            return Err(SettingsError::Invalid(
                "max_block_instructions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
