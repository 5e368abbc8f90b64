use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PackError, PackResult};
use crate::flags::Flags;

/// Container settings, loadable from toml.
///
/// ```toml
/// max_object_size = 1048576
/// default_flags = "NATIVE | ENTIRE_TREE"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Largest encoded envelope a pack will stage, in bytes.
    pub max_object_size: usize,
    /// Flags used when the caller does not pick any.
    pub default_flags: Flags,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            max_object_size: 16 * 1024 * 1024,
            default_flags: Flags::default(),
        }
    }
}

impl ContainerConfig {
    /// Parse and validate a toml document. Missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> PackResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| PackError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a toml file.
    pub fn load(path: impl AsRef<Path>) -> PackResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PackError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> PackResult<()> {
        if self.max_object_size == 0 {
            return Err(PackError::Config("max_object_size must be positive".into()));
        }
        Ok(())
    }
}
