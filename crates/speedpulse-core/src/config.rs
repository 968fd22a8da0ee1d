//! Pipeline configuration, loaded from TOML.
//!
//! ```toml
//! utility_path = "/usr/bin/speedtest"
//! server_id = 4242
//! observer_queue_capacity = 256
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::invocation::{Invocation, UtilityFlag};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Path to the Ookla `speedtest` executable.
    pub utility_path: PathBuf,

    /// Pin the measurement to one server.
    pub server_id: Option<u32>,

    /// Pass `--accept-license --accept-gdpr` so the CLI never prompts.
    pub accept_license: bool,

    /// Ask the CLI for live progress output.
    pub show_progress: bool,

    /// Decimal places the CLI prints.
    pub precision: Option<u8>,

    /// Per-observer event queue length. A full queue drops that observer.
    pub observer_queue_capacity: usize,

    /// Bytes of stderr kept for diagnostics.
    pub stderr_tail_bytes: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            utility_path: PathBuf::from("speedtest"),
            server_id: None,
            accept_license: true,
            show_progress: true,
            precision: None,
            observer_queue_capacity: 256,
            stderr_tail_bytes: 8 * 1024,
        }
    }
}

impl CoreConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file. A missing file yields defaults.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.utility_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("utility_path must not be empty".into()));
        }
        if self.observer_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "observer_queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Build the allow-listed invocation this config describes.
    pub fn invocation(&self) -> Invocation {
        let mut inv = Invocation {
            program: self.utility_path.clone(),
            flags: Vec::new(),
        };
        if self.accept_license {
            inv = inv
                .with_flag(UtilityFlag::AcceptLicense)
                .with_flag(UtilityFlag::AcceptGdpr);
        }
        if self.show_progress {
            inv = inv.with_flag(UtilityFlag::Progress);
        }
        if let Some(id) = self.server_id {
            inv = inv.with_flag(UtilityFlag::ServerId(id));
        }
        if let Some(p) = self.precision {
            inv = inv.with_flag(UtilityFlag::Precision(p));
        }
        inv
    }
}
