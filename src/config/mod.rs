use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable that overrides the configured port.
pub const PORT_ENV_VAR: &str = "POS_SCALE_PORT";

/// Supplies the port name of the scale, if the application has one.
pub trait PortSettings: Send + Sync {
    fn scale_port(&self) -> Option<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Scale settings, e.g. `{ "port": "/dev/ttyUSB0" }` or `{ "port": "COM4" }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    pub port: Option<String>,
}

impl ScaleConfig {
    pub fn with_port(port: impl Into<String>) -> Self {
        Self {
            port: Some(port.into()),
        }
    }

    /// Read a JSON config file. Missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`; an empty value clears the port.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(port) = lookup(PORT_ENV_VAR) {
            let port = port.trim();
            self.port = (!port.is_empty()).then(|| port.to_string());
        }
        self
    }
}

impl PortSettings for ScaleConfig {
    fn scale_port(&self) -> Option<String> {
        self.port
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_port_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "port": "COM4" }}"#).unwrap();

        let config = ScaleConfig::load(file.path()).unwrap();
        assert_eq!(config.scale_port().as_deref(), Some("COM4"));
    }

    #[test]
    fn missing_keys_use_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();

        let config = ScaleConfig::load(file.path()).unwrap();
        assert_eq!(config, ScaleConfig::default());
        assert_eq!(config.scale_port(), None);
    }

    #[test]
    fn reports_parse_and_io_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "port = COM4").unwrap();
        assert!(matches!(ScaleConfig::load(file.path()), Err(ConfigError::Parse { .. })));

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("scale.json");
        assert!(matches!(ScaleConfig::load(&missing), Err(ConfigError::Io { .. })));
    }

    fn lookup(value: &'static str) -> impl Fn(&str) -> Option<String> {
        move |key| (key == PORT_ENV_VAR).then(|| value.to_string())
    }

    #[test]
    fn override_replaces_or_clears_port() {
        let config = ScaleConfig::with_port("COM1").with_overrides(lookup("/dev/ttyS0"));
        assert_eq!(config.scale_port().as_deref(), Some("/dev/ttyS0"));

        let config = ScaleConfig::with_port("COM1").with_overrides(lookup("  "));
        assert_eq!(config.scale_port(), None);

        let config = ScaleConfig::with_port("COM1").with_overrides(|_| None);
        assert_eq!(config.scale_port().as_deref(), Some("COM1"));
    }

    #[test]
    fn blank_port_counts_as_unset() {
        let config = ScaleConfig::with_port("   ");
        assert_eq!(config.scale_port(), None);
    }
}
