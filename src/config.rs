//! Configuration file support.
//!
//! Settings are taken from the following sources, highest priority first:
//! 1. Command-line arguments
//! 2. The configuration file given with `--config`
//! 3. Built-in defaults
//!
//! The file is TOML. Every key is optional; an unknown key or a value of the
//! wrong type makes the whole file invalid, which is fatal at startup.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use log::debug;
use serde::Deserialize;

use crate::{
    error::{Error, Result},
    settings::{KeepAliveLog, SettingsBuilder},
};

/// Keep-alive section of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeepAliveConfig {
    /// Seconds of idle time before a keep-alive after a successful write.
    pub on_success: Option<u64>,
    /// Seconds of idle time before a keep-alive after a failed write.
    pub on_failure: Option<u64>,
    /// Keep-alive logging policy.
    pub log: Option<KeepAliveLog>,
}

/// Contents of a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Device file of the serial line.
    pub device: Option<PathBuf>,
    /// FIFO path.
    pub fifo: Option<PathBuf>,
    /// Log file path.
    pub log_file: Option<PathBuf>,
    /// Debug logging.
    pub debug: Option<bool>,
    /// Daemon mode.
    pub daemon: Option<bool>,
    /// Serial line speed.
    pub baud_rate: Option<u32>,
    /// FIFO read size.
    pub buffer_size: Option<usize>,
    /// Keep-alive settings.
    #[serde(default)]
    pub keep_alive: KeepAliveConfig,
}

impl FileConfig {
    /// Load the configuration from the given file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_owned(),
            source,
        })?;
        let config = Self::parse(&content).map_err(|source| Error::ConfigParse {
            path: path.to_owned(),
            source,
        })?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration text.
    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Carry the values present in the file over to `builder`, leaving the
    /// others untouched.
    pub fn apply(self, mut builder: SettingsBuilder) -> SettingsBuilder {
        if let Some(device) = self.device {
            builder = builder.device(device);
        }
        if let Some(fifo) = self.fifo {
            builder = builder.fifo(fifo);
        }
        if let Some(log_file) = self.log_file {
            builder = builder.log_file(log_file);
        }
        if let Some(debug) = self.debug {
            builder = builder.debug(debug);
        }
        if let Some(daemon) = self.daemon {
            builder = builder.daemon(daemon);
        }
        if let Some(baud_rate) = self.baud_rate {
            builder = builder.baud_rate(baud_rate);
        }
        if let Some(buffer_size) = self.buffer_size {
            builder = builder.buffer_size(buffer_size);
        }
        if let Some(secs) = self.keep_alive.on_success {
            builder = builder.keep_alive_on_success(Duration::from_secs(secs));
        }
        if let Some(secs) = self.keep_alive.on_failure {
            builder = builder.keep_alive_on_failure(Duration::from_secs(secs));
        }
        if let Some(policy) = self.keep_alive.log {
            builder = builder.keep_alive_log(policy);
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_file() {
        let config = FileConfig::parse(
            r#"
device = "/dev/ttyUSB0"
fifo = "/run/arduino"
log_file = "/var/log/mapper-devusb.log"
debug = true
daemon = true
baud_rate = 9600
buffer_size = 512

[keep_alive]
on_success = 120
on_failure = 2
log = "error"
"#,
        )
        .unwrap();
        assert_eq!(config.device, Some(PathBuf::from("/dev/ttyUSB0")));
        assert_eq!(config.fifo, Some(PathBuf::from("/run/arduino")));
        assert_eq!(
            config.log_file,
            Some(PathBuf::from("/var/log/mapper-devusb.log"))
        );
        assert_eq!(config.debug, Some(true));
        assert_eq!(config.daemon, Some(true));
        assert_eq!(config.baud_rate, Some(9600));
        assert_eq!(config.buffer_size, Some(512));
        assert_eq!(config.keep_alive.on_success, Some(120));
        assert_eq!(config.keep_alive.on_failure, Some(2));
        assert_eq!(config.keep_alive.log, Some(KeepAliveLog::OnError));
    }

    #[test]
    fn test_empty_file() {
        let config = FileConfig::parse("").unwrap();
        assert_eq!(config, FileConfig::default());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(FileConfig::parse("devices = \"/dev/ttyUSB0\"").is_err());
        assert!(FileConfig::parse("[keep_alive]\nevery = 3").is_err());
    }

    #[test]
    fn test_bad_policy_is_rejected() {
        assert!(FileConfig::parse("[keep_alive]\nlog = \"sometimes\"").is_err());
        for policy in ["never", "error", "always"] {
            let text = format!("[keep_alive]\nlog = \"{}\"", policy);
            assert!(FileConfig::parse(&text).is_ok(), "{}", policy);
        }
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        assert!(FileConfig::parse("baud_rate = \"fast\"").is_err());
    }

    #[test]
    fn test_apply_keeps_unset_values() {
        let config = FileConfig::parse(
            r#"
device = "/dev/ttyACM1"
[keep_alive]
on_failure = 1
"#,
        )
        .unwrap();
        let settings = config
            .apply(SettingsBuilder::new().fifo("/tmp/mine"))
            .finalize()
            .unwrap();
        assert_eq!(settings.device, PathBuf::from("/dev/ttyACM1"));
        assert_eq!(settings.fifo, PathBuf::from("/tmp/mine"));
        assert_eq!(settings.keep_alive_on_failure, Duration::from_secs(1));
        assert_eq!(settings.keep_alive_on_success, Duration::from_secs(60));
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapper.toml");
        fs::write(&path, "device = \"/dev/ttyUSB1\"\n").unwrap();

        let config = FileConfig::load(&path).unwrap();
        assert_eq!(config.device, Some(PathBuf::from("/dev/ttyUSB1")));
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            FileConfig::load(&missing),
            Err(Error::ConfigRead { .. })
        ));

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "device = ").unwrap();
        assert!(matches!(
            FileConfig::load(&bad),
            Err(Error::ConfigParse { .. })
        ));
    }
}
