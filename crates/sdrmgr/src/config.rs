// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon configuration.
//!
//! ```toml
//! [daemon]
//! timeout_max_ms = 500
//!
//! [manager]
//! resources = "/etc/sdrmgr/resources.toml"
//! exec = "/usr/bin/sdr-stream"
//!
//! [[control]]
//! class = "unix"
//! name = "local"
//! path = "/run/sdrmgr.sock"
//! ```
//!
//! Instance tables (`[[control]]`, `[[worker]]`) name a class; every other
//! key is handed to the instance one pair at a time through `configure`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::vita49::header::MAX_WORDS;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Event loop tuning.
    #[serde(default)]
    pub daemon: LoopConfig,

    /// Resource manager settings.
    #[serde(default)]
    pub manager: ManagerConfig,

    /// Transport links.
    #[serde(default)]
    pub control: Vec<InstanceConfig>,

    /// Statically configured workers.
    #[serde(default)]
    pub worker: Vec<InstanceConfig>,
}

/// Event loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Lower bound of the poll timeout (ms).
    #[serde(default = "default_timeout_min")]
    pub timeout_min_ms: u64,

    /// Upper bound of the poll timeout (ms).
    #[serde(default = "default_timeout_max")]
    pub timeout_max_ms: u64,

    /// Timers serviced per iteration.
    #[serde(default = "default_timer_limit")]
    pub timer_limit: usize,

    /// Iteration time after which the stall watchdog reports (ms, 0 disables).
    #[serde(default = "default_stall_margin")]
    pub stall_margin_ms: u64,

    /// Statistics log interval (seconds, 0 disables).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Largest accepted packet (bytes).
    #[serde(default = "default_max_packet")]
    pub max_packet: usize,
}

fn default_timeout_min() -> u64 {
    1
}

fn default_timeout_max() -> u64 {
    500
}

fn default_timer_limit() -> usize {
    16
}

fn default_stall_margin() -> u64 {
    2000
}

fn default_stats_interval() -> u64 {
    60
}

fn default_max_packet() -> usize {
    MAX_WORDS * 4
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            timeout_min_ms: default_timeout_min(),
            timeout_max_ms: default_timeout_max(),
            timer_limit: default_timer_limit(),
            stall_margin_ms: default_stall_margin(),
            stats_interval_secs: default_stats_interval(),
            max_packet: default_max_packet(),
        }
    }
}

impl LoopConfig {
    pub fn timeout_min(&self) -> Duration {
        Duration::from_millis(self.timeout_min_ms)
    }

    pub fn timeout_max(&self) -> Duration {
        Duration::from_millis(self.timeout_max_ms)
    }

    pub fn stall_margin(&self) -> Option<Duration> {
        (self.stall_margin_ms > 0).then(|| Duration::from_millis(self.stall_margin_ms))
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

/// Resource manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Resource descriptor file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<PathBuf>,

    /// Worker class allocated on ACCESS.
    #[serde(default = "default_worker_class")]
    pub worker_class: String,

    /// Stream executable command line; `--sid` and `--rid` are appended.
    #[serde(default)]
    pub exec: String,

    /// Restart a stream worker after it fails.
    #[serde(default = "default_true")]
    pub restart_on_error: bool,

    /// Restart a stream worker after it exits cleanly.
    #[serde(default)]
    pub restart_on_exit: bool,

    /// Starts allowed per restart period.
    #[serde(default = "default_restart_limit")]
    pub restart_limit: u32,

    /// Restart period (seconds).
    #[serde(default = "default_restart_period")]
    pub restart_period_secs: u64,
}

fn default_worker_class() -> String {
    "process".to_string()
}

fn default_true() -> bool {
    true
}

fn default_restart_limit() -> u32 {
    3
}

fn default_restart_period() -> u64 {
    10
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            resources: None,
            worker_class: default_worker_class(),
            exec: String::new(),
            restart_on_error: true,
            restart_on_exit: false,
            restart_limit: default_restart_limit(),
            restart_period_secs: default_restart_period(),
        }
    }
}

/// One `[[control]]` or `[[worker]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Registered class name.
    pub class: String,

    /// Instance name; defaults to class plus index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Class-specific keys.
    #[serde(flatten)]
    pub params: toml::Table,
}

impl InstanceConfig {
    pub fn new(class: &str) -> Self {
        Self {
            class: class.to_string(),
            name: None,
            params: toml::Table::new(),
        }
    }

    /// Add a key/value pair.
    pub fn with(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Key/value pairs in string form; arrays become repeated keys.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (key, value) in &self.params {
            match value {
                toml::Value::Array(items) => {
                    for item in items {
                        pairs.push((key.clone(), value_to_string(item)));
                    }
                }
                other => pairs.push((key.clone(), value_to_string(other))),
            }
        }
        pairs
    }
}

/// Render a scalar TOML value the way it would be typed on a command line.
pub fn value_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a boolean configuration value.
pub fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::bad_value(key, value)),
    }
}

/// Parse a numeric configuration value.
pub fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::bad_value(key, value))
}

impl DaemonConfig {
    /// Load and validate a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse and validate TOML text.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.daemon;
        if d.timeout_max_ms == 0 || d.timeout_min_ms > d.timeout_max_ms {
            return Err(ConfigError::Invalid(format!(
                "timeout range {}..{} ms is empty",
                d.timeout_min_ms, d.timeout_max_ms
            )));
        }
        if d.stall_margin_ms != 0 && d.stall_margin_ms <= d.timeout_max_ms {
            return Err(ConfigError::Invalid(format!(
                "stall_margin_ms ({}) must exceed timeout_max_ms ({})",
                d.stall_margin_ms, d.timeout_max_ms
            )));
        }
        if d.max_packet < 16 {
            return Err(ConfigError::Invalid("max_packet below 16 bytes".into()));
        }

        let max_id = crate::poll::MAX_ID as usize;
        if self.control.len() > max_id || self.worker.len() > max_id {
            return Err(ConfigError::Invalid(format!(
                "at most {max_id} controls and {max_id} workers"
            )));
        }

        let mut names = HashSet::new();
        for (i, control) in self.control.iter().enumerate() {
            if !crate::control::registry::CLASSES.contains(&control.class.as_str()) {
                return Err(ConfigError::UnknownClass(control.class.clone()));
            }
            if !names.insert(self.control_name(i)) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate control name '{}'",
                    self.control_name(i)
                )));
            }
        }

        names.clear();
        for (i, worker) in self.worker.iter().enumerate() {
            if !crate::worker::registry::CLASSES.contains(&worker.class.as_str()) {
                return Err(ConfigError::UnknownClass(worker.class.clone()));
            }
            if !names.insert(self.worker_name(i)) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate worker name '{}'",
                    self.worker_name(i)
                )));
            }
        }

        if !crate::worker::registry::CLASSES.contains(&self.manager.worker_class.as_str()) {
            return Err(ConfigError::UnknownClass(self.manager.worker_class.clone()));
        }
        Ok(())
    }

    /// Effective name of control `index`.
    pub fn control_name(&self, index: usize) -> String {
        let c = &self.control[index];
        c.name.clone().unwrap_or_else(|| format!("{}{}", c.class, index))
    }

    /// Effective name of worker `index`.
    pub fn worker_name(&self, index: usize) -> String {
        let w = &self.worker[index];
        w.name.clone().unwrap_or_else(|| format!("{}{}", w.class, index))
    }

    /// Configuration written by `sdrmgrd gen-config`.
    pub fn example() -> Self {
        Self {
            daemon: LoopConfig::default(),
            manager: ManagerConfig {
                resources: Some(PathBuf::from("/etc/sdrmgr/resources.toml")),
                exec: "/usr/bin/sdr-stream --format sc16".into(),
                ..ManagerConfig::default()
            },
            control: vec![
                InstanceConfig {
                    name: Some("local".into()),
                    ..InstanceConfig::new("unix")
                }
                .with("path", "/run/sdrmgr.sock")
                .with("max_clients", 8),
                InstanceConfig {
                    name: Some("srio0".into()),
                    ..InstanceConfig::new("srio")
                }
                .with("device", "/dev/rio_mport0")
                .with("mailbox", 0),
            ],
            worker: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::from_str("").expect("empty config is valid");
        assert_eq!(config.daemon.timeout_min(), Duration::from_millis(1));
        assert_eq!(config.daemon.timeout_max(), Duration::from_millis(500));
        assert_eq!(config.daemon.timer_limit, 16);
        assert_eq!(config.manager.worker_class, "process");
        assert!(config.control.is_empty());
    }

    #[test]
    fn test_instance_params() {
        let config = DaemonConfig::from_str(
            r#"
            [[control]]
            class = "unix"
            path = "/tmp/x.sock"
            max_clients = 4

            [[worker]]
            class = "process"
            name = "beacon"
            exec = "/bin/cat"
            arg = ["-u", "-"]
            auto_start = true
            "#,
        )
        .expect("valid config");

        assert_eq!(config.control_name(0), "unix0");
        let pairs = config.control[0].pairs();
        assert!(pairs.contains(&("max_clients".into(), "4".into())));
        assert!(pairs.contains(&("path".into(), "/tmp/x.sock".into())));

        assert_eq!(config.worker_name(0), "beacon");
        let pairs = config.worker[0].pairs();
        let args: Vec<&str> = pairs
            .iter()
            .filter(|(k, _)| k == "arg")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(args, vec!["-u", "-"]);
        assert!(pairs.contains(&("auto_start".into(), "true".into())));
    }

    #[test]
    fn test_validation_errors() {
        let err = DaemonConfig::from_str("[daemon]\ntimeout_min_ms = 10\ntimeout_max_ms = 5\n")
            .expect_err("empty range");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = DaemonConfig::from_str("[daemon]\nstall_margin_ms = 100\n")
            .expect_err("margin below timeout");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = DaemonConfig::from_str("[[control]]\nclass = \"can\"\n").expect_err("unknown");
        assert!(matches!(err, ConfigError::UnknownClass(c) if c == "can"));

        let err = DaemonConfig::from_str(
            "[[control]]\nclass = \"unix\"\nname = \"a\"\n[[control]]\nclass = \"unix\"\nname = \"a\"\n",
        )
        .expect_err("duplicate");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_example_round_trips() {
        let text = toml::to_string_pretty(&DaemonConfig::example()).expect("serialize");
        let parsed = DaemonConfig::from_str(&text).expect("example is valid");
        assert_eq!(parsed.control.len(), 2);
        assert_eq!(parsed.control_name(1), "srio0");
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = DaemonConfig::from_str(include_str!("../conf/sdrmgr.toml")).expect("valid");
        assert_eq!(config.control_name(0), "local");
        assert_eq!(config.daemon.max_packet, MAX_WORDS * 4);
        assert!(config.manager.exec.starts_with("/usr/bin/sdr-stream"));

        let resources =
            crate::resource::ResourceList::from_toml(include_str!("../conf/resources.toml"))
                .expect("valid resources");
        assert_eq!(resources.len(), 2);
    }

    #[test]
    fn test_value_parsers() {
        assert!(parse_bool("auto_start", "yes").expect("bool"));
        assert!(parse_bool("auto_start", "maybe").is_err());
        assert_eq!(parse_num::<u32>("mailbox", " 3").expect("num"), 3);
        assert!(parse_num::<u8>("mailbox", "300").is_err());
    }
}
