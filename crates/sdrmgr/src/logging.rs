// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logging setup.
//!
//! `-d` arguments select verbosity:
//!
//! - `-d debug` sets the global level
//! - `-d 'control*=trace'` sets the level of every module whose name
//!   matches the glob (`*` and `?`), e.g. `control`, `control::unix`
//!
//! Globs are expanded against [`MODULES`] into `EnvFilter` directives.
//! Without any `-d`, `RUST_LOG` is honoured, falling back to `info`.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;

/// Crate modules addressable by `-d glob=level`.
pub const MODULES: &[&str] = &[
    "config",
    "control",
    "control::srio",
    "control::stream",
    "control::unix",
    "ctltool",
    "daemon",
    "daemon::watchdog",
    "manager",
    "mbuf",
    "mqueue",
    "poll",
    "resource",
    "timer",
    "vita49",
    "worker",
    "worker::process",
    "worker::state",
];

const CRATE: &str = "sdrmgr";

/// Where and how verbosely to log.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Log file (appended); `None` or `-` for stderr.
    pub destination: Option<PathBuf>,

    /// `level` or `glob=level` specs.
    pub debug: Vec<String>,
}

/// Expand `-d` specs into filter directives.
pub fn directives(specs: &[String]) -> Result<Vec<String>, ConfigError> {
    let mut out = Vec::new();
    for spec in specs {
        let (pattern, level) = match spec.split_once('=') {
            Some((pattern, level)) => (Some(pattern.trim()), level.trim()),
            None => (None, spec.trim()),
        };
        if LevelFilter::from_str(level).is_err() {
            return Err(ConfigError::bad_value("debug", spec));
        }

        match pattern {
            None => out.push(level.to_string()),
            Some(pattern) => {
                let pattern = pattern.strip_prefix("sdrmgr::").unwrap_or(pattern);
                let before = out.len();
                if glob_match(pattern, CRATE) {
                    out.push(format!("{CRATE}={level}"));
                }
                for module in MODULES.iter().filter(|m| glob_match(pattern, m)) {
                    out.push(format!("{CRATE}::{module}={level}"));
                }
                if out.len() == before {
                    return Err(ConfigError::bad_value("debug", spec));
                }
            }
        }
    }
    Ok(out)
}

/// Simple glob matching (supports * and ?).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_recursive(&pattern, &text, 0, 0)
}

fn glob_match_recursive(pattern: &[char], text: &[char], pi: usize, ti: usize) -> bool {
    if pi == pattern.len() {
        return ti == text.len();
    }

    match pattern[pi] {
        '*' => (ti..=text.len()).any(|i| glob_match_recursive(pattern, text, pi + 1, i)),
        '?' => ti < text.len() && glob_match_recursive(pattern, text, pi + 1, ti + 1),
        c => ti < text.len() && text[ti] == c && glob_match_recursive(pattern, text, pi + 1, ti + 1),
    }
}

fn build_filter(specs: &[String]) -> Result<EnvFilter, ConfigError> {
    if specs.is_empty() {
        return Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    }
    let mut filter = EnvFilter::new("info");
    for directive in directives(specs)? {
        let parsed: Directive = directive
            .parse()
            .map_err(|_| ConfigError::bad_value("debug", &directive))?;
        filter = filter.add_directive(parsed);
    }
    Ok(filter)
}

/// Install the global subscriber.
pub fn init(options: &LogOptions) -> Result<(), ConfigError> {
    let filter = build_filter(&options.debug)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match options.destination.as_deref() {
        Some(path) if path.as_os_str() != "-" => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        _ => builder.with_writer(std::io::stderr).try_init(),
    };
    result.map_err(|e| ConfigError::Invalid(format!("logging already initialised: {e}")))
}
