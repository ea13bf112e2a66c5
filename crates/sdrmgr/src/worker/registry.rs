// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Worker class registry.

use tracing::debug;

use super::process::ProcessWorker;
use super::Worker;
use crate::config::InstanceConfig;
use crate::error::ConfigError;
use crate::route::WorkerId;

/// Registered worker class names.
pub const CLASSES: &[&str] = &["process"];

/// Allocate an unconfigured worker of `class`.
pub fn create(
    class: &str,
    id: WorkerId,
    name: &str,
    max_packet: usize,
) -> Result<Box<dyn Worker>, ConfigError> {
    match class {
        "process" => Ok(Box::new(ProcessWorker::new(id, name, max_packet))),
        other => Err(ConfigError::UnknownClass(other.to_string())),
    }
}

/// Allocate a worker and apply its configuration table.
pub fn build(
    config: &InstanceConfig,
    id: WorkerId,
    name: &str,
    max_packet: usize,
) -> Result<Box<dyn Worker>, ConfigError> {
    let mut worker = create(&config.class, id, name, max_packet)?;
    for (key, value) in config.pairs() {
        debug!(worker = name, %key, %value, "configure");
        worker.configure(&key, &value)?;
    }
    Ok(worker)
}
