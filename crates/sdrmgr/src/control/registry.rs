// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control class registry.

use tracing::debug;

use super::srio::SrioControl;
use super::unix::UnixControl;
use super::Control;
use crate::config::InstanceConfig;
use crate::error::ConfigError;
use crate::route::ControlId;

/// Registered control class names.
pub const CLASSES: &[&str] = &["unix", "srio"];

/// Allocate an unconfigured control of `class`.
pub fn create(
    class: &str,
    id: ControlId,
    name: &str,
    max_packet: usize,
) -> Result<Box<dyn Control>, ConfigError> {
    match class {
        "unix" => Ok(Box::new(UnixControl::new(id, name, max_packet))),
        "srio" => Ok(Box::new(SrioControl::new(id, name, max_packet))),
        other => Err(ConfigError::UnknownClass(other.to_string())),
    }
}

/// Allocate a control and apply its configuration table.
pub fn build(
    config: &InstanceConfig,
    id: ControlId,
    name: &str,
    max_packet: usize,
) -> Result<Box<dyn Control>, ConfigError> {
    let mut control = create(&config.class, id, name, max_packet)?;
    for (key, value) in config.pairs() {
        debug!(control = name, %key, %value, "configure");
        control.configure(&key, &value)?;
    }
    Ok(control)
}
