// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared across the crate.
//!
//! Codec errors live next to the codec ([`crate::vita49::Vita49Error`]) and
//! queue errors next to the queue ([`crate::mqueue::EnqueueError`]) because
//! both carry data specific to those modules.

use std::io;
use thiserror::Error;

/// Message buffer errors.
///
/// A failed cursor or accessor call never modifies the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MbufError {
    #[error("cannot allocate {capacity} byte buffer")]
    Alloc { capacity: usize },

    #[error("cursor out of range (beg={beg} cur={cur} end={end} max={max})")]
    Cursor {
        beg: usize,
        cur: usize,
        end: usize,
        max: usize,
    },

    #[error("read past end of payload (want {want}, have {have})")]
    Underrun { want: usize, have: usize },

    #[error("write past end of buffer (want {want}, room {room})")]
    Overrun { want: usize, room: usize },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("unknown class '{0}'")]
    UnknownClass(String),

    #[error("unknown key '{key}'")]
    UnknownKey { key: String },

    #[error("bad value '{value}' for key '{key}'")]
    BadValue { key: String, value: String },
}

impl ConfigError {
    pub(crate) fn bad_value(key: &str, value: &str) -> Self {
        Self::BadValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Control open errors.
///
/// `Missing` is a setup error the control cannot recover from; everything
/// else is retried.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("required key '{0}' not set")]
    Missing(&'static str),

    #[error("cannot open {what}: {source}")]
    Open {
        what: String,
        #[source]
        source: io::Error,
    },
}

impl ControlError {
    pub(crate) fn open(what: impl std::fmt::Display, source: io::Error) -> Self {
        Self::Open {
            what: what.to_string(),
            source,
        }
    }

    /// True when retrying cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Missing(_))
    }
}

/// Worker errors raised by class-specific setup and process handling.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker is not configured")]
    NotConfigured,

    #[error("spawn failed: {0}")]
    Spawn(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
