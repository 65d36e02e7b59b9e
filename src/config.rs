// SPDX-License-Identifier: MIT
//! Builder and verifier settings

use serde::{Deserialize, Serialize};

use crate::format::MAX_BUFFER_SIZE;

/// Settings for [`Builder`](crate::Builder)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Bytes allocated up front.
    pub initial_capacity: usize,
    /// Growth beyond this fails with `WriteError::BufferTooLarge`.
    pub max_buffer_size: usize,
    /// Write scalar fields even when they equal their default.
    pub force_defaults: bool,
}

impl BuilderConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            initial_capacity: env_parse("ZEROBUF_INITIAL_CAPACITY")
                .unwrap_or(defaults.initial_capacity),
            max_buffer_size: env_parse("ZEROBUF_MAX_BUFFER_SIZE")
                .unwrap_or(defaults.max_buffer_size),
            force_defaults: env_parse("ZEROBUF_FORCE_DEFAULTS").unwrap_or(defaults.force_defaults),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_buffer_size > MAX_BUFFER_SIZE {
            return Err(format!(
                "max_buffer_size must not exceed {} bytes",
                MAX_BUFFER_SIZE
            ));
        }

        if self.initial_capacity > self.max_buffer_size {
            return Err("initial_capacity cannot exceed max_buffer_size".to_string());
        }

        Ok(())
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            max_buffer_size: MAX_BUFFER_SIZE,
            force_defaults: false,
        }
    }
}

/// Limits applied by [`Verifier`](crate::Verifier)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Maximum table/vector nesting followed from the root.
    pub max_depth: usize,
    /// Maximum number of tables visited in one verification.
    pub max_tables: usize,
    /// Buffers larger than this are rejected before any offset is followed.
    pub max_apparent_size: usize,
    /// Reject scalars not aligned to their own size.
    pub check_alignment: bool,
}

impl VerifierConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_depth: env_parse("ZEROBUF_MAX_DEPTH").unwrap_or(defaults.max_depth),
            max_tables: env_parse("ZEROBUF_MAX_TABLES").unwrap_or(defaults.max_tables),
            max_apparent_size: env_parse("ZEROBUF_MAX_APPARENT_SIZE")
                .unwrap_or(defaults.max_apparent_size),
            check_alignment: env_parse("ZEROBUF_CHECK_ALIGNMENT")
                .unwrap_or(defaults.check_alignment),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_depth == 0 {
            return Err("max_depth must be at least 1".to_string());
        }

        if self.max_tables == 0 {
            return Err("max_tables must be at least 1".to_string());
        }

        if self.max_apparent_size > MAX_BUFFER_SIZE {
            return Err(format!(
                "max_apparent_size must not exceed {} bytes",
                MAX_BUFFER_SIZE
            ));
        }

        Ok(())
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_tables: 1_000_000,
            max_apparent_size: MAX_BUFFER_SIZE,
            check_alignment: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
