//! Executor configuration.
//!
//! Values are resolved in this order (highest priority first):
//!
//! 1. Builder overrides (`with_*` methods)
//! 2. Environment variables (`COLEXEC_*`)
//! 3. TOML file or string
//! 4. Default values

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{ExecError, Result};

/// Default number of rows per batch produced by sources.
pub const DEFAULT_BATCH_SIZE: usize = 2048;

/// Default number of rows hashed together in one unit.
pub const DEFAULT_UNIT_SIZE: usize = 256;

/// Largest accepted unit size.
pub const MAX_UNIT_SIZE: usize = 65536;

/// Configuration for batch operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of rows per batch for vectorized execution.
    pub batch_size: usize,
    /// Rows hashed per processing unit.
    pub unit_size: usize,
    /// Bounded capacity of each input stream.
    pub channel_capacity: usize,
    /// Arena limit in bytes (0 = unlimited).
    pub memory_limit: usize,
    /// Idle hash slot maps kept by the pool.
    pub slot_map_pool_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            unit_size: DEFAULT_UNIT_SIZE,
            channel_capacity: 4,
            memory_limit: 0,
            slot_map_pool_size: 16,
        }
    }
}

impl ExecutorConfig {
    /// Creates a new executor configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the unit size.
    #[must_use]
    pub fn with_unit_size(mut self, unit_size: usize) -> Self {
        self.unit_size = unit_size;
        self
    }

    /// Sets the input stream capacity.
    #[must_use]
    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }

    /// Sets the memory limit in bytes.
    #[must_use]
    pub fn with_memory_limit(mut self, memory_limit: usize) -> Self {
        self.memory_limit = memory_limit;
        self
    }

    /// Sets the number of idle slot maps retained by the pool.
    #[must_use]
    pub fn with_slot_map_pool_size(mut self, size: usize) -> Self {
        self.slot_map_pool_size = size;
        self
    }

    /// Loads configuration from a TOML file merged with `COLEXEC_*` variables.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("COLEXEC_"));

        let config: Self = figment
            .extract()
            .map_err(|e| ExecError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Creates a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str))
            .extract()
            .map_err(|e| ExecError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ExecError::Config(e.to_string()))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.unit_size == 0 || self.unit_size > MAX_UNIT_SIZE {
            return Err(ExecError::Config(format!(
                "unit_size {} is out of range [1, {MAX_UNIT_SIZE}]",
                self.unit_size
            )));
        }
        if self.channel_capacity == 0 {
            return Err(ExecError::Config(
                "channel_capacity must be greater than 0".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ExecError::Config("batch_size must be greater than 0".into()));
        }
        Ok(())
    }
}
