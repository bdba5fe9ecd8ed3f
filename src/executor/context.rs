//! Execution context shared by operators of one process.

use std::sync::Arc;

use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::memory::Arena;

use super::slot_map::SlotMapPool;

/// Handles every operator needs: the arena, the slot map pool and the
/// configuration.
///
/// Cloning is cheap; clones share the same arena and pool.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    arena: Arc<Arena>,
    slot_maps: Arc<SlotMapPool>,
    config: ExecutorConfig,
}

impl ExecutionContext {
    /// Creates a context with a fresh arena and pool sized from `config`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `config` fails validation.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ExecutorConfig) -> Self {
        let arena = Arc::new(Arena::with_limit(config.memory_limit));
        let slot_maps = Arc::new(SlotMapPool::new(
            config.slot_map_pool_size,
            config.unit_size,
        ));
        Self {
            arena,
            slot_maps,
            config,
        }
    }

    /// Creates a context over an existing arena and pool.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `config` fails validation.
    pub fn with_shared(
        arena: Arc<Arena>,
        slot_maps: Arc<SlotMapPool>,
        config: ExecutorConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            arena,
            slot_maps,
            config,
        })
    }

    /// Returns the arena.
    #[must_use]
    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    /// Returns the slot map pool.
    #[must_use]
    pub fn slot_maps(&self) -> &Arc<SlotMapPool> {
        &self.slot_maps
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::build(ExecutorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;

    #[test]
    fn test_clones_share_resources() {
        let ctx = ExecutionContext::new(ExecutorConfig::new().with_memory_limit(1 << 20)).unwrap();
        let other = ctx.clone();
        assert!(Arc::ptr_eq(ctx.arena(), other.arena()));
        assert!(Arc::ptr_eq(ctx.slot_maps(), other.slot_maps()));
        assert_eq!(ctx.arena().limit(), 1 << 20);
    }

    #[test]
    fn test_with_shared() {
        let arena = Arc::new(Arena::new());
        let pool = Arc::new(SlotMapPool::new(2, 64));
        let ctx = ExecutionContext::with_shared(
            Arc::clone(&arena),
            Arc::clone(&pool),
            ExecutorConfig::default(),
        )
        .unwrap();
        assert!(Arc::ptr_eq(ctx.arena(), &arena));
        assert_eq!(ctx.config().unit_size, 256);
    }

    #[test]
    fn test_rejects_invalid_config() {
        for config in [
            ExecutorConfig::new().with_unit_size(0),
            ExecutorConfig::new().with_channel_capacity(0),
            ExecutorConfig::new().with_batch_size(0),
        ] {
            let err = ExecutionContext::new(config.clone()).unwrap_err();
            assert!(matches!(err, ExecError::Config(_)));
            let err = ExecutionContext::with_shared(
                Arc::new(Arena::new()),
                Arc::new(SlotMapPool::new(1, 64)),
                config,
            )
            .unwrap_err();
            assert!(matches!(err, ExecError::Config(_)));
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ExecutionContext::new(ExecutorConfig::default()).is_ok());
        assert_eq!(ExecutionContext::default().config().unit_size, 256);
    }
}
