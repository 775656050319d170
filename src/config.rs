//! Repository configuration.
//!
//! Loaded by the host (file, env, CLI) and handed over as plain values.

use serde::{Deserialize, Serialize};

use crate::dialect::Engine;
use crate::error::{TableError, TableResult};
use crate::statement::DEFAULT_ROW_LIMIT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Engine the repository speaks to.
    pub engine: Engine,

    /// Row cap for reads that do not pass a limit.
    #[serde(default = "default_limit")]
    pub default_limit: u32,
}

fn default_limit() -> u32 {
    DEFAULT_ROW_LIMIT
}

impl RepositoryConfig {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            default_limit: DEFAULT_ROW_LIMIT,
        }
    }

    pub fn with_default_limit(mut self, default_limit: u32) -> Self {
        self.default_limit = default_limit;
        self
    }

    pub fn validate(&self) -> TableResult<()> {
        if self.default_limit == 0 {
            return Err(TableError::invalid("default_limit must be greater than zero"));
        }
        Ok(())
    }
}
