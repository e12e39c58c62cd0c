// Dray
// Copyright (C) 2026 Dray Team

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default per-worker memory budget: 1 GiB
pub const DEFAULT_MAXIMUM_THREAD_MEMORY: usize = 1024 * 1024 * 1024;
/// Default page capacity: 4 MiB
pub const DEFAULT_PAGE_SIZE: usize = 4 * 1024 * 1024;
/// Default directory for page backing files
pub const DEFAULT_PAGE_DIR: &str = "/var/tmp";

/// Errors that can occur while validating a configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    InvalidValue(String),
}

/// Worker-side configuration consumed by the paged object-store core
///
/// The runner hands every worker thread one copy of this struct; the core
/// derives the size of its memory pool from it and never re-reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Per-worker memory budget in bytes
    pub maximum_thread_memory: usize,
    /// Fixed capacity of a single page in bytes
    pub page_size: usize,
    /// Number of worker threads running in this process
    pub num_local_workers: usize,
    /// Directory that receives page backing files
    pub page_dir: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            maximum_thread_memory: DEFAULT_MAXIMUM_THREAD_MEMORY,
            page_size: DEFAULT_PAGE_SIZE,
            num_local_workers: 1,
            page_dir: PathBuf::from(DEFAULT_PAGE_DIR),
        }
    }
}

impl CoreConfig {
    /// Checks that the configuration describes a pool that can hold at least
    /// one page for at least one worker
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue("page_size must be non-zero".into()));
        }
        if self.page_size > self.maximum_thread_memory {
            return Err(ConfigError::InvalidValue(format!(
                "page_size ({}) exceeds maximum_thread_memory ({})",
                self.page_size, self.maximum_thread_memory
            )));
        }
        if self.num_local_workers == 0 {
            return Err(ConfigError::InvalidValue("num_local_workers must be non-zero".into()));
        }
        Ok(())
    }

    /// Number of pages the per-worker memory pool can hold
    pub fn num_pages(&self) -> usize {
        self.maximum_thread_memory / self.page_size
    }
}
