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

// Worker context module
// One context per worker thread, threaded explicitly through every operation
// that may touch pages. Nothing in here is a process-wide singleton, which
// keeps tests deterministic: a fresh context is a fresh world.

use dray_common::config::CoreConfig;

use crate::errors::{CoreError, CoreResult};
use crate::memory::pool::MemoryPool;
use crate::storage::page_store::PageStore;

/// Per-thread state of the paged object store
pub struct WorkerContext {
    local_tid: usize,
    config: CoreConfig,
    pub page_store: PageStore,
    pub mem_pool: MemoryPool,
    next_objlist_id: usize,
}

impl WorkerContext {
    pub fn new(config: CoreConfig, local_tid: usize) -> CoreResult<Self> {
        config.validate()?;
        if local_tid >= config.num_local_workers {
            return Err(CoreError::OutOfRange(format!(
                "worker id {local_tid} is not below num_local_workers ({})",
                config.num_local_workers
            )));
        }
        Ok(Self {
            local_tid,
            page_store: PageStore::new(&config, local_tid),
            mem_pool: MemoryPool::new(&config),
            config,
            next_objlist_id: 0,
        })
    }

    pub fn local_tid(&self) -> usize {
        self.local_tid
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Mutable access to the pool and the page store at once; collection
    /// operations need both sides during a spill
    pub fn pool_and_store(&mut self) -> (&mut MemoryPool, &mut PageStore) {
        (&mut self.mem_pool, &mut self.page_store)
    }

    pub(crate) fn alloc_objlist_id(&mut self) -> usize {
        let id = self.next_objlist_id;
        self.next_objlist_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_context_derives_pool_capacity_from_config() {
        let dir = tempdir().unwrap();
        let config = CoreConfig {
            maximum_thread_memory: 32 * 1024 * 1024,
            page_size: 4 * 1024 * 1024,
            num_local_workers: 1,
            page_dir: dir.path().to_path_buf(),
        };
        let ctx = WorkerContext::new(config, 0).unwrap();
        assert_eq!(ctx.mem_pool.capacity(), 8);
        assert_eq!(ctx.page_store.page_size(), 4 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = CoreConfig {
            page_size: 0,
            ..CoreConfig::default()
        };
        assert!(WorkerContext::new(config, 0).is_err());
    }

    #[test]
    fn test_worker_id_must_be_local() {
        let config = CoreConfig {
            num_local_workers: 2,
            ..CoreConfig::default()
        };
        assert!(WorkerContext::new(config, 2).is_err());
    }
}
