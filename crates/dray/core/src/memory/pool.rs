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

// Memory pool module
// The per-thread page residency controller. It owns the eviction cache keyed
// by page id; the set of keys in the cache is exactly the set of resident
// pages attributed to this worker. The cache itself runs no side effects, so
// the pool detects displacement by peeking the victim before and after each
// insertion and runs the spill itself.

use dray_common::config::CoreConfig;
use tracing::debug;

use crate::errors::CoreResult;
use crate::memory::cache::{EvictionCache, EvictionPolicy};
use crate::storage::page::PageHandle;
use crate::storage::page_store::PageStore;

/// Outcome of a page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRequest {
    /// The page was already resident; nothing happened
    AlreadyResident,
    /// The page was brought into memory, possibly displacing another
    BroughtIn,
}

/// Per-thread page residency controller
pub struct MemoryPool {
    cache: EvictionCache<usize, PageHandle>,
    num_pages: usize,
}

impl MemoryPool {
    /// Builds a pool sized to `maximum_thread_memory / page_size`, evicting
    /// least-recently-requested pages first
    pub fn new(config: &CoreConfig) -> Self {
        Self::with_policy(config, EvictionPolicy::LRU)
    }

    pub fn with_policy(config: &CoreConfig, policy: EvictionPolicy) -> Self {
        let num_pages = config.num_pages();
        debug!(num_pages, "memory pool sized");
        Self {
            cache: EvictionCache::new(policy, num_pages),
            num_pages,
        }
    }

    /// Maximum number of pages the pool can hold
    pub fn capacity(&self) -> usize {
        self.num_pages
    }

    pub fn num_pages_in_memory(&self) -> usize {
        self.cache.len()
    }

    pub fn contains_page(&self, key: usize) -> bool {
        self.cache.contains(&key)
    }

    /// Keys of every currently resident page
    pub fn resident_pages(&self) -> Vec<usize> {
        self.cache.iter().map(|(k, _)| *k).collect()
    }

    /// Brings a page into memory
    ///
    /// If the insertion displaces a victim, the victim's owner is given the
    /// chance to spill its whole collection, then the victim leaves memory;
    /// only afterwards is the requested page swapped in. A request for a page
    /// that is already resident returns without refreshing its recency.
    pub fn request_page(&mut self, store: &mut PageStore, key: usize, page: PageHandle) -> CoreResult<PageRequest> {
        if self.cache.contains(&key) {
            return Ok(PageRequest::AlreadyResident);
        }

        // The incoming page is pinned across the eviction so a cascading
        // spill cannot displace it before it ever becomes resident.
        self.cache.pin(key);
        let victim_before = self.cache.peek_victim().map(|(k, v)| (*k, v.clone()));
        self.cache.put(key, page.clone());
        let victim_after = self.cache.peek_victim().map(|(k, _)| *k);

        let mut displaced = None;
        if let Some((victim_key, victim_page)) = victim_before {
            if victim_after != Some(victim_key) {
                displaced = Some((victim_key, victim_page));
            }
        }
        let result = match displaced {
            Some((victim_key, victim_page)) => {
                debug!(victim = victim_key, incoming = key, "page displaced from memory pool");
                self.evict_page(store, &victim_page)
            }
            None => Ok(()),
        };
        self.cache.unpin(&key);
        result?;

        page.borrow_mut().swap_in()?;
        Ok(PageRequest::BroughtIn)
    }

    /// Evicts victims until at least `bytes_required` bytes of page capacity
    /// have been freed or the pool is empty; returns the bytes freed
    pub fn request_space(&mut self, store: &mut PageStore, bytes_required: usize) -> CoreResult<usize> {
        let mut bytes_freed = 0;
        while bytes_freed < bytes_required {
            let Some((key, page)) = self.cache.peek_victim().map(|(k, v)| (*k, v.clone())) else {
                break;
            };
            bytes_freed += page.borrow().capacity();
            self.evict_page(store, &page)?;
            // a cascading spill may have reshuffled the cache, so remove the
            // accounted victim by key rather than popping blindly
            self.cache.remove(&key);
        }
        Ok(bytes_freed)
    }

    /// Exempts a page from victim selection; used while its collection is
    /// mid-spill or mid-rehydration
    pub(crate) fn pin_page(&mut self, key: usize) {
        self.cache.pin(key);
    }

    pub(crate) fn unpin_page(&mut self, key: usize) {
        self.cache.unpin(&key);
    }

    /// Runs the owner spill callback, then takes the page out of memory
    fn evict_page(&mut self, store: &mut PageStore, page: &PageHandle) -> CoreResult<()> {
        let owner = page.borrow().owner();
        if let Some(owner) = owner {
            owner.borrow_mut().on_page_evicting(self, store)?;
        }
        page.borrow_mut().swap_out()
    }
}
