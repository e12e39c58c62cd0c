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

// Page store module
// Per-thread factory and recycler for pages. Ids are monotonic; released
// pages keep their id and their backing file and are handed out again before
// any new page is allocated. Stale bytes from a previous tenant are
// indeterminate until overwritten.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use dray_common::config::CoreConfig;
use tracing::debug;

use crate::errors::{CoreError, CoreResult};
use crate::storage::page::{Page, PageHandle};

/// Per-thread factory and recycler for fixed-size pages
pub struct PageStore {
    local_tid: usize,
    page_size: usize,
    page_dir: PathBuf,
    pages: HashMap<usize, PageHandle>,
    free_ids: Vec<usize>,
    free_set: HashSet<usize>,
    next_id: usize,
}

impl PageStore {
    pub fn new(config: &CoreConfig, local_tid: usize) -> Self {
        Self {
            local_tid,
            page_size: config.page_size,
            page_dir: config.page_dir.clone(),
            pages: HashMap::new(),
            free_ids: Vec::new(),
            free_set: HashSet::new(),
            next_id: 0,
        }
    }

    /// Fixed capacity every page of this store is created with
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages ever created and not yet dropped, free ones included
    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn num_free_pages(&self) -> usize {
        self.free_ids.len()
    }

    /// Returns a free page if one is available, otherwise allocates a new
    /// page under the next id
    pub fn create_page(&mut self) -> PageHandle {
        if let Some(id) = self.free_ids.pop() {
            self.free_set.remove(&id);
            return self.pages[&id].clone();
        }
        let id = self.next_id;
        self.next_id += 1;
        let handle = PageHandle::new(Page::new(id, self.local_tid, self.page_size, &self.page_dir));
        self.pages.insert(id, handle.clone());
        debug!(pages = self.pages.len(), "page store grew");
        handle
    }

    /// Returns a page to the free set
    ///
    /// The page keeps its id and backing file for the next tenant. Releasing
    /// a page that is already free returns `false`; releasing a page this
    /// store never created is an invariant violation.
    pub fn release_page(&mut self, page: &PageHandle) -> CoreResult<bool> {
        let key = page.key();
        match self.pages.get(&key) {
            Some(stored) if *stored == *page => {}
            _ => {
                return Err(CoreError::InvariantViolation(format!(
                    "page {key} was not created by this page store"
                )));
            }
        }
        if self.free_set.contains(&key) {
            return Ok(false);
        }
        page.borrow_mut().clear_owner();
        self.free_set.insert(key);
        self.free_ids.push(key);
        Ok(true)
    }

    /// Finalizes and destroys every page, backing files included
    pub fn drop_all(&mut self) -> CoreResult<()> {
        for handle in self.pages.values() {
            handle.borrow_mut().finalize()?;
        }
        self.pages.clear();
        self.free_ids.clear();
        self.free_set.clear();
        Ok(())
    }
}
