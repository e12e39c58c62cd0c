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

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::context::WorkerContext;
use crate::errors::{CoreError, CoreResult};
use crate::io::bin_stream::BinSerialize;
use crate::objlist::KeyedObject;
use crate::objlist::list::ObjList;
use crate::storage::page_store::PageStore;

/// Type-erased view of a registered object list
pub trait ObjListBase {
    fn get_id(&self) -> usize;

    /// Live element count, in or out of memory
    fn size(&self) -> usize;

    /// Serialised size while resident, zero while evicted
    fn byte_size_in_memory(&self) -> usize;

    /// Hands every page back to the page store
    fn release_pages(&mut self, store: &mut PageStore) -> CoreResult<()>;
}

/// Per-thread registry of live object lists
#[derive(Default)]
pub struct ObjListStore {
    lists: HashMap<usize, Rc<RefCell<dyn ObjListBase>>>,
}

impl ObjListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collection and registers it under its id
    pub fn create_objlist<T>(&mut self, ctx: &mut WorkerContext) -> ObjList<T>
    where
        T: KeyedObject + BinSerialize + 'static,
    {
        let list = ObjList::new(ctx);
        self.lists.insert(list.id(), list.as_base());
        debug!(list = list.id(), registered = self.lists.len(), "object list created");
        list
    }

    pub fn has_objlist(&self, id: usize) -> bool {
        self.lists.contains_key(&id)
    }

    pub fn get_objlist(&self, id: usize) -> CoreResult<Rc<RefCell<dyn ObjListBase>>> {
        self.lists.get(&id).cloned().ok_or_else(|| unknown_list(id))
    }

    /// Unregisters a collection and returns its pages to the page store
    ///
    /// The pages keep their backing files for the next tenant; handles held
    /// by the caller keep working on the in-memory remainder.
    pub fn drop_objlist(&mut self, page_store: &mut PageStore, id: usize) -> CoreResult<()> {
        let list = self.lists.remove(&id).ok_or_else(|| unknown_list(id))?;
        list.borrow_mut().release_pages(page_store)?;
        debug!(list = id, registered = self.lists.len(), "object list dropped");
        Ok(())
    }

    /// Number of registered lists
    pub fn size(&self) -> usize {
        self.lists.len()
    }
}

fn unknown_list(id: usize) -> CoreError {
    CoreError::OutOfRange(format!("object list {id} is not registered on this worker"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CoreResult;
    use crate::io::bin_stream::BinStream;
    use dray_common::config::CoreConfig;
    use tempfile::tempdir;

    #[derive(Debug)]
    struct Obj {
        key: u32,
    }

    impl KeyedObject for Obj {
        type Key = u32;

        fn key(&self) -> &u32 {
            &self.key
        }
    }

    impl BinSerialize for Obj {
        fn write_to(&self, bs: &mut BinStream) {
            bs.push(&self.key);
        }

        fn read_from(bs: &mut BinStream) -> CoreResult<Self> {
            Ok(Obj { key: bs.pop()? })
        }
    }

    fn test_context() -> (WorkerContext, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = CoreConfig {
            maximum_thread_memory: 64 * 1024,
            page_size: 4 * 1024,
            num_local_workers: 1,
            page_dir: dir.path().to_path_buf(),
        };
        (WorkerContext::new(config, 0).unwrap(), dir)
    }

    #[test]
    fn test_registry_tracks_created_lists() {
        let (mut ctx, _dir) = test_context();
        let mut store = ObjListStore::new();

        let first: ObjList<Obj> = store.create_objlist(&mut ctx);
        let second: ObjList<Obj> = store.create_objlist(&mut ctx);

        assert_ne!(first.id(), second.id());
        assert_eq!(store.size(), 2);
        assert!(store.has_objlist(first.id()));
        assert!(store.get_objlist(second.id()).is_ok());
        assert!(store.get_objlist(999).is_err());
    }

    #[test]
    fn test_erased_view_reports_size_and_bytes() {
        let (mut ctx, _dir) = test_context();
        let mut store = ObjListStore::new();

        let list: ObjList<Obj> = store.create_objlist(&mut ctx);
        for i in 0..3 {
            list.add_object(&mut ctx, Obj { key: i }).unwrap();
        }

        let erased = store.get_objlist(list.id()).unwrap();
        assert_eq!(erased.borrow().size(), 3);
        assert_eq!(erased.borrow().byte_size_in_memory(), 12);
    }

    #[test]
    fn test_drop_objlist_releases_pages() {
        let (mut ctx, _dir) = test_context();
        let mut store = ObjListStore::new();

        let list: ObjList<Obj> = store.create_objlist(&mut ctx);
        list.add_object(&mut ctx, Obj { key: 1 }).unwrap();
        assert_eq!(list.num_pages(), 1);
        assert_eq!(ctx.page_store.num_free_pages(), 0);

        let id = list.id();
        store.drop_objlist(&mut ctx.page_store, id).unwrap();
        assert!(!store.has_objlist(id));
        assert_eq!(ctx.page_store.num_free_pages(), 1);

        assert!(store.drop_objlist(&mut ctx.page_store, id).is_err());
    }
}
