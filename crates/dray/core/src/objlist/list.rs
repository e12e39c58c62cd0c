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

// Object list module
// The public collection surface plus the spill/rehydrate orchestration.
// When the memory pool displaces any page of a collection that is still
// fully in memory, the whole collection compacts, sorts, serialises across
// its pages, and drops the vector; a later read brings everything back.
// While a spill or rehydration is in flight the collection's pages are
// pinned in the pool so a cascading eviction can never select them.

use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use rand::Rng;
use tracing::debug;

use crate::context::WorkerContext;
use crate::errors::{CoreError, CoreResult};
use crate::io::bin_stream::{BinSerialize, BinStream};
use crate::memory::pool::MemoryPool;
use crate::objlist::KeyedObject;
use crate::objlist::attr::{AttrList, AttrListBase};
use crate::objlist::data::ObjListData;
use crate::objlist::store::ObjListBase;
use crate::storage::page::PageOwner;
use crate::storage::page_store::PageStore;

/// Default sampling rate for [`ObjList::estimated_storage_size`]
pub const DEFAULT_SAMPLE_RATE: f64 = 0.005;

pub(crate) struct ObjListInner<T: KeyedObject + BinSerialize + 'static> {
    id: usize,
    weak_self: Weak<RefCell<ObjListInner<T>>>,
    pub(crate) objlist_data: ObjListData<T>,
    attrlists: HashMap<String, Box<dyn AttrListBase>>,
}

impl<T: KeyedObject + BinSerialize + 'static> ObjListInner<T> {
    fn ensure_in_memory(&mut self, pool: &mut MemoryPool, store: &mut PageStore) -> CoreResult<()> {
        if self.objlist_data.in_memory {
            return Ok(());
        }
        self.rehydrate(pool, store)
    }

    fn add_object(&mut self, pool: &mut MemoryPool, store: &mut PageStore, obj: T) -> CoreResult<usize> {
        self.ensure_in_memory(pool, store)?;

        let mut scratch = BinStream::new();
        scratch.push(&obj);
        self.objlist_data.byte_size += scratch.len();

        self.grow_pages(pool, store)?;

        let idx = self.objlist_data.push_object(obj);
        self.objlist_data.publish_gauge();
        Ok(idx)
    }

    /// Appends pages until they can hold `byte_size` serialised bytes; every
    /// request runs with the collection pinned so it cannot evict itself
    fn grow_pages(&mut self, pool: &mut MemoryPool, store: &mut PageStore) -> CoreResult<()> {
        let page_size = store.page_size();
        if self.objlist_data.byte_size <= self.objlist_data.pages.len() * page_size {
            return Ok(());
        }

        for page in &self.objlist_data.pages {
            pool.pin_page(page.key());
        }
        let result: CoreResult<()> = (|| {
            while self.objlist_data.byte_size > self.objlist_data.pages.len() * page_size {
                let page = store.create_page();
                let key = page.key();
                let owner: Weak<RefCell<dyn PageOwner>> = self.weak_self.clone();
                page.borrow_mut().set_owner(owner);
                pool.pin_page(key);
                let requested = pool.request_page(store, key, page.clone());
                self.objlist_data.pages.push(page);
                requested?;
            }
            Ok(())
        })();
        for page in &self.objlist_data.pages {
            pool.unpin_page(page.key());
        }
        result
    }

    /// Sorts the vector ascending by key, reordering the deletion bitmap and
    /// every attribute list through the same permutation; afterwards the
    /// whole vector is the sorted prefix and the tail index is empty
    fn sort_in_memory(&mut self) {
        let n = self.objlist_data.data.len();
        if n == 0 {
            return;
        }

        let mut perm: Vec<usize> = (0..n).collect();
        {
            let data = &self.objlist_data.data;
            perm.sort_by(|&a, &b| data[a].key().cmp(data[b].key()));
        }

        for attrlist in self.attrlists.values_mut() {
            attrlist.reorder(&perm);
        }

        let mut slots: Vec<Option<T>> = self.objlist_data.data.drain(..).map(Some).collect();
        self.objlist_data.data = perm.iter().map(|&i| slots[i].take().expect("permutation visits each index once")).collect();
        self.objlist_data.del_bitmap = perm.iter().map(|&i| self.objlist_data.del_bitmap[i]).collect();

        self.objlist_data.hashed_objs.clear();
        self.objlist_data.sorted_prefix_len = n;
    }

    /// Compacts the vector in place against the deletion bitmap: the two
    /// cursors walk inwards and each deleted slot receives a surviving
    /// element from the back. Attribute lists see the same moves and the
    /// final resize. A call with nothing deleted is a no-op.
    fn deletion_finalize_in_memory(&mut self) {
        if self.objlist_data.num_deleted == 0 {
            return;
        }

        let n = self.objlist_data.data.len();
        let new_len = n - self.objlist_data.num_deleted;
        let mut i = 0;
        let mut j = n;
        loop {
            while i < j && !self.objlist_data.del_bitmap[i] {
                i += 1;
            }
            while i < j && self.objlist_data.del_bitmap[j - 1] {
                j -= 1;
            }
            if i + 1 >= j {
                break;
            }
            self.objlist_data.data.swap(i, j - 1);
            self.objlist_data.del_bitmap.swap(i, j - 1);
            for attrlist in self.attrlists.values_mut() {
                attrlist.move_attr(i, j - 1);
            }
            i += 1;
            j -= 1;
        }

        self.objlist_data.data.truncate(new_len);
        self.objlist_data.del_bitmap.truncate(new_len);
        for attrlist in self.attrlists.values_mut() {
            attrlist.resize(new_len);
        }
        self.objlist_data.num_deleted = 0;

        // compaction moves elements across the prefix boundary, so the sorted
        // prefix is gone; re-key everything until the next sort
        self.objlist_data.sorted_prefix_len = 0;
        self.objlist_data.hashed_objs = self
            .objlist_data
            .data
            .iter()
            .enumerate()
            .map(|(idx, obj)| (obj.key().clone(), idx))
            .collect();

        self.objlist_data.byte_size = self.objlist_data.serialize_objects().len();
        self.objlist_data.publish_gauge();
    }

    /// Writes the whole collection across its pages and drops the vector
    ///
    /// Runs compaction and sort first, so the persisted image is dense and
    /// fully sorted. Surplus tail pages are released before the write; the
    /// length prefix can push the image one page past what `add_object`
    /// provisioned, in which case one page is added.
    fn spill(&mut self, pool: &mut MemoryPool, store: &mut PageStore) -> CoreResult<()> {
        debug!(list = self.id, objects = self.objlist_data.data.len(), "spilling object list to disk");
        self.deletion_finalize_in_memory();
        self.sort_in_memory();

        let bs = self.objlist_data.serialize_objects();
        self.objlist_data.byte_size = bs.len();
        let page_size = store.page_size();

        while self.objlist_data.byte_size + page_size <= self.objlist_data.pages.len() * page_size
            && !self.objlist_data.pages.is_empty()
        {
            let page = self.objlist_data.pages.pop().expect("loop guard keeps the vector non-empty");
            store.release_page(&page)?;
        }

        for page in &self.objlist_data.pages {
            pool.pin_page(page.key());
        }
        let result: CoreResult<()> = (|| {
            self.grow_pages_for_spill(pool, store)?;
            for page in &self.objlist_data.pages {
                if !page.borrow().is_resident() {
                    pool.request_page(store, page.key(), page.clone())?;
                }
            }
            let mut start = 0;
            for page in &self.objlist_data.pages {
                let mut p = page.borrow_mut();
                p.clear_buffer();
                let sub = bs.sub_stream(start, page_size);
                start += sub.len();
                p.write(&sub)?;
                p.flush()?;
            }
            Ok(())
        })();
        for page in &self.objlist_data.pages {
            pool.unpin_page(page.key());
        }
        result?;

        self.objlist_data.persisted_size = self.objlist_data.data.len();
        self.objlist_data.data = Vec::new();
        self.objlist_data.del_bitmap = Vec::new();
        self.objlist_data.sorted_prefix_len = 0;
        self.objlist_data.byte_size = 0;
        self.objlist_data.in_memory = false;
        self.objlist_data.publish_gauge();
        Ok(())
    }

    /// Spill-side variant of the growth loop: the collection is already
    /// pinned, so pages are created and requested directly
    fn grow_pages_for_spill(&mut self, pool: &mut MemoryPool, store: &mut PageStore) -> CoreResult<()> {
        let page_size = store.page_size();
        while self.objlist_data.byte_size > self.objlist_data.pages.len() * page_size {
            let page = store.create_page();
            let key = page.key();
            let owner: Weak<RefCell<dyn PageOwner>> = self.weak_self.clone();
            page.borrow_mut().set_owner(owner);
            pool.pin_page(key);
            let requested = pool.request_page(store, key, page.clone());
            self.objlist_data.pages.push(page);
            requested?;
        }
        Ok(())
    }

    /// Reads the collection back: every page is made resident, the buffers
    /// are concatenated and deserialised, and the pages drop their copies
    fn rehydrate(&mut self, pool: &mut MemoryPool, store: &mut PageStore) -> CoreResult<()> {
        let required = self.objlist_data.pages.len();
        if required > pool.capacity() {
            return Err(CoreError::PoolExhausted {
                required,
                capacity: pool.capacity(),
            });
        }
        debug!(list = self.id, pages = required, "rehydrating object list from disk");

        for page in &self.objlist_data.pages {
            pool.pin_page(page.key());
        }
        let result: CoreResult<()> = (|| {
            for page in &self.objlist_data.pages {
                if !page.borrow().is_resident() {
                    pool.request_page(store, page.key(), page.clone())?;
                }
            }
            Ok(())
        })();
        for page in &self.objlist_data.pages {
            pool.unpin_page(page.key());
        }
        result?;

        let mut bs = BinStream::new();
        for page in &self.objlist_data.pages {
            let mut p = page.borrow_mut();
            bs.append(p.buffer()?);
            p.clear_buffer();
        }

        let byte_size = bs.len();
        let data: Vec<T> = if bs.is_empty() { Vec::new() } else { bs.pop()? };
        self.objlist_data.del_bitmap = vec![false; data.len()];
        self.objlist_data.sorted_prefix_len = data.len();
        self.objlist_data.hashed_objs.clear();
        self.objlist_data.num_deleted = 0;
        self.objlist_data.persisted_size = data.len();
        self.objlist_data.byte_size = byte_size;
        self.objlist_data.data = data;
        self.objlist_data.in_memory = true;
        self.objlist_data.publish_gauge();
        Ok(())
    }

    fn delete_by_key(&mut self, key: &T::Key) -> CoreResult<usize> {
        // the tail index first; the linear scan covers sorted data, where
        // deletes by key only arrive after a rehydration emptied the index
        let idx = match self.objlist_data.hashed_objs.get(key) {
            Some(&idx) => idx,
            None => self
                .objlist_data
                .data
                .iter()
                .position(|obj| obj.key() == key)
                .ok_or_else(|| CoreError::OutOfRange("no object with the given key".into()))?,
        };
        self.objlist_data.mark_deleted(idx)?;
        Ok(idx)
    }

    fn estimated_storage_size(&self, sample_rate: f64) -> usize {
        let n = self.objlist_data.data.len();
        if n == 0 {
            return 0;
        }
        let sample_num = (((n as f64) * sample_rate) as usize + 1).min(n);

        let mut sampled = HashSet::new();
        let mut rng = rand::thread_rng();
        while sampled.len() < sample_num {
            sampled.insert(rng.gen_range(0..n));
        }

        let mut bs = BinStream::new();
        for &idx in &sampled {
            bs.push(&self.objlist_data.data[idx]);
        }
        bs.len() * self.objlist_data.data.capacity() / sample_num
    }
}

impl<T: KeyedObject + BinSerialize + 'static> PageOwner for ObjListInner<T> {
    /// First page of a fully resident collection going out takes the whole
    /// collection with it; later pages of the same collection are no-ops
    fn on_page_evicting(&mut self, pool: &mut MemoryPool, store: &mut PageStore) -> CoreResult<()> {
        if !self.objlist_data.in_memory || !self.objlist_data.all_pages_resident() {
            return Ok(());
        }
        self.spill(pool, store)
    }
}

impl<T: KeyedObject + BinSerialize + 'static> ObjListBase for ObjListInner<T> {
    fn get_id(&self) -> usize {
        self.id
    }

    fn size(&self) -> usize {
        self.objlist_data.size()
    }

    fn byte_size_in_memory(&self) -> usize {
        self.objlist_data.byte_size_in_memory()
    }

    fn release_pages(&mut self, store: &mut PageStore) -> CoreResult<()> {
        for page in self.objlist_data.pages.drain(..) {
            store.release_page(&page)?;
        }
        Ok(())
    }
}

/// Public collection surface: a cheap handle over the paged storage
///
/// Clones share the same underlying collection. All operations that may
/// touch pages take the worker context; observers read fields directly.
pub struct ObjList<T: KeyedObject + BinSerialize + 'static> {
    id: usize,
    inner: Rc<RefCell<ObjListInner<T>>>,
}

impl<T: KeyedObject + BinSerialize + 'static> Clone for ObjList<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: KeyedObject + BinSerialize + 'static> ObjList<T> {
    /// Creates an empty, in-memory collection with the next id of this worker
    pub fn new(ctx: &mut WorkerContext) -> Self {
        let id = ctx.alloc_objlist_id();
        let inner = Rc::new_cyclic(|weak| {
            RefCell::new(ObjListInner {
                id,
                weak_self: weak.clone(),
                objlist_data: ObjListData::new(),
                attrlists: HashMap::new(),
            })
        });
        Self { id, inner }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> String {
        format!("ObjList-{}", self.id)
    }

    /// The collection as a type-erased registry entry
    pub fn as_base(&self) -> Rc<RefCell<dyn ObjListBase>> {
        self.inner.clone()
    }

    /// Serialises the object, grows the page vector if the budget demands
    /// it, and appends the object to the unsorted tail. Returns the index.
    pub fn add_object(&self, ctx: &mut WorkerContext, obj: T) -> CoreResult<usize> {
        let (pool, store) = ctx.pool_and_store();
        self.inner.borrow_mut().add_object(pool, store, obj)
    }

    /// Looks an object up by key, rehydrating the collection if needed
    ///
    /// The returned borrow must be dropped before the next mutating call.
    pub fn find(&self, ctx: &mut WorkerContext, key: &T::Key) -> CoreResult<Option<Ref<'_, T>>> {
        {
            let (pool, store) = ctx.pool_and_store();
            self.inner.borrow_mut().ensure_in_memory(pool, store)?;
        }
        let inner = self.inner.borrow();
        let idx = inner.objlist_data.find_index(key);
        Ok(idx.map(|i| Ref::map(inner, |inn| &inn.objlist_data.objects()[i])))
    }

    /// Checked element access by index, rehydrating if needed
    pub fn get(&self, ctx: &mut WorkerContext, idx: usize) -> CoreResult<Ref<'_, T>> {
        {
            let (pool, store) = ctx.pool_and_store();
            self.inner.borrow_mut().ensure_in_memory(pool, store)?;
        }
        let inner = self.inner.borrow();
        if idx >= inner.objlist_data.vector_size() {
            return Err(CoreError::OutOfRange(format!(
                "index {idx} is outside the object list of length {}",
                inner.objlist_data.vector_size()
            )));
        }
        Ok(Ref::map(inner, |inn| &inn.objlist_data.objects()[idx]))
    }

    /// Index of an object by its address; see
    /// [`ObjListData::index_of`](crate::objlist::data::ObjListData::index_of)
    /// for the residency contract
    pub fn index_of(&self, ptr: *const T) -> CoreResult<usize> {
        self.inner.borrow().objlist_data.index_of(ptr)
    }

    /// Index of the object with the given key, rehydrating if needed
    pub fn index_of_key(&self, ctx: &mut WorkerContext, key: &T::Key) -> CoreResult<usize> {
        {
            let (pool, store) = ctx.pool_and_store();
            self.inner.borrow_mut().ensure_in_memory(pool, store)?;
        }
        self.inner
            .borrow()
            .objlist_data
            .find_index(key)
            .ok_or_else(|| CoreError::OutOfRange("no object with the given key".into()))
    }

    /// Soft-deletes the object at the given address; storage is reclaimed by
    /// [`deletion_finalize`](Self::deletion_finalize)
    pub fn delete_object(&self, ptr: *const T) -> CoreResult<usize> {
        let mut inner = self.inner.borrow_mut();
        let idx = inner.objlist_data.index_of(ptr)?;
        inner.objlist_data.mark_deleted(idx)?;
        Ok(idx)
    }

    /// Soft-deletes the object with the given key, rehydrating if needed
    pub fn delete_object_by_key(&self, ctx: &mut WorkerContext, key: &T::Key) -> CoreResult<usize> {
        let (pool, store) = ctx.pool_and_store();
        let mut inner = self.inner.borrow_mut();
        inner.ensure_in_memory(pool, store)?;
        inner.delete_by_key(key)
    }

    pub fn is_deleted(&self, idx: usize) -> CoreResult<bool> {
        self.inner.borrow().objlist_data.is_deleted(idx)
    }

    /// Sorts the collection ascending by key; every attribute list is
    /// reordered through the same permutation
    pub fn sort(&self, ctx: &mut WorkerContext) -> CoreResult<()> {
        let (pool, store) = ctx.pool_and_store();
        let mut inner = self.inner.borrow_mut();
        inner.ensure_in_memory(pool, store)?;
        inner.sort_in_memory();
        Ok(())
    }

    /// Compacts soft-deleted slots out of the collection and its attribute lists
    pub fn deletion_finalize(&self, ctx: &mut WorkerContext) -> CoreResult<()> {
        let (pool, store) = ctx.pool_and_store();
        let mut inner = self.inner.borrow_mut();
        inner.ensure_in_memory(pool, store)?;
        inner.deletion_finalize_in_memory();
        Ok(())
    }

    /// Estimates the serialised footprint of the full collection from a
    /// random sample of `ceil(n * rate) + 1` distinct objects
    pub fn estimated_storage_size(&self, ctx: &mut WorkerContext, sample_rate: f64) -> CoreResult<usize> {
        {
            let (pool, store) = ctx.pool_and_store();
            self.inner.borrow_mut().ensure_in_memory(pool, store)?;
        }
        Ok(self.inner.borrow().estimated_storage_size(sample_rate))
    }

    /// Creates a named attribute list sized to the current collection
    pub fn create_attrlist<A: Clone + BinSerialize + 'static>(&self, name: &str, default: A) -> CoreResult<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.attrlists.contains_key(name) {
            return Err(CoreError::DuplicateName(name.into()));
        }
        let len = inner.objlist_data.vector_size();
        inner.attrlists.insert(name.to_string(), Box::new(AttrList::<A>::new(len, default)));
        Ok(())
    }

    /// Runs a closure against a named attribute list
    pub fn with_attrlist<A, R>(&self, name: &str, f: impl FnOnce(&mut AttrList<A>) -> R) -> CoreResult<R>
    where
        A: Clone + BinSerialize + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let attrlist = inner.attrlists.get_mut(name).ok_or_else(|| CoreError::MissingName(name.into()))?;
        let typed = attrlist
            .as_any_mut()
            .downcast_mut::<AttrList<A>>()
            .ok_or_else(|| CoreError::InvariantViolation(format!("attribute list '{name}' holds a different type")))?;
        Ok(f(typed))
    }

    /// Removes a named attribute list; returns whether it existed
    pub fn del_attrlist(&self, name: &str) -> bool {
        self.inner.borrow_mut().attrlists.remove(name).is_some()
    }

    /// Serialises the attributes of the object at `idx` from every attribute
    /// list into the stream (outgoing object migration)
    pub fn migrate_attribute(&self, bs: &mut BinStream, idx: usize) -> CoreResult<()> {
        let mut inner = self.inner.borrow_mut();
        for attrlist in inner.attrlists.values_mut() {
            attrlist.migrate(bs, idx)?;
        }
        Ok(())
    }

    /// Reads the attributes for the object at `idx` back from the stream
    /// into every attribute list (incoming object migration)
    pub fn process_attribute(&self, bs: &mut BinStream, idx: usize) -> CoreResult<()> {
        let mut inner = self.inner.borrow_mut();
        for attrlist in inner.attrlists.values_mut() {
            attrlist.process_bin(bs, idx)?;
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.inner.borrow().objlist_data.size()
    }

    pub fn vector_size(&self) -> usize {
        self.inner.borrow().objlist_data.vector_size()
    }

    pub fn sorted_prefix_len(&self) -> usize {
        self.inner.borrow().objlist_data.sorted_prefix_len()
    }

    pub fn num_deleted(&self) -> usize {
        self.inner.borrow().objlist_data.num_deleted()
    }

    pub fn hashed_size(&self) -> usize {
        self.inner.borrow().objlist_data.hashed_size()
    }

    pub fn in_memory(&self) -> bool {
        self.inner.borrow().objlist_data.in_memory()
    }

    pub fn num_pages(&self) -> usize {
        self.inner.borrow().objlist_data.num_pages()
    }

    pub fn byte_size_in_memory(&self) -> usize {
        self.inner.borrow().objlist_data.byte_size_in_memory()
    }

    /// The atomic gauge the memory checker samples for this collection
    pub fn mem_gauge(&self) -> std::sync::Arc<std::sync::atomic::AtomicUsize> {
        self.inner.borrow().objlist_data.mem_gauge()
    }
}
