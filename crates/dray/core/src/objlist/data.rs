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

// Object list storage module
// The paged storage of one collection: the in-memory vector, its deletion
// bitmap and unsorted-tail key index, and the ordered pages that back the
// serialised form on disk. Invariants:
//   - data[0..sorted_prefix_len) is strictly ascending by key; the tail is
//     unsorted and indexed by hashed_objs
//   - byte_size tracks the serialised length of data while in memory
//   - while not in memory, data is empty and persisted_size remembers the
//     element count at the moment of the spill

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::{CoreError, CoreResult};
use crate::io::bin_stream::{BinSerialize, BinStream};
use crate::objlist::KeyedObject;
use crate::storage::page::PageHandle;

/// Paged storage of a homogeneous collection
pub struct ObjListData<T: KeyedObject> {
    pub(crate) data: Vec<T>,
    pub(crate) del_bitmap: Vec<bool>,
    pub(crate) hashed_objs: HashMap<T::Key, usize>,
    pub(crate) pages: Vec<PageHandle>,
    pub(crate) sorted_prefix_len: usize,
    pub(crate) num_deleted: usize,
    pub(crate) byte_size: usize,
    pub(crate) in_memory: bool,
    pub(crate) persisted_size: usize,
    mem_gauge: Arc<AtomicUsize>,
}

impl<T: KeyedObject + BinSerialize> ObjListData<T> {
    pub(crate) fn new() -> Self {
        Self {
            data: Vec::new(),
            del_bitmap: Vec::new(),
            hashed_objs: HashMap::new(),
            pages: Vec::new(),
            sorted_prefix_len: 0,
            num_deleted: 0,
            byte_size: 0,
            in_memory: true,
            persisted_size: 0,
            mem_gauge: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Live element count: adds minus soft deletes, valid in or out of memory
    pub fn size(&self) -> usize {
        self.vector_size() - self.num_deleted
    }

    /// Element count including soft-deleted slots
    pub fn vector_size(&self) -> usize {
        if self.in_memory { self.data.len() } else { self.persisted_size }
    }

    pub fn sorted_prefix_len(&self) -> usize {
        self.sorted_prefix_len
    }

    pub fn num_deleted(&self) -> usize {
        self.num_deleted
    }

    /// Number of unsorted-tail elements indexed by key
    pub fn hashed_size(&self) -> usize {
        self.hashed_objs.len()
    }

    pub fn in_memory(&self) -> bool {
        self.in_memory
    }

    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    /// Serialised size while resident, zero while evicted; this is the
    /// quantity the memory checker samples
    pub fn byte_size_in_memory(&self) -> usize {
        if self.in_memory { self.byte_size } else { 0 }
    }

    pub(crate) fn mem_gauge(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.mem_gauge)
    }

    pub(crate) fn publish_gauge(&self) {
        self.mem_gauge.store(self.byte_size_in_memory(), Ordering::Relaxed);
    }

    pub(crate) fn objects(&self) -> &[T] {
        &self.data
    }

    pub(crate) fn all_pages_resident(&self) -> bool {
        self.pages.iter().all(|p| p.borrow().is_resident())
    }

    /// Appends an object to the unsorted tail and indexes it by key;
    /// the caller has already grown the page vector and `byte_size`
    pub(crate) fn push_object(&mut self, obj: T) -> usize {
        let idx = self.data.len();
        self.hashed_objs.insert(obj.key().clone(), idx);
        self.data.push(obj);
        self.del_bitmap.push(false);
        idx
    }

    /// Index of the object with the given key: binary search over the sorted
    /// prefix, then the unsorted-tail index
    pub(crate) fn find_index(&self, key: &T::Key) -> Option<usize> {
        if let Ok(idx) = self.data[..self.sorted_prefix_len].binary_search_by(|obj| obj.key().cmp(key)) {
            return Some(idx);
        }
        if self.sorted_prefix_len < self.data.len() {
            return self.hashed_objs.get(key).copied();
        }
        None
    }

    pub fn is_deleted(&self, idx: usize) -> CoreResult<bool> {
        self.del_bitmap.get(idx).copied().ok_or_else(|| index_out_of_range(idx, self.del_bitmap.len()))
    }

    /// Sets the deletion bit; `num_deleted` moves only on the 0 -> 1 edge.
    /// Returns whether this call deleted the object.
    pub(crate) fn mark_deleted(&mut self, idx: usize) -> CoreResult<bool> {
        let len = self.del_bitmap.len();
        let slot = self.del_bitmap.get_mut(idx).ok_or_else(|| index_out_of_range(idx, len))?;
        if *slot {
            return Ok(false);
        }
        *slot = true;
        self.num_deleted += 1;
        Ok(true)
    }

    /// Index of an object given its address inside the live vector
    ///
    /// Fails with `NotInMemory` when the data has been evicted since the
    /// pointer was obtained: the vector is reallocated on rehydration, so any
    /// stored address is invalid and callers must re-derive it via `find`.
    pub fn index_of(&self, ptr: *const T) -> CoreResult<usize> {
        if !self.in_memory {
            return Err(CoreError::NotInMemory);
        }
        let width = std::mem::size_of::<T>();
        if width == 0 || self.data.is_empty() {
            return Err(index_out_of_range(0, self.data.len()));
        }
        let base = self.data.as_ptr() as usize;
        let addr = ptr as usize;
        if addr < base {
            return Err(address_out_of_range());
        }
        let idx = (addr - base) / width;
        if idx >= self.data.len() {
            return Err(address_out_of_range());
        }
        Ok(idx)
    }

    /// Serialises the whole vector, length prefix included
    pub(crate) fn serialize_objects(&self) -> BinStream {
        let mut bs = BinStream::new();
        bs.push(&self.data);
        bs
    }
}

fn index_out_of_range(idx: usize, len: usize) -> CoreError {
    CoreError::OutOfRange(format!("index {idx} is outside the object list of length {len}"))
}

fn address_out_of_range() -> CoreError {
    CoreError::OutOfRange("address does not point into the object list".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Obj {
        key: i64,
    }

    impl KeyedObject for Obj {
        type Key = i64;

        fn key(&self) -> &i64 {
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

    fn with_objects(keys: &[i64]) -> ObjListData<Obj> {
        let mut data = ObjListData::new();
        for &key in keys {
            data.push_object(Obj { key });
        }
        data
    }

    #[test]
    fn test_push_indexes_the_unsorted_tail() {
        let data = with_objects(&[5, 3, 9]);
        assert_eq!(data.vector_size(), 3);
        assert_eq!(data.hashed_size(), 3);
        assert_eq!(data.find_index(&3), Some(1));
        assert_eq!(data.find_index(&9), Some(2));
        assert_eq!(data.find_index(&7), None);
    }

    #[test]
    fn test_mark_deleted_counts_only_transitions() {
        let mut data = with_objects(&[1, 2, 3]);
        assert!(data.mark_deleted(1).unwrap());
        assert!(!data.mark_deleted(1).unwrap());
        assert_eq!(data.num_deleted(), 1);
        assert_eq!(data.size(), 2);
        assert!(data.is_deleted(1).unwrap());
        assert!(!data.is_deleted(0).unwrap());
        assert!(data.mark_deleted(3).is_err());
    }

    #[test]
    fn test_index_of_does_address_arithmetic() {
        let data = with_objects(&[1, 2, 3]);
        let objects = data.objects();
        assert_eq!(data.index_of(&objects[0]).unwrap(), 0);
        assert_eq!(data.index_of(&objects[2]).unwrap(), 2);

        let stray = Obj { key: 99 };
        assert!(data.index_of(&stray).is_err());
    }

    #[test]
    fn test_index_of_requires_memory_residency() {
        let mut data = with_objects(&[1]);
        let ptr: *const Obj = &data.objects()[0];
        data.in_memory = false;
        assert!(matches!(data.index_of(ptr), Err(CoreError::NotInMemory)));
    }

    #[test]
    fn test_serialize_covers_every_object() {
        let data = with_objects(&[4, 5, 6]);
        let mut bs = data.serialize_objects();
        // length prefix plus three 8-byte keys
        assert_eq!(bs.len(), 8 + 3 * 8);
        let back = bs.pop::<Vec<Obj>>().unwrap();
        assert_eq!(back, vec![Obj { key: 4 }, Obj { key: 5 }, Obj { key: 6 }]);
    }
}
