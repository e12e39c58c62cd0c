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

// End-to-end spill scenarios: several collections overflow one worker's
// budget, spill wholesale, and transparently come back on access.

use std::time::Duration;

use dray_common::config::CoreConfig;
use dray_core::WorkerContext;
use dray_core::errors::CoreResult;
use dray_core::io::bin_stream::{BinSerialize, BinStream};
use dray_core::memory::MemoryChecker;
use dray_core::objlist::{KeyedObject, ObjList, ObjListStore};
use tempfile::tempdir;

#[derive(Debug, Clone, PartialEq)]
struct Obj {
    key: i64,
}

impl Obj {
    fn new(key: i64) -> Self {
        Self { key }
    }
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

// serialised size of one Obj
const OBJ_BYTES: usize = 8;

fn worker_context(max_thread_mem: usize, page_size: usize, dir: &std::path::Path) -> WorkerContext {
    let config = CoreConfig {
        maximum_thread_memory: max_thread_mem,
        page_size,
        num_local_workers: 1,
        page_dir: dir.to_path_buf(),
    };
    WorkerContext::new(config, 0).unwrap()
}

#[test]
fn three_lists_overflow_one_worker_budget() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let max_thread_mem = 4 * 1024 * 1024;
    let page_size = 512 * 1024;
    let dir = tempdir().unwrap();
    let mut ctx = worker_context(max_thread_mem, page_size, dir.path());
    assert_eq!(ctx.mem_pool.capacity(), max_thread_mem / page_size);

    // one object short of an exact page multiple, so the serialised image
    // (length prefix included) of a full list still fits its pages
    let len = (max_thread_mem / OBJ_BYTES - 1) as i64;
    let del_len = 131_072i64;

    let mut registry = ObjListStore::new();
    let list1: ObjList<Obj> = registry.create_objlist(&mut ctx);
    let list2: ObjList<Obj> = registry.create_objlist(&mut ctx);
    let list3: ObjList<Obj> = registry.create_objlist(&mut ctx);

    let checker = MemoryChecker::new(ctx.config());
    for list in [&list1, &list2, &list3] {
        checker.add_objlist_on_thread(0, list.id(), list.mem_gauge()).unwrap();
    }

    for i in 0..len {
        list1.add_object(&mut ctx, Obj::new(i)).unwrap();
    }
    assert!(list1.in_memory());
    assert_eq!(list1.byte_size_in_memory(), len as usize * OBJ_BYTES);
    assert_eq!(checker.memory_usage_on_thread(0).unwrap(), len as usize * OBJ_BYTES);

    for key in 0..del_len {
        list1.delete_object_by_key(&mut ctx, &key).unwrap();
    }
    assert_eq!(list1.size(), (len - del_len) as usize);

    // filling the second list displaces the first one wholesale
    for i in 0..len - 1 {
        list2.add_object(&mut ctx, Obj::new(i)).unwrap();
    }
    assert!(!list1.in_memory());
    assert_eq!(list1.size(), (len - del_len) as usize);

    // and the third displaces the second
    for i in 0..len - 2 {
        list3.add_object(&mut ctx, Obj::new(i)).unwrap();
    }
    assert!(!list1.in_memory());
    assert!(!list2.in_memory());
    assert!(list3.in_memory());

    // evicted lists report zero resident bytes; the checker sees only list3
    assert_eq!(list1.byte_size_in_memory(), 0);
    assert_eq!(checker.memory_usage_on_thread(0).unwrap(), list3.byte_size_in_memory());

    // reads rehydrate transparently; the spill compacted and sorted, so the
    // smallest surviving key sits at index 0
    {
        let found = list1.find(&mut ctx, &del_len).unwrap().expect("surviving key must be found");
        assert_eq!(found.key, del_len);
        let ptr: *const Obj = &*found;
        drop(found);
        assert_eq!(list1.index_of(ptr).unwrap(), 0);
    }
    assert!(list1.in_memory());
    assert_eq!(list1.size(), (len - del_len) as usize);
    assert_eq!(list2.size(), (len - 1) as usize);

    // deletes keep working after the round trip
    list1.delete_object_by_key(&mut ctx, &del_len).unwrap();
    assert_eq!(list1.num_deleted(), 1);
    list1.deletion_finalize(&mut ctx).unwrap();
    assert_eq!(list1.num_deleted(), 0);
    assert_eq!(list1.size(), (len - del_len - 1) as usize);
}

#[test]
fn dropped_list_pages_are_recycled() {
    let max_thread_mem = 1024 * 1024;
    let page_size = 128 * 1024;
    let dir = tempdir().unwrap();
    let mut ctx = worker_context(max_thread_mem, page_size, dir.path());

    let mut registry = ObjListStore::new();
    let list: ObjList<Obj> = registry.create_objlist(&mut ctx);
    let len = (max_thread_mem / OBJ_BYTES - 1) as i64;
    for i in 0..len {
        list.add_object(&mut ctx, Obj::new(i)).unwrap();
    }
    let pages_before = ctx.page_store.num_pages();
    assert!(pages_before > 0);

    registry.drop_objlist(&mut ctx.page_store, list.id()).unwrap();
    assert_eq!(ctx.page_store.num_free_pages(), pages_before);

    // a successor list reuses the released pages instead of growing the store
    let successor: ObjList<Obj> = registry.create_objlist(&mut ctx);
    for i in 0..len / 2 {
        successor.add_object(&mut ctx, Obj::new(i)).unwrap();
    }
    assert_eq!(ctx.page_store.num_pages(), pages_before);
}

#[test]
fn spill_and_rehydrate_round_trip_preserves_objects() {
    let max_thread_mem = 8 * 1024;
    let page_size = 1024;
    let dir = tempdir().unwrap();
    let mut ctx = worker_context(max_thread_mem, page_size, dir.path());

    let list: ObjList<Obj> = ObjList::new(&mut ctx);
    let len = 255i64;
    for i in 0..len {
        list.add_object(&mut ctx, Obj::new(i)).unwrap();
    }
    assert!(list.in_memory());

    // force the pool to reclaim space: the victim page takes the whole
    // collection with it
    let freed = ctx.mem_pool.request_space(&mut ctx.page_store, 1).unwrap();
    assert_eq!(freed, page_size);
    assert!(!list.in_memory());

    for i in 0..len {
        let obj = list.get(&mut ctx, i as usize).unwrap();
        assert_eq!(obj.key, i);
    }
    assert!(list.in_memory());
    assert_eq!(list.size(), len as usize);
}

#[test]
fn rehydration_fails_when_the_pool_is_too_small() {
    let max_thread_mem = 2 * 1024;
    let page_size = 1024;
    let dir = tempdir().unwrap();
    let mut ctx = worker_context(max_thread_mem, page_size, dir.path());

    // three pages of data against a two-page pool
    let list: ObjList<Obj> = ObjList::new(&mut ctx);
    for i in 0..383 {
        list.add_object(&mut ctx, Obj::new(i)).unwrap();
    }
    assert_eq!(list.num_pages(), 3);

    ctx.mem_pool.request_space(&mut ctx.page_store, 1).unwrap();
    assert!(!list.in_memory());

    let err = list.find(&mut ctx, &0).unwrap_err();
    assert!(matches!(err, dray_core::CoreError::PoolExhausted { required: 3, capacity: 2 }));
}

#[test]
fn background_sampler_tracks_spills() {
    let max_thread_mem = 8 * 1024;
    let page_size = 1024;
    let dir = tempdir().unwrap();
    let mut ctx = worker_context(max_thread_mem, page_size, dir.path());

    let list: ObjList<Obj> = ObjList::new(&mut ctx);
    let mut checker = MemoryChecker::with_interval(ctx.config(), Duration::from_millis(5));
    checker.add_objlist_on_thread(0, list.id(), list.mem_gauge()).unwrap();
    checker.serve();

    for i in 0..256 {
        list.add_object(&mut ctx, Obj::new(i)).unwrap();
    }
    let expected = list.byte_size_in_memory();
    assert!(expected > 0);

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while checker.mem_info()[0] != expected {
        assert!(std::time::Instant::now() < deadline, "sampler never saw the resident bytes");
        std::thread::sleep(Duration::from_millis(5));
    }

    ctx.mem_pool.request_space(&mut ctx.page_store, max_thread_mem).unwrap();
    assert!(!list.in_memory());
    while checker.mem_info()[0] != 0 {
        assert!(std::time::Instant::now() < deadline, "sampler never saw the spill");
        std::thread::sleep(Duration::from_millis(5));
    }
    checker.stop();
}
