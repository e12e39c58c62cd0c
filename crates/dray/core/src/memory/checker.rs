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

// Memory checker module
// The one cross-thread component of the core. Worker threads register an
// atomic byte gauge per live object list; a background sampler periodically
// sums the gauges of each worker and stores the totals. Collections stay
// thread-local: only the gauges cross threads.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dray_common::config::CoreConfig;
use parking_lot::Mutex;
use tracing::debug;

use crate::errors::{CoreError, CoreResult};

/// Callback invoked after every sampling pass with the per-worker byte totals
pub type UpdateHandler = Box<dyn Fn(&[usize]) + Send + 'static>;

struct CheckerShared {
    // per worker: object-list id -> resident byte gauge
    gauges: Mutex<Vec<HashMap<usize, Arc<AtomicUsize>>>>,
    usage: Mutex<Vec<usize>>,
    update_handler: Mutex<Option<UpdateHandler>>,
    stop: AtomicBool,
}

impl CheckerShared {
    fn sample(&self) {
        let gauges = self.gauges.lock();
        let mut usage = self.usage.lock();
        for (tid, lists) in gauges.iter().enumerate() {
            usage[tid] = lists.values().map(|g| g.load(Ordering::Relaxed)).sum();
        }
    }
}

/// Background sampler of per-worker object-list memory usage
pub struct MemoryChecker {
    shared: Arc<CheckerShared>,
    sleep_duration: Duration,
    sampler: Option<JoinHandle<()>>,
}

impl MemoryChecker {
    pub fn new(config: &CoreConfig) -> Self {
        Self::with_interval(config, Duration::from_secs(1))
    }

    pub fn with_interval(config: &CoreConfig, sleep_duration: Duration) -> Self {
        let workers = config.num_local_workers;
        Self {
            shared: Arc::new(CheckerShared {
                gauges: Mutex::new(vec![HashMap::new(); workers]),
                usage: Mutex::new(vec![0; workers]),
                update_handler: Mutex::new(None),
                stop: AtomicBool::new(false),
            }),
            sleep_duration,
            sampler: None,
        }
    }

    /// Registers the byte gauge of a live object list on the given worker
    pub fn add_objlist_on_thread(&self, local_tid: usize, list_id: usize, gauge: Arc<AtomicUsize>) -> CoreResult<()> {
        let mut gauges = self.shared.gauges.lock();
        let lists = gauges.get_mut(local_tid).ok_or_else(|| tid_out_of_range(local_tid))?;
        lists.insert(list_id, gauge);
        Ok(())
    }

    pub fn delete_objlist_on_thread(&self, local_tid: usize, list_id: usize) -> CoreResult<()> {
        let mut gauges = self.shared.gauges.lock();
        let lists = gauges.get_mut(local_tid).ok_or_else(|| tid_out_of_range(local_tid))?;
        lists.remove(&list_id);
        Ok(())
    }

    /// Sums the registered gauges of one worker right now, bypassing the sampler
    pub fn memory_usage_on_thread(&self, local_tid: usize) -> CoreResult<usize> {
        let gauges = self.shared.gauges.lock();
        let lists = gauges.get(local_tid).ok_or_else(|| tid_out_of_range(local_tid))?;
        Ok(lists.values().map(|g| g.load(Ordering::Relaxed)).sum())
    }

    /// Last sampled per-worker byte totals
    pub fn mem_info(&self) -> Vec<usize> {
        self.shared.usage.lock().clone()
    }

    pub fn register_update_handler(&self, handler: impl Fn(&[usize]) + Send + 'static) {
        *self.shared.update_handler.lock() = Some(Box::new(handler));
    }

    /// Spawns the background sampler; a second call while one is running is a no-op
    pub fn serve(&mut self) {
        if self.sampler.is_some() {
            return;
        }
        self.shared.stop.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let sleep_duration = self.sleep_duration;
        self.sampler = Some(thread::spawn(move || {
            debug!("memory checker sampler started");
            while !shared.stop.load(Ordering::SeqCst) {
                shared.sample();
                let snapshot = shared.usage.lock().clone();
                if let Some(handler) = shared.update_handler.lock().as_ref() {
                    handler(&snapshot);
                }
                thread::sleep(sleep_duration);
            }
            debug!("memory checker sampler stopped");
        }));
    }

    /// Stops and joins the sampler
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.sampler.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MemoryChecker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tid_out_of_range(local_tid: usize) -> CoreError {
    CoreError::OutOfRange(format!("worker id {local_tid} is not a local worker"))
}
