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

// Page module
// A page is the unit of residency decisions: a fixed-size byte container
// bound to one backing file. While resident it may hold a loaded buffer;
// while non-resident its bytes live only in the file. The only way into
// residency is swap_in, the only way out is swap_out.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::path::Path;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::errors::{CoreError, CoreResult};
use crate::io::bin_stream::BinStream;
use crate::io::disk_store::DiskStore;
use crate::memory::pool::MemoryPool;
use crate::storage::page_store::PageStore;

/// Callback interface a page's owning collection implements
///
/// Invoked by the memory pool right before one of the owner's pages is
/// displaced, while the page is still flagged resident. The owner is expected
/// to write its whole collection across its pages and drop the in-memory
/// vector; repeated invocations for later pages of the same collection must
/// be no-ops.
pub trait PageOwner {
    fn on_page_evicting(&mut self, pool: &mut MemoryPool, store: &mut PageStore) -> CoreResult<()>;
}

/// Shared handle to a page
///
/// The page store, the memory pool cache, and the owning collection all hold
/// the same handle; equality is handle identity.
#[derive(Clone)]
pub struct PageHandle {
    inner: Rc<RefCell<Page>>,
}

impl PageHandle {
    pub fn new(page: Page) -> Self {
        Self {
            inner: Rc::new(RefCell::new(page)),
        }
    }

    pub fn borrow(&self) -> Ref<'_, Page> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Page> {
        self.inner.borrow_mut()
    }

    pub fn key(&self) -> usize {
        self.inner.borrow().key()
    }
}

impl PartialEq for PageHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for PageHandle {}

impl fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(page) => f.debug_struct("PageHandle").field("id", &page.key()).finish(),
            Err(_) => f.debug_struct("PageHandle").field("id", &"<borrowed>").finish(),
        }
    }
}

/// Fixed-size byte container bound to a backing file
pub struct Page {
    id: usize,
    capacity: usize,
    file: DiskStore,
    resident: bool,
    buffer_loaded: bool,
    buffer: BinStream,
    owner: Option<Weak<RefCell<dyn PageOwner>>>,
}

impl Page {
    /// Creates a non-resident page whose backing file is
    /// `<dir>/page-<worker>-<id>`; the file itself appears lazily on the
    /// first flush
    pub(crate) fn new(id: usize, local_tid: usize, capacity: usize, dir: &Path) -> Self {
        Self {
            id,
            capacity,
            file: DiskStore::new(dir.join(format!("page-{local_tid}-{id}"))),
            resident: false,
            buffer_loaded: false,
            buffer: BinStream::new(),
            owner: None,
        }
    }

    /// Stable id, unique within this worker's page store
    pub fn key(&self) -> usize {
        self.id
    }

    /// Fixed byte capacity chosen at construction
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_resident(&self) -> bool {
        self.resident
    }

    pub fn is_buffer_loaded(&self) -> bool {
        self.buffer_loaded
    }

    pub fn file_name(&self) -> &Path {
        self.file.path()
    }

    pub fn set_owner(&mut self, owner: Weak<RefCell<dyn PageOwner>>) {
        self.owner = Some(owner);
    }

    pub fn clear_owner(&mut self) {
        self.owner = None;
    }

    pub(crate) fn owner(&self) -> Option<Rc<RefCell<dyn PageOwner>>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    /// Brings the page into memory, loading the backing file if one exists
    pub fn swap_in(&mut self) -> CoreResult<()> {
        self.resident = true;
        if self.file.exists() {
            self.buffer = self.file.read()?;
        }
        self.buffer_loaded = true;
        trace!(page = self.id, bytes = self.buffer.len(), "page swapped in");
        Ok(())
    }

    /// Takes the page out of memory: persists the buffer if it holds bytes,
    /// then drops it
    ///
    /// The memory pool runs the owner's spill callback before calling this.
    pub fn swap_out(&mut self) -> CoreResult<()> {
        if !self.buffer.is_empty() {
            self.file.write(&self.buffer)?;
        }
        trace!(page = self.id, bytes = self.buffer.len(), "page swapped out");
        self.buffer.clear();
        self.buffer_loaded = false;
        self.resident = false;
        Ok(())
    }

    /// Appends bytes to the in-memory buffer; legal only while resident
    pub fn write(&mut self, bs: &BinStream) -> CoreResult<usize> {
        if !self.resident {
            return Err(not_resident(self.id, "write"));
        }
        self.buffer.append(bs);
        self.buffer_loaded = true;
        Ok(bs.len())
    }

    /// The buffer, reloading it from disk if the page is resident but the
    /// buffer was dropped earlier
    pub fn buffer(&mut self) -> CoreResult<&BinStream> {
        if !self.resident {
            return Err(not_resident(self.id, "read the buffer of"));
        }
        if !self.buffer_loaded {
            if self.file.exists() {
                self.buffer = self.file.read()?;
            }
            self.buffer_loaded = true;
        }
        Ok(&self.buffer)
    }

    pub fn buffer_len(&mut self) -> CoreResult<usize> {
        Ok(self.buffer()?.len())
    }

    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
        self.buffer_loaded = false;
    }

    /// Writes the buffer to the backing file immediately; the buffer stays
    /// loaded. An empty buffer is a no-op.
    pub fn flush(&mut self) -> CoreResult<()> {
        if !self.resident {
            return Err(not_resident(self.id, "flush"));
        }
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.file.write(&self.buffer)
    }

    /// Deletes the backing file; called only by the page store at teardown
    pub(crate) fn finalize(&mut self) -> CoreResult<()> {
        self.file.remove()
    }
}

fn not_resident(id: usize, operation: &str) -> CoreError {
    CoreError::InvariantViolation(format!("page {id} must be resident to {operation} it"))
}
