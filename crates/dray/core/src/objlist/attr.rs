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

use std::any::Any;

use crate::errors::{CoreError, CoreResult};
use crate::io::bin_stream::{BinSerialize, BinStream};

/// Type-erased view of an attribute list
///
/// The owning object list drives every structural change through this trait
/// so its satellite arrays stay parallel: sorts reorder them, deletion
/// finalize compacts them, migration moves single attributes through a byte
/// stream.
pub trait AttrListBase {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies the permutation produced by the owning list's sort:
    /// slot `i` receives the attribute previously at `perm[i]`
    fn reorder(&mut self, perm: &[usize]);

    /// Overwrites slot `dst` with the value at `src` (compaction step)
    fn move_attr(&mut self, dst: usize, src: usize);

    /// Grows with the default attribute or shrinks, to the new length
    fn resize(&mut self, new_len: usize);

    /// Serialises the attribute at `idx` into the stream (outgoing object)
    fn migrate(&mut self, bs: &mut BinStream, idx: usize) -> CoreResult<()>;

    /// Reads the attribute for `idx` back from the stream (incoming object)
    fn process_bin(&mut self, bs: &mut BinStream, idx: usize) -> CoreResult<()>;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Satellite array parallel to the elements of an object list
pub struct AttrList<A> {
    data: Vec<A>,
    default: A,
}

impl<A: Clone + BinSerialize + 'static> AttrList<A> {
    pub(crate) fn new(len: usize, default: A) -> Self {
        Self {
            data: vec![default.clone(); len],
            default,
        }
    }

    pub fn get(&self, idx: usize) -> CoreResult<&A> {
        self.data.get(idx).ok_or_else(|| index_out_of_range(idx, self.data.len()))
    }

    pub fn set(&mut self, idx: usize, value: A) -> CoreResult<()> {
        let len = self.data.len();
        match self.data.get_mut(idx) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(index_out_of_range(idx, len)),
        }
    }
}

impl<A: Clone + BinSerialize + 'static> AttrListBase for AttrList<A> {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn reorder(&mut self, perm: &[usize]) {
        self.data = perm.iter().map(|&i| self.data[i].clone()).collect();
    }

    fn move_attr(&mut self, dst: usize, src: usize) {
        self.data[dst] = self.data[src].clone();
    }

    fn resize(&mut self, new_len: usize) {
        self.data.resize(new_len, self.default.clone());
    }

    fn migrate(&mut self, bs: &mut BinStream, idx: usize) -> CoreResult<()> {
        bs.push(self.get(idx)?);
        Ok(())
    }

    fn process_bin(&mut self, bs: &mut BinStream, idx: usize) -> CoreResult<()> {
        let value = bs.pop::<A>()?;
        if idx == self.data.len() {
            self.data.push(value);
            Ok(())
        } else {
            self.set(idx, value)
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn index_out_of_range(idx: usize, len: usize) -> CoreError {
    CoreError::OutOfRange(format!("attribute index {idx} is outside the list of length {len}"))
}
