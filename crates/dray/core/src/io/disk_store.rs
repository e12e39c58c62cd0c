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

use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::errors::CoreResult;
use crate::io::bin_stream::BinStream;

/// Named-file byte container
///
/// Writes replace the whole file through a rename so a crashed writer never
/// leaves a half-written page image behind. Content is the raw byte image of
/// a [`BinStream`]: no header, no checksum.
#[derive(Debug, Clone)]
pub struct DiskStore {
    path: PathBuf,
}

impl DiskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Persists the unconsumed bytes of the stream, replacing any previous content
    pub fn write(&self, bs: &BinStream) -> CoreResult<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bs.as_slice())?;
        fs::rename(&tmp, &self.path)?;
        trace!(path = %self.path.display(), bytes = bs.len(), "wrote byte image");
        Ok(())
    }

    /// Reads the whole file back as a stream
    pub fn read(&self) -> CoreResult<BinStream> {
        let raw = fs::read(&self.path)?;
        trace!(path = %self.path.display(), bytes = raw.len(), "read byte image");
        Ok(BinStream::from_vec(raw))
    }

    /// Deletes the backing file; missing files are not an error
    pub fn remove(&self) -> CoreResult<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("image"));

        let mut bs = BinStream::new();
        bs.push(&vec![1u64, 2, 3]);
        store.write(&bs).unwrap();

        let mut back = store.read().unwrap();
        assert_eq!(back.pop::<Vec<u64>>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_write_replaces_previous_content() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("image"));

        let mut long = BinStream::new();
        long.write_raw(&[0xAA; 64]);
        store.write(&long).unwrap();

        let mut short = BinStream::new();
        short.write_raw(&[0xBB; 8]);
        store.write(&short).unwrap();

        assert_eq!(store.read().unwrap().as_slice(), &[0xBB; 8]);
    }

    #[test]
    fn test_read_missing_file_fails() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("absent"));
        assert!(!store.exists());
        assert!(store.read().is_err());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("image"));
        store.write(&BinStream::from_vec(vec![1])).unwrap();
        assert!(store.exists());
        store.remove().unwrap();
        store.remove().unwrap();
        assert!(!store.exists());
    }
}
