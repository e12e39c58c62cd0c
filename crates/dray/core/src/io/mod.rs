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

/// Byte-level I/O for the worker core
///
/// [`bin_stream::BinStream`] is the in-memory serialisation buffer every
/// collection and page speaks; [`disk_store::DiskStore`] moves whole streams
/// between memory and named files.
pub mod bin_stream;
pub mod disk_store;

pub use bin_stream::{BinSerialize, BinStream};
pub use disk_store::DiskStore;
