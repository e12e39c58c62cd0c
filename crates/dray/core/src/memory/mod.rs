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

/// Memory management for the worker core
///
/// This module decides what stays in memory:
/// - A bounded eviction cache with configurable policies
/// - The per-thread memory pool that controls page residency
/// - The cross-thread memory checker that samples per-worker footprints
pub mod cache;
pub mod checker;
pub mod pool;

pub use cache::{EvictionCache, EvictionPolicy};
pub use checker::MemoryChecker;
pub use pool::{MemoryPool, PageRequest};
