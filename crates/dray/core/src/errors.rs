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

use dray_common::config::ConfigError;

/// Error types surfaced by the worker core
///
/// The core performs no retries and catches nothing internally; every failure
/// propagates to the caller. A failure in the middle of an eviction is fatal
/// to the running job and may leave the collection in an inconsistent state.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A worker id, element index, or address fell outside its valid set
    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("attribute list '{0}' already exists")]
    DuplicateName(String),

    #[error("attribute list '{0}' does not exist")]
    MissingName(String),

    /// A pointer-derived operation ran against data that has been evicted
    #[error("object list data is not in memory")]
    NotInMemory,

    /// A collection owns more pages than the memory pool can hold at once
    #[error("memory pool holds at most {capacity} pages but {required} are required")]
    PoolExhausted { required: usize, capacity: usize },

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A byte stream could not be decoded back into typed data
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for worker-core operations
pub type CoreResult<T> = std::result::Result<T, CoreError>;
