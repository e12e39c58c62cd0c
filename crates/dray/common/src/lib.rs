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

//! Shared configuration and host-probing utilities
//!
//! Everything in this crate is consumed by more than one component of the
//! framework: the worker core, the runner, and the command-line tooling all
//! read the same [`config::CoreConfig`], and deployment code sizes worker
//! budgets from the probes in [`mem`].

pub mod config;
pub mod mem;

pub use config::{ConfigError, CoreConfig};
