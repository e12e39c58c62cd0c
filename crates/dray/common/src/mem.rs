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

// Host memory probes used by deployment code to size per-worker budgets.

use sysinfo::{System, SystemExt};

/// Total physical memory of the host in bytes
pub fn total_physical_memory() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.total_memory()
}

/// Total virtual memory of the host in bytes (physical plus swap)
pub fn total_virtual_memory() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.total_memory() + system.total_swap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_memory_is_nonzero() {
        assert!(total_physical_memory() > 0);
    }

    #[test]
    fn test_virtual_memory_covers_physical() {
        assert!(total_virtual_memory() >= total_physical_memory());
    }
}
