//! Host port allocation for container ADB endpoints

use crate::error::{RedroidError, Result};
use std::collections::HashSet;
use std::sync::Mutex;

/// Inclusive host port range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start == 0 || start > end {
            return Err(RedroidError::ConfigError(format!(
                "invalid port range {}-{}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 5555,
            end: 5655,
        }
    }
}

/// Hands out free ports from a range
///
/// Ports already bound by existing containers are passed in by the caller.
/// Ports handed out but not yet bound are held in `pending` so concurrent
/// creations never pick the same one.
#[derive(Debug)]
pub struct PortAllocator {
    range: PortRange,
    pending: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Lowest port of the range that is neither in `in_use` nor pending
    pub fn allocate(&self, in_use: &HashSet<u16>) -> Result<u16> {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let port = (self.range.start..=self.range.end)
            .find(|p| !in_use.contains(p) && !pending.contains(p))
            .ok_or(RedroidError::PortRangeExhausted {
                start: self.range.start,
                end: self.range.end,
            })?;
        pending.insert(port);
        Ok(port)
    }

    /// Forget a pending port once its container exists (or creation failed)
    pub fn release(&self, port: u16) {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_range() {
        assert!(PortRange::new(6000, 5000).is_err());
        assert!(PortRange::new(0, 10).is_err());
        assert!(PortRange::new(5555, 5555).is_ok());
    }

    #[test]
    fn test_allocates_lowest_free_port() {
        let allocator = PortAllocator::new(PortRange::new(5555, 5560).unwrap());
        let in_use: HashSet<u16> = [5555, 5556].into_iter().collect();

        assert_eq!(allocator.allocate(&in_use).unwrap(), 5557);
        // 5557 は pending なので次は 5558
        assert_eq!(allocator.allocate(&in_use).unwrap(), 5558);

        allocator.release(5557);
        assert_eq!(allocator.allocate(&in_use).unwrap(), 5557);
    }

    #[test]
    fn test_exhausted_range() {
        let allocator = PortAllocator::new(PortRange::new(5555, 5556).unwrap());
        let in_use: HashSet<u16> = [5555].into_iter().collect();

        allocator.allocate(&in_use).unwrap();
        assert!(matches!(
            allocator.allocate(&in_use),
            Err(RedroidError::PortRangeExhausted {
                start: 5555,
                end: 5556
            })
        ));
    }
}
