use std::error::Error as StdError;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use anyhow::{Result, bail};
use tracing::warn;

/// Every port in the range is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortExhausted {
    pub start: u16,
    pub end: u16,
}

impl fmt::Display for PortExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no free ports in range {}-{}", self.start, self.end)
    }
}

impl StdError for PortExhausted {}

/// Fixed range `[start, end]` handed out smallest-first.
pub struct PortAllocator {
    start: u16,
    end: u16,
    occupied: Mutex<Vec<bool>>,
}

impl PortAllocator {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start > end {
            bail!("invalid port range {start}-{end}");
        }
        let size = usize::from(end - start) + 1;
        Ok(Self {
            start,
            end,
            occupied: Mutex::new(vec![false; size]),
        })
    }

    pub fn acquire(&self) -> Result<u16, PortExhausted> {
        let mut occupied = self.occupied.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = occupied
            .iter()
            .position(|taken| !taken)
            .ok_or(PortExhausted {
                start: self.start,
                end: self.end,
            })?;
        occupied[slot] = true;
        // slot < range size, which fits in u16 by construction
        Ok(self.start + slot as u16)
    }

    pub fn release(&self, port: u16) {
        if port < self.start || port > self.end {
            warn!(port, start = self.start, end = self.end, "port_allocator: release outside range ignored");
            return;
        }
        let mut occupied = self.occupied.lock().unwrap_or_else(PoisonError::into_inner);
        occupied[usize::from(port - self.start)] = false;
    }

    pub fn in_use(&self) -> usize {
        self.occupied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|taken| **taken)
            .count()
    }

    pub fn capacity(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }
}
