use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    address_space::Handler,
    error::{ConfigError, StateError},
};

/// A bank-select latch in front of several equally sized RAM/ROM buffers.
///
/// Buffers are allocated when the slot is created and never resized. The
/// selector is a plain index, so switching is a single store and an access
/// either sees the old buffer or the new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankSlot {
    name: String,
    buffers: Vec<Vec<u8>>,
    selected: usize,
    writable: bool,
}

/// Serializable view of a bank slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankState {
    pub name: String,
    pub selected: usize,
    pub buffers: Vec<Vec<u8>>,
}

impl BankSlot {
    /// `count` RAM buffers of `size` bytes, filled with `fill`. Buffer 0 is
    /// selected.
    pub fn ram(name: &str, count: usize, size: usize, fill: u8) -> Result<Self, ConfigError> {
        Self::from_buffers(name, vec![vec![fill; size]; count], true)
    }

    /// Read-only banks (e.g. paged program ROM). Every image must have the
    /// same length.
    pub fn rom(name: &str, images: Vec<Vec<u8>>) -> Result<Self, ConfigError> {
        Self::from_buffers(name, images, false)
    }

    fn from_buffers(
        name: &str,
        buffers: Vec<Vec<u8>>,
        writable: bool,
    ) -> Result<Self, ConfigError> {
        let expected = buffers.first().ok_or(ConfigError::EmptyBank)?.len();
        if expected == 0 {
            return Err(ConfigError::EmptyBank);
        }
        if let Some((index, found)) = buffers
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|&(_, len)| len != expected)
        {
            return Err(ConfigError::BankSizeMismatch {
                expected,
                found,
                index,
            });
        }

        debug!(
            "[BANK] {}: {} buffers of {:#X} bytes",
            name,
            buffers.len(),
            expected
        );
        Ok(Self {
            name: name.to_string(),
            buffers,
            selected: 0,
            writable,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn banks(&self) -> usize {
        self.buffers.len()
    }

    /// Size of every buffer
    pub fn size(&self) -> usize {
        self.buffers[0].len()
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    /// Point the slot at buffer `index`. Like a latch that only decodes as many
    /// bits as there are banks, out-of-range values wrap.
    pub fn select(&mut self, index: usize) {
        let index = index % self.buffers.len();
        if index != self.selected {
            trace!("[BANK] {}: {} -> {}", self.name, self.selected, index);
        }
        self.selected = index;
    }

    pub fn active_buffer(&self) -> &[u8] {
        &self.buffers[self.selected]
    }

    pub fn buffer(&self, index: usize) -> Option<&[u8]> {
        self.buffers.get(index).map(Vec::as_slice)
    }

    /// Preload a buffer, e.g. with a ROM page. Data beyond the buffer is
    /// ignored.
    pub fn load(&mut self, index: usize, data: &[u8]) {
        if let Some(buffer) = self.buffers.get_mut(index) {
            let len = data.len().min(buffer.len());
            buffer[..len].copy_from_slice(&data[..len]);
        }
    }

    pub fn state(&self) -> BankState {
        BankState {
            name: self.name.clone(),
            selected: self.selected,
            buffers: self.buffers.clone(),
        }
    }

    /// Restore selector and contents in place; buffers are overwritten, never
    /// reallocated.
    pub fn restore(&mut self, state: &BankState) -> Result<(), StateError> {
        self.check_state(state)?;
        for (buffer, saved) in self.buffers.iter_mut().zip(&state.buffers) {
            buffer.copy_from_slice(saved);
        }
        self.selected = state.selected;
        Ok(())
    }

    pub fn check_state(&self, state: &BankState) -> Result<(), StateError> {
        if state.buffers.len() != self.buffers.len()
            || state.buffers.iter().any(|b| b.len() != self.size())
        {
            return Err(StateError::BankShape {
                name: self.name.clone(),
            });
        }
        if state.selected >= self.buffers.len() {
            return Err(StateError::SelectorOutOfRange {
                name: self.name.clone(),
                selected: state.selected,
                banks: self.buffers.len(),
            });
        }
        Ok(())
    }
}

impl Handler for BankSlot {
    fn read(&mut self, offset: u16) -> Option<u8> {
        self.buffers[self.selected].get(offset as usize).copied()
    }

    fn write(&mut self, offset: u16, value: u8) {
        if !self.writable {
            trace!("[BANK] {}: write to ROM bank at {:04X}", self.name, offset);
            return;
        }
        if let Some(byte) = self.buffers[self.selected].get_mut(offset as usize) {
            *byte = value;
        }
    }
}
