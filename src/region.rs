use std::{fmt, fs::File, io::Read, path::PathBuf};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::address_space::Handler;

/// Plain read/write memory such as work RAM, video RAM or character RAM.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Clone)]
pub struct Ram {
    data: Vec<u8>,
}

impl Ram {
    pub fn new(size: usize, fill: u8) -> Self {
        Ram {
            data: vec![fill; size],
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl Handler for Ram {
    fn read(&mut self, offset: u16) -> Option<u8> {
        self.data.get(offset as usize).copied()
    }

    fn write(&mut self, offset: u16, value: u8) {
        if let Some(byte) = self.data.get_mut(offset as usize) {
            *byte = value;
        }
    }
}

/// Read-only program or data ROM.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Clone)]
pub struct Rom {
    pub rom_path: Option<PathBuf>,
    data: Vec<u8>,
}

impl fmt::Display for Rom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ROM path={:?} size={:#06X}", self.rom_path, self.data.len())
    }
}

impl Rom {
    /// Images shorter than `size` repeat to fill it, the way a smaller chip in
    /// a larger socket shows up on partially decoded address lines.
    pub fn new(image: &[u8], size: usize) -> Self {
        let data = if image.is_empty() {
            vec![0xFF; size]
        } else {
            image.iter().copied().cycle().take(size).collect()
        };

        Rom {
            data,
            rom_path: None,
        }
    }

    pub fn load(rom_path: PathBuf, size: usize) -> anyhow::Result<Self> {
        let mut file = File::open(&rom_path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        let mut rom = Self::new(&buffer, size);
        rom.rom_path = Some(rom_path);

        Ok(rom)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Handler for Rom {
    fn read(&mut self, offset: u16) -> Option<u8> {
        self.data.get(offset as usize).copied()
    }

    fn write(&mut self, offset: u16, _value: u8) {
        trace!("Attempt to write to ROM offset {:#06X}", offset);
    }
}
