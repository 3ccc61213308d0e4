use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::{bank::BankSlot, error::ConfigError};

const SPACE_SIZE: usize = 0x10000;
const UNMAPPED: u16 = 0;

/// A peripheral reachable through a mapped range or port.
///
/// Offsets are relative to the start of the range the handler is mapped at,
/// after mirror folding. Returning `None` from `read` means the device does not
/// drive the data bus for that access and the open-bus value is seen instead.
pub trait Handler {
    fn read(&mut self, offset: u16) -> Option<u8> {
        let _ = offset;
        None
    }

    fn write(&mut self, offset: u16, value: u8) {
        trace!("[BUS] write {:02X} to read-only offset {:04X}", value, offset);
    }
}

/// Value seen on reads nobody answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenBus {
    Fixed(u8),
    /// Whatever byte was last driven on the bus by a read or write
    LastDriven,
}

impl Default for OpenBus {
    fn default() -> Self {
        OpenBus::Fixed(0xFF)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Width {
    Byte,
    /// Two byte accesses, low byte first
    Word,
}

/// A decoded address window.
///
/// An address belongs to the range when `address & mirror_mask` falls inside
/// `start..=end`. Clearing bits in the mask makes the hardware ignore those
/// address lines, which produces the mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: u16,
    pub end: u16,
    pub mirror_mask: u16,
}

impl AddressRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            mirror_mask: 0xFFFF,
        }
    }

    /// Ignore the given address lines. `mirror(0x7000)` on `0x8000..=0x83FF`
    /// repeats the range every 0x1000 up to 0xF000.
    pub fn mirror(self, ignored_lines: u16) -> Self {
        Self {
            mirror_mask: self.mirror_mask & !ignored_lines,
            ..self
        }
    }

    pub fn with_mask(self, mirror_mask: u16) -> Self {
        Self {
            mirror_mask,
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start > self.end {
            return Err(ConfigError::InvertedRange {
                start: self.start,
                end: self.end,
            });
        }
        // every line that varies inside start..=end must stay decoded
        let varying = self.start ^ self.end;
        let span = match varying {
            0 => 0,
            v => u16::MAX >> v.leading_zeros(),
        };
        if (self.start | self.end | span) & !self.mirror_mask != 0 {
            return Err(ConfigError::MalformedMirrorMask { range: *self });
        }
        Ok(())
    }

    pub fn canonical(&self, address: u16) -> u16 {
        address & self.mirror_mask
    }

    pub fn contains(&self, address: u16) -> bool {
        let canonical = self.canonical(address);
        canonical >= self.start && canonical <= self.end
    }

    /// Offset from the range base once mirrors are folded away
    pub fn offset_of(&self, address: u16) -> Option<u16> {
        if self.contains(address) {
            Some(self.canonical(address) - self.start)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}-0x{:04X}", self.start, self.end)?;
        if self.mirror_mask != 0xFFFF {
            write!(f, " (mirror mask 0x{:04X})", self.mirror_mask)?;
        }
        Ok(())
    }
}

struct MapEntry {
    range: AddressRange,
    handler: Weak<RefCell<dyn Handler>>,
}

/// Collects a driver's memory map. Nothing can be added once
/// [`AddressSpaceBuilder::build`] has produced the [`AddressSpace`].
pub struct AddressSpaceBuilder {
    name: String,
    entries: Vec<MapEntry>,
    decode: Vec<u16>,
    open_bus: OpenBus,
    banks: Vec<Weak<RefCell<BankSlot>>>,
}

impl AddressSpaceBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
            decode: vec![UNMAPPED; SPACE_SIZE],
            open_bus: OpenBus::default(),
            banks: Vec::new(),
        }
    }

    pub fn open_bus(&mut self, open_bus: OpenBus) -> &mut Self {
        self.open_bus = open_bus;
        self
    }

    /// Map `handler` at `range`. Fails if any address of the range is already
    /// decoded by an earlier registration.
    pub fn register_range<H: Handler + 'static>(
        &mut self,
        range: AddressRange,
        handler: &Rc<RefCell<H>>,
    ) -> Result<&mut Self, ConfigError> {
        let handler: Rc<RefCell<dyn Handler>> = handler.clone();
        self.insert(range, Rc::downgrade(&handler), false)?;
        Ok(self)
    }

    /// Map `handler` at `range`, shadowing earlier registrations for the
    /// addresses both decode. Addresses outside `range` keep their handler.
    pub fn register_override<H: Handler + 'static>(
        &mut self,
        range: AddressRange,
        handler: &Rc<RefCell<H>>,
    ) -> Result<&mut Self, ConfigError> {
        let handler: Rc<RefCell<dyn Handler>> = handler.clone();
        self.insert(range, Rc::downgrade(&handler), true)?;
        Ok(self)
    }

    /// Map a bank slot and track it for save states.
    pub fn register_bank(
        &mut self,
        range: AddressRange,
        bank: &Rc<RefCell<BankSlot>>,
    ) -> Result<&mut Self, ConfigError> {
        let size = bank.borrow().size();
        if size < range.len() {
            return Err(ConfigError::BankTooSmall { range, size });
        }
        self.register_range(range, bank)?;
        self.banks.push(Rc::downgrade(bank));
        Ok(self)
    }

    fn insert(
        &mut self,
        range: AddressRange,
        handler: Weak<RefCell<dyn Handler>>,
        overriding: bool,
    ) -> Result<(), ConfigError> {
        range.validate()?;

        if !overriding {
            if let Some(existing) = (0..SPACE_SIZE)
                .filter(|&a| range.contains(a as u16))
                .map(|a| self.decode[a])
                .find(|&slot| slot != UNMAPPED)
            {
                return Err(ConfigError::OverlappingRange {
                    new: range,
                    existing: self.entries[existing as usize - 1].range,
                });
            }
        }

        self.entries.push(MapEntry { range, handler });
        let slot = self.entries.len() as u16;
        let mut mapped = 0;
        for address in 0..SPACE_SIZE {
            if range.contains(address as u16) {
                self.decode[address] = slot;
                mapped += 1;
            }
        }

        debug!(
            "[BUS] {}: mapped {} ({} addresses{})",
            self.name,
            range,
            mapped,
            if overriding { ", override" } else { "" }
        );
        Ok(())
    }

    pub fn build(self) -> AddressSpace {
        info!(
            "[BUS] {}: {} ranges, {} bank slots",
            self.name,
            self.entries.len(),
            self.banks.len()
        );
        let last_driven = match self.open_bus {
            OpenBus::Fixed(value) => value,
            OpenBus::LastDriven => 0xFF,
        };
        AddressSpace {
            name: self.name,
            entries: self.entries,
            decode: self.decode.into_boxed_slice(),
            open_bus: self.open_bus,
            last_driven,
            banks: self.banks,
        }
    }
}

/// An immutable memory map that routes CPU accesses to handlers.
pub struct AddressSpace {
    name: String,
    entries: Vec<MapEntry>,
    decode: Box<[u16]>,
    open_bus: OpenBus,
    last_driven: u8,
    banks: Vec<Weak<RefCell<BankSlot>>>,
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("name", &self.name)
            .field("ranges", &self.ranges().collect::<Vec<_>>())
            .field("open_bus", &self.open_bus)
            .finish()
    }
}

impl AddressSpace {
    pub fn builder(name: &str) -> AddressSpaceBuilder {
        AddressSpaceBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read(&mut self, address: u16, width: Width) -> u16 {
        match width {
            Width::Byte => self.read_byte(address) as u16,
            Width::Word => {
                let low = self.read_byte(address) as u16;
                let high = self.read_byte(address.wrapping_add(1)) as u16;
                (high << 8) | low
            }
        }
    }

    pub fn write(&mut self, address: u16, width: Width, value: u16) {
        match width {
            Width::Byte => self.write_byte(address, value as u8),
            Width::Word => {
                self.write_byte(address, (value & 0x00FF) as u8);
                self.write_byte(address.wrapping_add(1), (value >> 8) as u8);
            }
        }
    }

    pub fn read_byte(&mut self, address: u16) -> u8 {
        let driven = self
            .lookup(address)
            .and_then(|(handler, offset)| handler.borrow_mut().read(offset));

        match driven {
            Some(value) => {
                self.last_driven = value;
                value
            }
            None => {
                let value = self.open_bus_value();
                trace!(
                    "[BUS] {}: open bus read {:04X} = {:02X}",
                    self.name,
                    address,
                    value
                );
                value
            }
        }
    }

    pub fn write_byte(&mut self, address: u16, value: u8) {
        self.last_driven = value;
        match self.lookup(address) {
            Some((handler, offset)) => handler.borrow_mut().write(offset, value),
            None => trace!(
                "[BUS] {}: dropped write {:04X} <- {:02X}",
                self.name,
                address,
                value
            ),
        }
    }

    pub fn open_bus_value(&self) -> u8 {
        match self.open_bus {
            OpenBus::Fixed(value) => value,
            OpenBus::LastDriven => self.last_driven,
        }
    }

    /// The range decoding `address` and the offset a handler would see.
    pub fn resolve(&self, address: u16) -> Option<(AddressRange, u16)> {
        let entry = self.entry(address)?;
        Some((entry.range, entry.range.offset_of(address)?))
    }

    pub fn ranges(&self) -> impl Iterator<Item = &AddressRange> {
        self.entries.iter().map(|entry| &entry.range)
    }

    /// Bank slots mapped with [`AddressSpaceBuilder::register_bank`], in
    /// registration order. Slots whose owner has been dropped are skipped.
    pub fn banks(&self) -> Vec<Rc<RefCell<BankSlot>>> {
        self.banks.iter().filter_map(Weak::upgrade).collect()
    }

    fn entry(&self, address: u16) -> Option<&MapEntry> {
        match self.decode[address as usize] {
            UNMAPPED => None,
            slot => self.entries.get(slot as usize - 1),
        }
    }

    fn lookup(&self, address: u16) -> Option<(Rc<RefCell<dyn Handler>>, u16)> {
        let entry = self.entry(address)?;
        let offset = entry.range.offset_of(address)?;
        match entry.handler.upgrade() {
            Some(handler) => Some((handler, offset)),
            None => {
                warn!(
                    "[BUS] {}: handler for {} was dropped, treating {:04X} as unmapped",
                    self.name, entry.range, address
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Ram;

    #[test]
    fn test_mirrored_range_folds_to_same_buffer() {
        let vram = Rc::new(RefCell::new(Ram::new(0x400, 0x00)));
        let mut builder = AddressSpace::builder("main");
        builder
            .register_range(AddressRange::new(0x8000, 0x83FF).mirror(0x7000), &vram)
            .unwrap();
        let mut space = builder.build();

        space.write_byte(0x9200, 0x5A);
        assert_eq!(space.read_byte(0x8200), 0x5A);
        assert_eq!(vram.borrow().data()[0x200], 0x5A);

        assert_eq!(space.resolve(0xF3FF).map(|(_, o)| o), Some(0x3FF));
        assert_eq!(space.resolve(0x8400), None);
        assert_eq!(space.resolve(0x7200), None);
    }

    #[test]
    fn test_overlap_is_rejected() {
        let a = Rc::new(RefCell::new(Ram::new(0x400, 0)));
        let b = Rc::new(RefCell::new(Ram::new(0x100, 0)));
        let mut builder = AddressSpace::builder("main");
        builder
            .register_range(AddressRange::new(0x8000, 0x83FF).mirror(0x7000), &a)
            .unwrap();

        let err = builder
            .register_range(AddressRange::new(0xA100, 0xA1FF), &b)
            .err();
        assert_eq!(
            err,
            Some(ConfigError::OverlappingRange {
                new: AddressRange::new(0xA100, 0xA1FF),
                existing: AddressRange::new(0x8000, 0x83FF).mirror(0x7000),
            })
        );

        // the hole between mirrors is free
        assert!(builder
            .register_range(AddressRange::new(0xA400, 0xA4FF), &b)
            .is_ok());
    }

    #[test]
    fn test_override_shadows_sub_range_only() {
        let generic = Rc::new(RefCell::new(Ram::new(0x1000, 0x11)));
        let special = Rc::new(RefCell::new(Ram::new(0x10, 0x22)));
        let mut builder = AddressSpace::builder("main");
        builder
            .register_range(AddressRange::new(0x4000, 0x4FFF), &generic)
            .unwrap()
            .register_override(AddressRange::new(0x4800, 0x480F), &special)
            .unwrap();
        let mut space = builder.build();

        assert_eq!(space.read_byte(0x47FF), 0x11);
        assert_eq!(space.read_byte(0x4800), 0x22);
        assert_eq!(space.read_byte(0x480F), 0x22);
        assert_eq!(space.read_byte(0x4810), 0x11);
    }

    #[test]
    fn test_malformed_ranges() {
        let ram = Rc::new(RefCell::new(Ram::new(0x100, 0)));
        let mut builder = AddressSpace::builder("main");

        let range = AddressRange::new(0x9000, 0x90FF).mirror(0x1000);
        assert_eq!(
            builder.register_range(range, &ram).err(),
            Some(ConfigError::MalformedMirrorMask { range })
        );
        // ignoring a line inside the range folds it onto itself
        let range = AddressRange::new(0x8001, 0x8200).mirror(0x0100);
        assert_eq!(
            builder.register_range(range, &ram).err(),
            Some(ConfigError::MalformedMirrorMask { range })
        );
        assert!(AddressRange::new(0x8000, 0x80FF)
            .mirror(0x0100)
            .validate()
            .is_ok());

        assert_eq!(
            builder
                .register_range(AddressRange::new(0x2000, 0x1000), &ram)
                .err(),
            Some(ConfigError::InvertedRange {
                start: 0x2000,
                end: 0x1000
            })
        );
    }

    #[test]
    fn test_open_bus() {
        let ram = Rc::new(RefCell::new(Ram::new(0x100, 0x42)));
        let mut builder = AddressSpace::builder("main");
        builder.register_range(AddressRange::new(0, 0xFF), &ram).unwrap();
        let mut space = builder.build();
        assert_eq!(space.read_byte(0x1234), 0xFF);
        space.write_byte(0x1234, 0x99);
        assert_eq!(space.read_byte(0x1234), 0xFF);

        let mut builder = AddressSpace::builder("main");
        builder
            .open_bus(OpenBus::LastDriven)
            .register_range(AddressRange::new(0, 0xFF), &ram)
            .unwrap();
        let mut space = builder.build();
        assert_eq!(space.read_byte(0x0010), 0x42);
        assert_eq!(space.read_byte(0x1234), 0x42);
        space.write_byte(0x5555, 0x37);
        assert_eq!(space.read_byte(0x1234), 0x37);
    }

    #[test]
    fn test_dropped_handler_reads_open_bus() {
        let mut builder = AddressSpace::builder("main");
        {
            let ram = Rc::new(RefCell::new(Ram::new(0x100, 0x42)));
            builder.register_range(AddressRange::new(0, 0xFF), &ram).unwrap();
        }
        let mut space = builder.build();
        assert_eq!(space.read_byte(0x0010), 0xFF);
    }

    #[test]
    fn test_word_access_is_little_endian() {
        let ram = Rc::new(RefCell::new(Ram::new(0x100, 0)));
        let mut builder = AddressSpace::builder("main");
        builder.register_range(AddressRange::new(0, 0xFF), &ram).unwrap();
        let mut space = builder.build();

        space.write(0x10, Width::Word, 0xBEEF);
        assert_eq!(space.read(0x10, Width::Byte), 0xEF);
        assert_eq!(space.read(0x11, Width::Byte), 0xBE);
        assert_eq!(space.read(0x10, Width::Word), 0xBEEF);

        // straddles into open bus
        assert_eq!(space.read(0xFF, Width::Word), 0xFF00);
    }
}
