// Undecoded I/O.
//
// Boards without an I/O decoder wire each peripheral's select line straight
// to one address bit, so an access with several bits set talks to several
// devices at once. Every registered entry is checked on every access.

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::address_space::{Handler, OpenBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Read,
    Write,
}

/// Which offsets select an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortSelect {
    /// Selected when `offset & mask != 0`. Never matches offset 0.
    AnyBit(u16),
    /// Selected on one fully decoded offset, including 0.
    Exact(u16),
}

impl PortSelect {
    pub fn matches(&self, offset: u16) -> bool {
        match *self {
            PortSelect::AnyBit(mask) => offset & mask != 0,
            PortSelect::Exact(port) => offset == port,
        }
    }
}

/// Whose value a read returns when several entries are selected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadResolution {
    #[default]
    LastMatch,
    FirstMatch,
}

pub type PortReadFn = Box<dyn FnMut(u16) -> u8>;
pub type PortWriteFn = Box<dyn FnMut(u16, u8)>;

pub enum PortHandler {
    Read(PortReadFn),
    Write(PortWriteFn),
}

impl PortHandler {
    pub fn direction(&self) -> Direction {
        match self {
            PortHandler::Read(_) => Direction::Read,
            PortHandler::Write(_) => Direction::Write,
        }
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct PortEntry {
    pub select: PortSelect,
    pub direction: Direction,
    #[derivative(Debug = "ignore")]
    handler: PortHandler,
}

pub struct PortDispatchBuilder {
    name: String,
    entries: Vec<PortEntry>,
    port_mask: u16,
    open_bus: OpenBus,
    resolution: ReadResolution,
}

impl PortDispatchBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
            port_mask: 0xFFFF,
            open_bus: OpenBus::default(),
            resolution: ReadResolution::default(),
        }
    }

    /// Address lines that reach the gates, e.g. 0xFF when the CPU only
    /// drives the low byte during I/O cycles.
    pub fn port_mask(&mut self, mask: u16) -> &mut Self {
        self.port_mask = mask;
        self
    }

    pub fn open_bus(&mut self, open_bus: OpenBus) -> &mut Self {
        self.open_bus = open_bus;
        self
    }

    pub fn read_resolution(&mut self, resolution: ReadResolution) -> &mut Self {
        self.resolution = resolution;
        self
    }

    /// Add an entry. There is no overlap check; registration order is the
    /// order entries fire in.
    pub fn register(&mut self, select: PortSelect, handler: PortHandler) -> &mut Self {
        let direction = handler.direction();
        debug!("[PORT] {}: {:?} {:?}", self.name, direction, select);
        self.entries.push(PortEntry {
            select,
            direction,
            handler,
        });
        self
    }

    pub fn on_read<F>(&mut self, select: PortSelect, f: F) -> &mut Self
    where
        F: FnMut(u16) -> u8 + 'static,
    {
        self.register(select, PortHandler::Read(Box::new(f)))
    }

    pub fn on_write<F>(&mut self, select: PortSelect, f: F) -> &mut Self
    where
        F: FnMut(u16, u8) + 'static,
    {
        self.register(select, PortHandler::Write(Box::new(f)))
    }

    pub fn build(self) -> PortDispatch {
        info!("[PORT] {}: {} entries", self.name, self.entries.len());
        let last_driven = match self.open_bus {
            OpenBus::Fixed(value) => value,
            OpenBus::LastDriven => 0xFF,
        };
        PortDispatch {
            name: self.name,
            entries: self.entries,
            port_mask: self.port_mask,
            open_bus: self.open_bus,
            resolution: self.resolution,
            last_driven,
        }
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct PortDispatch {
    name: String,
    entries: Vec<PortEntry>,
    port_mask: u16,
    open_bus: OpenBus,
    resolution: ReadResolution,
    last_driven: u8,
}

impl PortDispatch {
    pub fn builder(name: &str) -> PortDispatchBuilder {
        PortDispatchBuilder::new(name)
    }

    pub fn entries(&self) -> &[PortEntry] {
        &self.entries
    }

    /// Hand `value` to every selected write entry, in registration order.
    /// Returns how many fired.
    pub fn dispatch_write(&mut self, offset: u16, value: u8) -> usize {
        let offset = offset & self.port_mask;
        self.last_driven = value;

        let mut fired = 0;
        for entry in self.entries.iter_mut() {
            if let PortHandler::Write(handler) = &mut entry.handler {
                if entry.select.matches(offset) {
                    handler(offset, value);
                    fired += 1;
                }
            }
        }

        if fired == 0 {
            trace!(
                "[PORT] {}: unselected write {:04X} <- {:02X}",
                self.name,
                offset,
                value
            );
        }
        fired
    }

    /// Evaluate every selected read entry and return the winning value, or
    /// the open-bus value when nothing is selected.
    pub fn dispatch_read(&mut self, offset: u16) -> u8 {
        match self.selected_read(offset) {
            Some(value) => value,
            None => {
                trace!("[PORT] {}: unselected read {:04X}", self.name, offset);
                self.open_bus_value()
            }
        }
    }

    pub fn open_bus_value(&self) -> u8 {
        match self.open_bus {
            OpenBus::Fixed(value) => value,
            OpenBus::LastDriven => self.last_driven,
        }
    }

    fn selected_read(&mut self, offset: u16) -> Option<u8> {
        let offset = offset & self.port_mask;
        let resolution = self.resolution;

        let mut result = None;
        for entry in self.entries.iter_mut() {
            if let PortHandler::Read(handler) = &mut entry.handler {
                if entry.select.matches(offset) {
                    let value = handler(offset);
                    result = match (resolution, result) {
                        (ReadResolution::FirstMatch, Some(first)) => Some(first),
                        _ => Some(value),
                    };
                }
            }
        }

        if let Some(value) = result {
            self.last_driven = value;
        }
        result
    }
}

/// Lets an undecoded block be memory mapped; the offset within the range is
/// the value matched against the entries.
impl Handler for PortDispatch {
    fn read(&mut self, offset: u16) -> Option<u8> {
        self.selected_read(offset)
    }

    fn write(&mut self, offset: u16, value: u8) {
        self.dispatch_write(offset, value);
    }
}
