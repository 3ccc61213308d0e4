use crate::{
    address_space::{AddressSpace, Width},
    port::PortDispatch,
};

/// What an instruction interpreter sees of the board: memory accesses and,
/// for CPUs with a separate I/O space, port accesses.
pub trait CpuBus {
    fn read_byte(&mut self, address: u16) -> u8;
    fn write_byte(&mut self, address: u16, value: u8);
    fn port_in(&mut self, port: u16) -> u8;
    fn port_out(&mut self, port: u16, value: u8);

    fn read_word(&mut self, address: u16) -> u16 {
        let low_byte = self.read_byte(address) as u16;
        let high_byte = self.read_byte(address.wrapping_add(1)) as u16;
        (high_byte << 8) | low_byte
    }

    fn write_word(&mut self, address: u16, value: u16) {
        let low_byte = (value & 0x00FF) as u8;
        let high_byte = ((value & 0xFF00) >> 8) as u8;
        self.write_byte(address, low_byte);
        self.write_byte(address.wrapping_add(1), high_byte);
    }
}

/// A board's memory map plus its I/O port gates.
#[derive(Debug)]
pub struct SystemBus {
    pub memory: AddressSpace,
    pub io: PortDispatch,
}

impl SystemBus {
    pub fn new(memory: AddressSpace, io: PortDispatch) -> Self {
        Self { memory, io }
    }

    /// Board with memory-mapped I/O only; port accesses read open bus.
    pub fn memory_only(memory: AddressSpace) -> Self {
        let io = PortDispatch::builder(&format!("{} io", memory.name())).build();
        Self { memory, io }
    }

    pub fn read(&mut self, address: u16, width: Width) -> u16 {
        self.memory.read(address, width)
    }

    pub fn write(&mut self, address: u16, width: Width, value: u16) {
        self.memory.write(address, width, value)
    }
}

impl CpuBus for SystemBus {
    fn read_byte(&mut self, address: u16) -> u8 {
        self.memory.read_byte(address)
    }

    fn write_byte(&mut self, address: u16, value: u8) {
        self.memory.write_byte(address, value)
    }

    fn port_in(&mut self, port: u16) -> u8 {
        self.io.dispatch_read(port)
    }

    fn port_out(&mut self, port: u16, value: u8) {
        self.io.dispatch_write(port, value);
    }

    fn read_word(&mut self, address: u16) -> u16 {
        self.memory.read(address, Width::Word)
    }

    fn write_word(&mut self, address: u16, value: u16) {
        self.memory.write(address, Width::Word, value)
    }
}
