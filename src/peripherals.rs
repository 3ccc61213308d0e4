//! Small peripherals most boards share: input ports, command latches and coin
//! mechanisms.

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    address_space::Handler,
    scheduler::{EventId, TimerScheduler},
};

/// An 8-bit input port built from switches and live signals.
///
/// Switch bits are stored as "pressed" = 1. Bound bits are sampled on every
/// read, so a bit tied to the raster clock reflects the beam at the moment of
/// the access.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct InputPort {
    name: String,
    switches: u8,
    active_low: bool,
    #[derivative(Debug = "ignore")]
    bound: Vec<(u8, Box<dyn Fn() -> bool>)>,
}

impl InputPort {
    pub fn new(name: &str, active_low: bool) -> Self {
        Self {
            name: name.to_string(),
            switches: 0,
            active_low,
            bound: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&mut self, bit: u8, pressed: bool) {
        if pressed {
            self.switches |= 1 << bit;
        } else {
            self.switches &= !(1 << bit);
        }
        trace!("[INPUT] {}: bit {} = {}", self.name, bit, pressed);
    }

    pub fn press(&mut self, bit: u8) {
        self.set(bit, true);
    }

    pub fn release(&mut self, bit: u8) {
        self.set(bit, false);
    }

    /// Set the switches selected by `mask` at once (DIP banks).
    pub fn set_switches(&mut self, mask: u8, value: u8) {
        self.switches = (self.switches & !mask) | (value & mask);
    }

    /// Drive `bit` from a live signal such as vblank or a coin status.
    pub fn bind<F>(&mut self, bit: u8, source: F) -> &mut Self
    where
        F: Fn() -> bool + 'static,
    {
        self.bound.push((bit, Box::new(source)));
        self
    }

    pub fn value(&self) -> u8 {
        let value = self
            .bound
            .iter()
            .fold(self.switches, |value, (bit, source)| {
                if source() {
                    value | (1 << bit)
                } else {
                    value & !(1 << bit)
                }
            });

        if self.active_low {
            !value
        } else {
            value
        }
    }
}

impl Handler for InputPort {
    fn read(&mut self, _offset: u16) -> Option<u8> {
        Some(self.value())
    }
}

/// A one-byte command latch between two CPUs (e.g. main CPU to sound CPU).
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct Latch {
    value: u8,
    pending: bool,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, value: u8) {
        self.value = value;
        self.pending = true;
    }

    /// Read as the receiving side does, acknowledging the byte.
    pub fn take(&mut self) -> u8 {
        self.pending = false;
        self.value
    }

    pub fn peek(&self) -> u8 {
        self.value
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

impl Handler for Latch {
    fn read(&mut self, _offset: u16) -> Option<u8> {
        Some(self.take())
    }

    fn write(&mut self, _offset: u16, value: u8) {
        self.set(value);
    }
}

/// Coin switch held active for a fixed simulated time after each insert, no
/// matter how often the game polls it.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoinSlot {
    active: bool,
    coins: u32,
    release: Option<EventId>,
}

impl CoinSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assert the switch. Returns false while a previous pulse is still held.
    pub fn insert(&mut self) -> bool {
        if self.active {
            trace!("[COIN] insert ignored, pulse in flight");
            return false;
        }
        self.active = true;
        self.coins += 1;
        debug!("[COIN] coin {} inserted", self.coins);
        true
    }

    /// Assert the switch and arm `release` to fire after `hold` cycles. The
    /// owner calls [`CoinSlot::clear`] when that event fires.
    pub fn insert_for<E>(
        &mut self,
        scheduler: &mut TimerScheduler<E>,
        hold: u64,
        release: E,
    ) -> Option<EventId> {
        if !self.insert() {
            return None;
        }
        let id = scheduler.schedule_after(hold, release);
        self.release = Some(id);
        Some(id)
    }

    pub fn clear(&mut self) {
        self.active = false;
        self.release = None;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn coins(&self) -> u32 {
        self.coins
    }

    pub fn pending_release(&self) -> Option<EventId> {
        self.release
    }
}
