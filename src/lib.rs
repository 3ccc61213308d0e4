pub mod address_space;
pub mod bank;
pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod machine;
pub mod peripherals;
pub mod port;
pub mod region;
pub mod scheduler;
pub mod state;

pub use address_space::{
    AddressRange, AddressSpace, AddressSpaceBuilder, Handler, OpenBus, Width,
};
pub use bank::{BankSlot, BankState};
pub use bus::{CpuBus, SystemBus};
pub use clock::{BeamPosition, RasterClock, RasterGeometry};
pub use config::BoardConfig;
pub use error::{ConfigError, StateError};
pub use machine::{Cpu, Driver, Machine, TimerContext};
pub use peripherals::{CoinSlot, InputPort, Latch};
pub use port::{Direction, PortDispatch, PortDispatchBuilder, PortSelect, ReadResolution};
pub use region::{Ram, Rom};
pub use scheduler::{Callback, EventId, TimerScheduler};
pub use state::MachineState;
