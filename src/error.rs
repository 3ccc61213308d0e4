// Configuration and save-state error types

use thiserror::Error;

use crate::address_space::AddressRange;

/// Errors raised while a driver builds its memory map, port table, raster
/// geometry or bank slots. All of them are fatal at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("range {new} overlaps already registered range {existing}")]
    OverlappingRange {
        new: AddressRange,
        existing: AddressRange,
    },

    #[error("mirror mask of {range} ignores address lines the range itself decodes")]
    MalformedMirrorMask { range: AddressRange },

    #[error("range start {start:#06X} is above its end {end:#06X}")]
    InvertedRange { start: u16, end: u16 },

    #[error("invalid raster geometry: {0}")]
    InvalidGeometry(String),

    #[error("bank slot needs at least one buffer")]
    EmptyBank,

    #[error("bank slot of {size:#X} bytes is smaller than {range}")]
    BankTooSmall { range: AddressRange, size: usize },

    #[error("bank buffer {index} is {found:#X} bytes, expected {expected:#X}")]
    BankSizeMismatch {
        expected: usize,
        found: usize,
        index: usize,
    },
}

/// Errors raised when a save state does not fit the running session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("save state references unknown bank slot {0:?}")]
    UnknownBank(String),

    #[error("save state has {found} bank slots, session has {expected}")]
    BankCount { expected: usize, found: usize },

    #[error("bank slot {name:?} has a different buffer layout than the save state")]
    BankShape { name: String },

    #[error("bank slot {name:?} selects buffer {selected} but only has {banks}")]
    SelectorOutOfRange {
        name: String,
        selected: usize,
        banks: usize,
    },

    #[error("save state was taken with a different raster geometry")]
    ClockGeometry,

    #[error("driver state rejected: {0}")]
    Driver(String),
}
