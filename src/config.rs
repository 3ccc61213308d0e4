use std::{fs, path::Path, rc::Rc};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    address_space::{AddressSpaceBuilder, OpenBus},
    clock::{RasterClock, RasterGeometry},
    error::ConfigError,
    port::{PortDispatchBuilder, ReadResolution},
};

/// Per-board constants a driver hands to the core. There are no built-in
/// defaults for the raster geometry; every board states its own.
///
/// ```json
/// {
///   "name": "invaders",
///   "cpu_clock_hz": 1996800,
///   "geometry": {
///     "cycles_per_scanline": 128, "scanlines_per_frame": 262,
///     "hblank_start": 96, "hblank_end": 128,
///     "vblank_start": 224, "vblank_end": 262
///   },
///   "open_bus": { "Fixed": 255 },
///   "port_read": "LastMatch"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub name: String,
    pub cpu_clock_hz: u64,
    pub geometry: RasterGeometry,
    #[serde(default)]
    pub open_bus: OpenBus,
    #[serde(default)]
    pub port_read: ReadResolution,
}

impl BoardConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("parsing board config")?;
        config
            .validate()
            .with_context(|| format!("validating board config {:?}", config.name))?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading board config {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpu_clock_hz == 0 {
            return Err(ConfigError::InvalidGeometry(
                "cpu clock must be non-zero".into(),
            ));
        }
        self.geometry.validate()
    }

    pub fn clock(&self) -> Result<Rc<RasterClock>, ConfigError> {
        Ok(Rc::new(RasterClock::new(self.geometry)?))
    }

    pub fn frame_rate(&self) -> f64 {
        self.cpu_clock_hz as f64 / self.geometry.frame_cycles() as f64
    }

    pub fn memory_builder(&self) -> AddressSpaceBuilder {
        let mut builder = AddressSpaceBuilder::new(&self.name);
        builder.open_bus(self.open_bus);
        builder
    }

    pub fn io_builder(&self) -> PortDispatchBuilder {
        let mut builder = PortDispatchBuilder::new(&format!("{} io", self.name));
        builder.open_bus(self.open_bus).read_resolution(self.port_read);
        builder
    }
}
