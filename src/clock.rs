use std::cell::Cell;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Raster timing constants supplied by a driver.
///
/// Horizontal values are in CPU cycles within a scanline, vertical values are
/// scanline numbers within a frame. Blank windows are half-open
/// (`start..end`) and may wrap around the end of the line or frame when
/// `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterGeometry {
    pub cycles_per_scanline: u32,
    pub scanlines_per_frame: u32,
    pub hblank_start: u32,
    pub hblank_end: u32,
    pub vblank_start: u32,
    pub vblank_end: u32,
}

impl RasterGeometry {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycles_per_scanline == 0 || self.scanlines_per_frame == 0 {
            return Err(ConfigError::InvalidGeometry(
                "cycles per scanline and scanlines per frame must be non-zero".into(),
            ));
        }
        check_window(
            "hblank",
            self.hblank_start,
            self.hblank_end,
            self.cycles_per_scanline,
        )?;
        check_window(
            "vblank",
            self.vblank_start,
            self.vblank_end,
            self.scanlines_per_frame,
        )
    }

    pub fn frame_cycles(&self) -> u64 {
        self.cycles_per_scanline as u64 * self.scanlines_per_frame as u64
    }
}

fn check_window(name: &str, start: u32, end: u32, total: u32) -> Result<(), ConfigError> {
    if start >= total || end > total || start == end {
        return Err(ConfigError::InvalidGeometry(format!(
            "{} window {}..{} does not fit in {}",
            name, start, end, total
        )));
    }
    Ok(())
}

fn in_window(value: u32, start: u32, end: u32) -> bool {
    if start <= end {
        value >= start && value < end
    } else {
        value >= start || value < end
    }
}

/// Beam position snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeamPosition {
    pub time: u64,
    pub frame: u64,
    pub scanline: u32,
    pub hpos: u32,
    pub vblank: bool,
    pub hblank: bool,
}

/// Source of truth for where the simulated beam is.
///
/// The only mutable state is the elapsed cycle counter; every raster signal is
/// computed from a time value on demand, so a handler polling the scanline in
/// the middle of an access always agrees with the scheduler. The counter sits
/// in a `Cell` so peripherals can hold an `Rc<RasterClock>` and query it from
/// inside their handlers.
#[derive(Debug, Serialize, Deserialize)]
pub struct RasterClock {
    geometry: RasterGeometry,
    elapsed: Cell<u64>,
}

impl RasterClock {
    pub fn new(geometry: RasterGeometry) -> Result<Self, ConfigError> {
        geometry.validate()?;
        Ok(Self {
            geometry,
            elapsed: Cell::new(0),
        })
    }

    pub fn geometry(&self) -> &RasterGeometry {
        &self.geometry
    }

    /// Total cycles elapsed since the session started
    pub fn now(&self) -> u64 {
        self.elapsed.get()
    }

    /// Advance by the cycle count of one executed instruction, returning the
    /// new time.
    pub fn advance(&self, cycles: u64) -> u64 {
        let now = self.elapsed.get().wrapping_add(cycles);
        self.elapsed.set(now);
        now
    }

    /// Jump to an absolute time (save-state restore).
    pub fn set_elapsed(&self, cycles: u64) {
        self.elapsed.set(cycles);
    }

    pub fn reset(&self) {
        self.elapsed.set(0);
    }

    pub fn frame_cycles(&self) -> u64 {
        self.geometry.frame_cycles()
    }

    /// Cycles spanned by `numerator / denominator` frame periods. A zero
    /// denominator yields zero.
    pub fn frame_fraction(&self, numerator: u64, denominator: u64) -> u64 {
        (self.frame_cycles() * numerator)
            .checked_div(denominator)
            .unwrap_or(0)
    }

    pub fn frames(&self, count: u64) -> u64 {
        self.frame_cycles() * count
    }

    pub fn scanline_at(&self, time: u64) -> u32 {
        ((time / self.geometry.cycles_per_scanline as u64)
            % self.geometry.scanlines_per_frame as u64) as u32
    }

    pub fn hpos_at(&self, time: u64) -> u32 {
        (time % self.geometry.cycles_per_scanline as u64) as u32
    }

    pub fn frame_at(&self, time: u64) -> u64 {
        time / self.frame_cycles()
    }

    pub fn is_hblank(&self, time: u64) -> bool {
        in_window(
            self.hpos_at(time),
            self.geometry.hblank_start,
            self.geometry.hblank_end,
        )
    }

    pub fn is_vblank(&self, time: u64) -> bool {
        in_window(
            self.scanline_at(time),
            self.geometry.vblank_start,
            self.geometry.vblank_end,
        )
    }

    /// Vertical blank outside of horizontal blank.
    pub fn is_composite_blank(&self, time: u64) -> bool {
        self.is_vblank(time) && !self.is_hblank(time)
    }

    /// Either blank window is active.
    pub fn is_blanking(&self, time: u64) -> bool {
        self.is_vblank(time) || self.is_hblank(time)
    }

    /// Bit `bit` of the scanline counter. Games read these as alternating-line
    /// signals or as a cheap random source.
    pub fn line_parity_bit(&self, bit: u32, time: u64) -> bool {
        self.scanline_at(time).checked_shr(bit).unwrap_or(0) & 1 != 0
    }

    pub fn position_at(&self, time: u64) -> BeamPosition {
        BeamPosition {
            time,
            frame: self.frame_at(time),
            scanline: self.scanline_at(time),
            hpos: self.hpos_at(time),
            vblank: self.is_vblank(time),
            hblank: self.is_hblank(time),
        }
    }

    /// Earliest time at or after `after` where scanline `line` begins.
    pub fn next_scanline_start(&self, line: u32, after: u64) -> u64 {
        let line = line % self.geometry.scanlines_per_frame;
        let frame_start = self.frame_at(after) * self.frame_cycles();
        let candidate = frame_start + line as u64 * self.geometry.cycles_per_scanline as u64;
        if candidate < after {
            candidate + self.frame_cycles()
        } else {
            candidate
        }
    }

    pub fn scanline(&self) -> u32 {
        self.scanline_at(self.now())
    }

    pub fn hpos(&self) -> u32 {
        self.hpos_at(self.now())
    }

    pub fn frame(&self) -> u64 {
        self.frame_at(self.now())
    }

    pub fn position(&self) -> BeamPosition {
        self.position_at(self.now())
    }

    pub fn cycles_until_frame_end(&self) -> u64 {
        self.frame_cycles() - self.now() % self.frame_cycles()
    }

    /// Progress through the current frame (0.0 - 1.0)
    pub fn frame_progress(&self) -> f64 {
        (self.now() % self.frame_cycles()) as f64 / self.frame_cycles() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> RasterGeometry {
        RasterGeometry {
            cycles_per_scanline: 228,
            scanlines_per_frame: 262,
            hblank_start: 171,
            hblank_end: 228,
            vblank_start: 192,
            vblank_end: 262,
        }
    }

    #[test]
    fn test_scanline_timing() {
        let clock = RasterClock::new(geometry()).unwrap();

        clock.advance(228);
        assert_eq!(clock.scanline(), 1);
        assert_eq!(clock.hpos(), 0);

        clock.advance(10);
        assert_eq!(clock.scanline(), 1);
        assert_eq!(clock.hpos(), 10);
    }

    #[test]
    fn test_frame_wraps() {
        let clock = RasterClock::new(geometry()).unwrap();
        let frame = clock.frame_cycles();

        assert_eq!(clock.scanline_at(frame), 0);
        assert_eq!(clock.frame_at(frame), 1);
        assert_eq!(clock.scanline_at(frame - 1), 261);
        assert_eq!(clock.hpos_at(frame - 1), 227);
    }

    #[test]
    fn test_wrapping_windows() {
        let clock = RasterClock::new(RasterGeometry {
            cycles_per_scanline: 100,
            scanlines_per_frame: 10,
            hblank_start: 90,
            hblank_end: 5,
            vblank_start: 8,
            vblank_end: 2,
        })
        .unwrap();

        assert!(clock.is_hblank(95));
        assert!(clock.is_hblank(100));
        assert!(clock.is_hblank(104));
        assert!(!clock.is_hblank(105));

        assert!(clock.is_vblank(800));
        assert!(clock.is_vblank(150));
        assert!(!clock.is_vblank(200));
    }

    #[test]
    fn test_composite_blank() {
        let clock = RasterClock::new(geometry()).unwrap();
        let vblank_line = 200 * 228;

        assert!(clock.is_composite_blank(vblank_line));
        assert!(!clock.is_composite_blank(vblank_line + 171));
        assert!(clock.is_blanking(vblank_line + 171));
        assert!(!clock.is_composite_blank(10));
    }

    #[test]
    fn test_line_parity_bit() {
        let clock = RasterClock::new(geometry()).unwrap();

        assert!(!clock.line_parity_bit(0, 0));
        assert!(clock.line_parity_bit(0, 228));
        assert!(clock.line_parity_bit(6, 64 * 228));
        assert!(!clock.line_parity_bit(6, 63 * 228));
        assert!(!clock.line_parity_bit(40, 64 * 228));
    }

    #[test]
    fn test_next_scanline_start() {
        let clock = RasterClock::new(geometry()).unwrap();

        assert_eq!(clock.next_scanline_start(96, 0), 96 * 228);
        assert_eq!(clock.next_scanline_start(96, 96 * 228), 96 * 228);
        assert_eq!(
            clock.next_scanline_start(96, 96 * 228 + 1),
            96 * 228 + clock.frame_cycles()
        );
    }

    #[test]
    fn test_invalid_geometry() {
        let mut bad = geometry();
        bad.vblank_start = 262;
        assert!(matches!(
            RasterClock::new(bad),
            Err(ConfigError::InvalidGeometry(_))
        ));

        let mut bad = geometry();
        bad.cycles_per_scanline = 0;
        assert!(RasterClock::new(bad).is_err());

        let mut bad = geometry();
        bad.hblank_end = bad.hblank_start;
        assert!(RasterClock::new(bad).is_err());
    }

    #[test]
    fn test_frame_fraction() {
        let clock = RasterClock::new(geometry()).unwrap();
        assert_eq!(clock.frame_fraction(1, 2), 228 * 131);
        assert_eq!(clock.frames(4), 4 * 228 * 262);
        assert_eq!(clock.frame_fraction(1, 0), 0);
    }
}
