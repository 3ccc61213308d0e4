#[cfg(test)]
mod timing_tests {
    use arcadebus::{RasterClock, RasterGeometry};

    const CPU_CYCLES_PER_SCANLINE: u32 = 228;
    const SCANLINES_PER_FRAME: u32 = 262;
    const VBLANK_START_LINE: u32 = 192;

    fn ntsc_clock() -> RasterClock {
        RasterClock::new(RasterGeometry {
            cycles_per_scanline: CPU_CYCLES_PER_SCANLINE,
            scanlines_per_frame: SCANLINES_PER_FRAME,
            hblank_start: 171,
            hblank_end: CPU_CYCLES_PER_SCANLINE,
            vblank_start: VBLANK_START_LINE,
            vblank_end: SCANLINES_PER_FRAME,
        })
        .unwrap()
    }

    #[test]
    fn test_frame_timing() {
        let clock = ntsc_clock();

        // Advance exactly one frame
        let cycles_per_frame = (SCANLINES_PER_FRAME * CPU_CYCLES_PER_SCANLINE) as u64;
        clock.advance(cycles_per_frame);

        // Should be at the start of the next frame
        assert_eq!(clock.scanline(), 0);
        assert_eq!(clock.hpos(), 0);
        assert_eq!(clock.frame(), 1);
        assert!(!clock.is_vblank(clock.now()));
    }

    #[test]
    fn test_vblank_transitions_on_boundaries() {
        let clock = ntsc_clock();
        let vblank_start = (VBLANK_START_LINE * CPU_CYCLES_PER_SCANLINE) as u64;
        let frame_end = (SCANLINES_PER_FRAME * CPU_CYCLES_PER_SCANLINE) as u64;

        assert!(!clock.is_vblank(vblank_start - 1));
        assert!(clock.is_vblank(vblank_start));
        assert!(clock.is_vblank(frame_end - 1));
        assert!(!clock.is_vblank(frame_end));
    }

    #[test]
    fn test_hblank_timing() {
        let clock = ntsc_clock();

        assert!(!clock.is_hblank(170));
        assert!(clock.is_hblank(171));
        assert!(clock.is_hblank(227));

        // next scanline starts outside hblank
        assert!(!clock.is_hblank(228));
        assert_eq!(clock.scanline_at(228), 1);
    }

    #[test]
    fn test_queries_are_pure() {
        let clock = ntsc_clock();
        let samples = [0u64, 1, 227, 228, 43_775, 59_736, 1_000_003, u64::MAX / 3];

        for &time in &samples {
            let first = clock.position_at(time);
            clock.advance(12_345);
            assert_eq!(clock.position_at(time), first);
            assert_eq!(clock.scanline_at(time), first.scanline);
            assert_eq!(clock.hpos_at(time), first.hpos);
        }
    }

    #[test]
    fn test_scanline_bit_as_random_source() {
        let clock = ntsc_clock();

        // bit 6 flips every 64 lines
        let line = |n: u64| n * CPU_CYCLES_PER_SCANLINE as u64;
        assert!(!clock.line_parity_bit(6, line(63)));
        assert!(clock.line_parity_bit(6, line(64)));
        assert!(clock.line_parity_bit(6, line(127)));
        assert!(!clock.line_parity_bit(6, line(128)));
    }

    #[test]
    fn test_frame_boundary_wraps_beam_and_progress() {
        let clock = ntsc_clock();
        let frame = clock.frame_cycles();

        // three frames in, one cycle short of the wrap
        clock.advance(3 * frame - 1);
        let last = clock.position();
        assert_eq!(last.frame, 2);
        assert_eq!(last.scanline, SCANLINES_PER_FRAME - 1);
        assert_eq!(last.hpos, CPU_CYCLES_PER_SCANLINE - 1);
        assert!(last.vblank && last.hblank);
        assert_eq!(clock.cycles_until_frame_end(), 1);

        clock.advance(1);
        let first = clock.position();
        assert_eq!((first.frame, first.scanline, first.hpos), (3, 0, 0));
        assert!(!first.vblank && !first.hblank);
        assert_eq!(clock.frame_progress(), 0.0);
        assert_eq!(clock.cycles_until_frame_end(), frame);

        // the next vblank is measured from the new frame, not the old one
        let vblank = clock.next_scanline_start(VBLANK_START_LINE, clock.now());
        let into_frame =
            clock.frame_fraction(VBLANK_START_LINE as u64, SCANLINES_PER_FRAME as u64);
        assert_eq!(vblank, 3 * frame + into_frame);
        clock.advance(vblank - clock.now());
        let progress = clock.frame_progress();
        let expected = VBLANK_START_LINE as f64 / SCANLINES_PER_FRAME as f64;
        assert!((progress - expected).abs() < 1e-9, "Progress was {}", progress);
        assert!(clock.is_vblank(clock.now()));
    }
}
