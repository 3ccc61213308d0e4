use std::{cell::RefCell, rc::Rc};

use arcadebus::{
    Callback, CoinSlot, EventId, RasterClock, RasterGeometry, TimerScheduler,
};

fn clock() -> RasterClock {
    RasterClock::new(RasterGeometry {
        cycles_per_scanline: 128,
        scanlines_per_frame: 260,
        hblank_start: 96,
        hblank_end: 128,
        vblank_start: 224,
        vblank_end: 260,
    })
    .unwrap()
}

#[test]
fn test_out_of_order_registration_fires_by_deadline() {
    let order = Rc::new(RefCell::new(Vec::new()));
    let mut scheduler = TimerScheduler::new();

    for (delay, name) in [(300u64, "d3"), (100, "d1"), (200, "d2")] {
        let order = order.clone();
        scheduler.schedule_after(
            delay,
            Callback::new(move |s, _| order.borrow_mut().push((name, s.now()))),
        );
    }

    assert_eq!(scheduler.run_until(299), 2);
    assert_eq!(scheduler.run_until(300), 1);
    assert_eq!(
        *order.borrow(),
        vec![("d1", 100), ("d2", 200), ("d3", 300)]
    );
}

#[test]
fn test_zero_delay_reschedule_does_not_recurse() {
    let depth = Rc::new(RefCell::new(0u32));
    let mut scheduler = TimerScheduler::new();

    fn rearm(depth: Rc<RefCell<u32>>) -> Callback {
        Callback::new(move |s, _| {
            *depth.borrow_mut() += 1;
            s.schedule_after(0, rearm(depth.clone()));
        })
    }
    scheduler.schedule_after(10, rearm(depth.clone()));

    // each pump fires exactly one link of the chain
    for expected in 1..=5 {
        assert_eq!(scheduler.run_until(10), 1);
        assert_eq!(*depth.borrow(), expected);
    }
    assert_eq!(scheduler.pending(), 1);
}

#[test]
fn test_state_machine() {
    let mut scheduler: TimerScheduler<&str> = TimerScheduler::new();

    let one_shot = scheduler.schedule_after(10, "one-shot");
    let periodic = scheduler.schedule_periodic(10, "periodic");
    let cancelled = scheduler.schedule_after(10, "cancelled");
    scheduler.cancel(cancelled);

    let mut fired = Vec::new();
    scheduler.pump(10, |_, id, _| fired.push(id));
    assert_eq!(fired, vec![one_shot, periodic]);

    // one-shot is terminal, periodic re-armed, cancelled never fires
    assert!(!scheduler.is_pending(one_shot));
    assert!(scheduler.is_pending(periodic));
    assert!(!scheduler.is_pending(cancelled));

    scheduler.cancel(periodic);
    scheduler.cancel(EventId(1234));
    assert_eq!(scheduler.pump(1000, |_, _, _| {}), 0);
}

#[test]
fn test_coin_debounce_holds_for_four_frames() {
    let clock = clock();
    let mut scheduler = TimerScheduler::new();
    let mut coin = CoinSlot::new();
    let frame = clock.frame_cycles();

    // insert somewhere in the middle of a frame
    let step = 4u64;
    clock.advance(1000);
    scheduler.pump(clock.now(), |_, _, _: &mut ()| {});
    let inserted_at = clock.now();
    assert!(coin.insert_for(&mut scheduler, clock.frames(4), ()).is_some());

    let released_at = inserted_at + 4 * frame;
    loop {
        let now = clock.advance(step);
        scheduler.pump(now, |_, _, _| coin.clear());
        if !coin.is_active() {
            assert_eq!(now, released_at);
            break;
        }
        assert!(now < released_at);
        // re-inserting while the pulse is held is ignored
        assert!(!coin.insert());
    }
    assert_eq!(coin.coins(), 1);
}
