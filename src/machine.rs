use std::rc::Rc;

use crate::{
    bus::{CpuBus, SystemBus},
    clock::RasterClock,
    error::StateError,
    scheduler::{EventId, TimerScheduler},
    state::MachineState,
};

/// The instruction interpreter. Cores live outside this crate; all they need
/// is a bus and a way to have interrupt lines driven.
pub trait Cpu {
    /// Execute one instruction and return the cycles it took.
    fn step(&mut self, bus: &mut dyn CpuBus) -> u32;

    fn assert_irq(&mut self, vector: u8);

    fn clear_irq(&mut self);

    fn pulse_nmi(&mut self) {}
}

/// What a driver's timer handler can reach while an event fires.
pub struct TimerContext<'a, E> {
    pub id: EventId,
    pub scheduler: &'a mut TimerScheduler<E>,
    pub cpu: &'a mut dyn Cpu,
    pub clock: &'a RasterClock,
}

impl<E> TimerContext<'_, E> {
    /// Deadline of the firing event
    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }
}

/// Board-specific glue: owns the peripherals it mapped into the bus and
/// reacts to its own timer events.
pub trait Driver {
    type Event;
    /// Driver-owned peripheral state carried in save states (coin pulses,
    /// latches). Boards with nothing to save use `()`.
    type State;

    fn name(&self) -> &str;

    /// Arm the board's recurring events (vblank interrupt, frame render)
    /// before the first instruction runs.
    fn start(&mut self, scheduler: &mut TimerScheduler<Self::Event>, clock: &RasterClock) {
        let _ = (scheduler, clock);
    }

    fn on_timer(&mut self, event: &mut Self::Event, ctx: &mut TimerContext<'_, Self::Event>);

    fn save_state(&self) -> Self::State;

    /// Called after the core has checked the rest of the snapshot. An error
    /// aborts the restore before any bank, timer or clock state changes.
    fn restore_state(&mut self, state: Self::State) -> Result<(), StateError>;
}

/// One emulated session: CPU, bus, raster clock and timers stepped together.
///
/// Each [`Machine::step`] runs one instruction, advances the clock by its
/// cycle count and fires every timer that came due, so timer effects land
/// between instructions and never inside one.
pub struct Machine<C: Cpu, D: Driver> {
    pub cpu: C,
    pub driver: D,
    pub bus: SystemBus,
    pub clock: Rc<RasterClock>,
    pub scheduler: TimerScheduler<D::Event>,
    frame_ready: bool,
    last_frame: u64,
}

impl<C: Cpu, D: Driver> Machine<C, D> {
    pub fn new(cpu: C, mut driver: D, bus: SystemBus, clock: Rc<RasterClock>) -> Self {
        tracing::info!(
            "Initializing {} ({} cycles per frame)",
            driver.name(),
            clock.frame_cycles()
        );
        let mut scheduler = TimerScheduler::new();
        scheduler.pump(clock.now(), |_, _, _| {});
        driver.start(&mut scheduler, &clock);

        Self {
            cpu,
            driver,
            bus,
            last_frame: clock.frame(),
            clock,
            scheduler,
            frame_ready: false,
        }
    }

    pub fn cycles(&self) -> u64 {
        self.clock.now()
    }

    /// Run one instruction and the timers due after it. Returns its cycles.
    pub fn step(&mut self) -> u32 {
        // a step always moves time forward
        let cycles = self.cpu.step(&mut self.bus).max(1);
        let now = self.clock.advance(cycles as u64);
        self.fire_timers(now);

        let frame = self.clock.frame_at(now);
        if frame != self.last_frame {
            self.last_frame = frame;
            self.frame_ready = true;
            tracing::trace!("Frame {} started at {}", frame, now);
        }
        cycles
    }

    /// Step until at least `n` cycles have run. Returns the cycles executed.
    pub fn step_for(&mut self, n: u64) -> u64 {
        let mut cycles_executed = 0;
        while cycles_executed < n {
            cycles_executed += self.step() as u64;
        }
        cycles_executed
    }

    /// Step until the beam reaches the start of the next frame.
    pub fn step_frame(&mut self) -> u64 {
        self.frame_ready = false;
        self.step_for(self.clock.cycles_until_frame_end())
    }

    pub fn is_frame_ready(&self) -> bool {
        self.frame_ready
    }

    pub fn take_frame_ready(&mut self) -> bool {
        std::mem::take(&mut self.frame_ready)
    }

    pub fn frame_progress(&self) -> f64 {
        self.clock.frame_progress()
    }

    pub fn schedule_after(&mut self, delay: u64, event: D::Event) -> EventId {
        self.scheduler.schedule_after(delay, event)
    }

    pub fn schedule_periodic(&mut self, period: u64, event: D::Event) -> EventId {
        self.scheduler.schedule_periodic(period, event)
    }

    pub fn cancel(&mut self, id: EventId) {
        self.scheduler.cancel(id);
    }

    fn fire_timers(&mut self, now: u64) {
        let Self {
            cpu,
            driver,
            clock,
            scheduler,
            ..
        } = self;
        let clock: &RasterClock = clock;

        scheduler.pump(now, |scheduler, id, event| {
            let mut ctx = TimerContext {
                id,
                scheduler,
                cpu: &mut *cpu,
                clock,
            };
            driver.on_timer(event, &mut ctx);
        });
    }

    pub fn save_state(&self) -> MachineState<D::Event, D::State>
    where
        D::Event: Clone,
    {
        MachineState {
            elapsed_cycles: self.clock.now(),
            geometry: *self.clock.geometry(),
            banks: self
                .bus
                .memory
                .banks()
                .iter()
                .map(|bank| bank.borrow().state())
                .collect(),
            timers: self.scheduler.snapshot(),
            driver: self.driver.save_state(),
        }
    }

    /// Put the clock, bank slots, pending timers and driver peripherals back
    /// where a snapshot left them. Nothing changes if the snapshot does not
    /// fit this session.
    pub fn restore_state(
        &mut self,
        state: MachineState<D::Event, D::State>,
    ) -> Result<(), StateError> {
        if state.geometry != *self.clock.geometry() {
            return Err(StateError::ClockGeometry);
        }

        // saved slots pair with mapped slots by registration order
        let banks = self.bus.memory.banks();
        if banks.len() != state.banks.len() {
            return Err(StateError::BankCount {
                expected: banks.len(),
                found: state.banks.len(),
            });
        }
        for (bank, saved) in banks.iter().zip(&state.banks) {
            let bank = bank.borrow();
            if bank.name() != saved.name {
                return Err(StateError::UnknownBank(saved.name.clone()));
            }
            bank.check_state(saved)?;
        }

        self.driver.restore_state(state.driver)?;
        for (bank, saved) in banks.iter().zip(&state.banks) {
            bank.borrow_mut().restore(saved)?;
        }
        self.clock.set_elapsed(state.elapsed_cycles);
        self.scheduler = TimerScheduler::restore(state.timers);
        self.last_frame = self.clock.frame();
        self.frame_ready = false;

        tracing::info!(
            "Restored {} at cycle {} with {} pending timers",
            self.driver.name(),
            state.elapsed_cycles,
            self.scheduler.pending()
        );
        Ok(())
    }
}
