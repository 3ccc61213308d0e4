use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Handle returned when an event is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
struct Armed<E> {
    id: EventId,
    deadline: u64,
    period: Option<u64>,
    #[derivative(Debug = "ignore")]
    event: E,
}

/// Deadline-ordered one-shot and periodic events in simulated time.
///
/// `E` is whatever the owner wants handed back when an event comes due: a
/// driver's event enum (which keeps pending timers serializable) or a boxed
/// [`Callback`]. Time is measured in CPU cycles and only moves when
/// [`TimerScheduler::pump`] is called, so two runs with the same inputs fire
/// the same events at the same instants.
///
/// Events are ordered by deadline, then by the order they were armed. An event
/// armed from a callback with a later deadline joins the running pump in
/// order. One due at the instant currently firing is held back until that pump
/// returns, so a zero-delay event fires on the next pump instead of re-entering
/// the current one.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct TimerScheduler<E> {
    now: u64,
    next_id: u64,
    next_seq: u64,
    queue: BTreeMap<(u64, u64), Armed<E>>,
    index: HashMap<EventId, (u64, u64)>,
    deferred: Vec<Armed<E>>,
    in_pump: bool,
    firing: Option<EventId>,
    firing_cancelled: bool,
}

impl<E> Default for TimerScheduler<E> {
    fn default() -> Self {
        Self {
            now: 0,
            next_id: 0,
            next_seq: 0,
            queue: BTreeMap::new(),
            index: HashMap::new(),
            deferred: Vec::new(),
            in_pump: false,
            firing: None,
            firing_cancelled: false,
        }
    }
}

impl<E> TimerScheduler<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current scheduler time. While an event is firing this is the event's
    /// deadline, otherwise the `until` of the last pump.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Arm a one-shot event at an absolute time. Deadlines in the past fire on
    /// the next pump.
    pub fn schedule_at(&mut self, deadline: u64, event: E) -> EventId {
        let id = self.allocate_id();
        self.arm(Armed {
            id,
            deadline: deadline.max(self.now),
            period: None,
            event,
        });
        id
    }

    pub fn schedule_after(&mut self, delay: u64, event: E) -> EventId {
        self.schedule_at(self.now.saturating_add(delay), event)
    }

    /// Arm an event that fires every `period` cycles, first at `now + period`.
    /// A zero period fires once per pump.
    pub fn schedule_periodic(&mut self, period: u64, event: E) -> EventId {
        self.schedule_periodic_at(self.now.saturating_add(period), period, event)
    }

    /// Periodic event whose first firing is at `first`, e.g. the start of the
    /// vblank scanline.
    pub fn schedule_periodic_at(&mut self, first: u64, period: u64, event: E) -> EventId {
        let id = self.allocate_id();
        self.arm(Armed {
            id,
            deadline: first.max(self.now),
            period: Some(period),
            event,
        });
        id
    }

    /// Disarm an event. Ids that already fired or were never issued are
    /// ignored.
    pub fn cancel(&mut self, id: EventId) {
        if self.firing == Some(id) {
            debug!("[TIMER] {} cancelled from its own callback", id);
            self.firing_cancelled = true;
            return;
        }

        if let Some(key) = self.index.remove(&id) {
            self.queue.remove(&key);
            debug!("[TIMER] {} cancelled", id);
        } else if let Some(pos) = self.deferred.iter().position(|e| e.id == id) {
            self.deferred.remove(pos);
            debug!("[TIMER] deferred {} cancelled", id);
        } else {
            trace!("[TIMER] cancel of unknown or fired event {}", id);
        }
    }

    pub fn is_pending(&self, id: EventId) -> bool {
        self.index.contains_key(&id) || self.deferred.iter().any(|e| e.id == id)
    }

    pub fn pending(&self) -> usize {
        self.queue.len() + self.deferred.len()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        let queued = self.queue.keys().next().map(|&(deadline, _)| deadline);
        let deferred = self.deferred.iter().map(|e| e.deadline).min();
        match (queued, deferred) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire every event whose deadline is at or before `until`, in deadline
    /// order, and move time to `until`. Returns the number of events fired.
    ///
    /// The handler receives the scheduler so it can arm or cancel events.
    /// Events it arms for the firing instant wait for the next pump.
    pub fn pump<F>(&mut self, until: u64, mut handler: F) -> usize
    where
        F: FnMut(&mut Self, EventId, &mut E),
    {
        let mut fired = 0;
        self.in_pump = true;

        while let Some(mut entry) = self.pop_due(until) {
            self.now = self.now.max(entry.deadline);
            self.firing = Some(entry.id);
            self.firing_cancelled = false;

            trace!("[TIMER] firing {} at {}", entry.id, entry.deadline);
            handler(self, entry.id, &mut entry.event);
            fired += 1;

            self.firing = None;
            if let Some(period) = entry.period {
                if self.firing_cancelled {
                    continue;
                }
                entry.deadline = entry.deadline.saturating_add(period);
                if period == 0 {
                    self.deferred.push(entry);
                } else {
                    self.insert(entry);
                }
            }
        }

        self.in_pump = false;
        self.now = self.now.max(until);
        for entry in std::mem::take(&mut self.deferred) {
            self.insert(entry);
        }
        fired
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.index.clear();
        self.deferred.clear();
    }

    fn allocate_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        id
    }

    fn arm(&mut self, entry: Armed<E>) {
        debug!(
            "[TIMER] arming {} at {} (period {:?})",
            entry.id, entry.deadline, entry.period
        );
        if self.in_pump && entry.deadline <= self.now {
            trace!("[TIMER] {} deferred until the current pump ends", entry.id);
            self.deferred.push(entry);
        } else {
            self.insert(entry);
        }
    }

    fn insert(&mut self, entry: Armed<E>) {
        let key = (entry.deadline, self.next_seq);
        self.next_seq += 1;
        self.index.insert(entry.id, key);
        self.queue.insert(key, entry);
    }

    fn pop_due(&mut self, until: u64) -> Option<Armed<E>> {
        let (&(deadline, _), _) = self.queue.first_key_value()?;
        if deadline > until {
            return None;
        }
        let (_, entry) = self.queue.pop_first()?;
        self.index.remove(&entry.id);
        Some(entry)
    }
}

/// An armed event as stored in a save state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEvent<E> {
    pub id: EventId,
    pub deadline: u64,
    pub period: Option<u64>,
    pub event: E,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState<E> {
    pub now: u64,
    pub next_id: u64,
    pub events: Vec<PendingEvent<E>>,
}

impl<E: Clone> TimerScheduler<E> {
    /// Every un-fired event in firing order.
    pub fn snapshot(&self) -> SchedulerState<E> {
        let events = self
            .queue
            .values()
            .chain(self.deferred.iter())
            .map(|e| PendingEvent {
                id: e.id,
                deadline: e.deadline,
                period: e.period,
                event: e.event.clone(),
            })
            .collect();

        SchedulerState {
            now: self.now,
            next_id: self.next_id,
            events,
        }
    }
}

impl<E> TimerScheduler<E> {
    pub fn restore(state: SchedulerState<E>) -> Self {
        let mut scheduler = Self {
            now: state.now,
            next_id: state.next_id,
            ..Self::default()
        };
        for pending in state.events {
            scheduler.insert(Armed {
                id: pending.id,
                deadline: pending.deadline,
                period: pending.period,
                event: pending.event,
            });
        }
        debug!(
            "[TIMER] restored {} pending events at {}",
            scheduler.pending(),
            scheduler.now
        );
        scheduler
    }
}

/// A boxed closure used as the event payload when callers prefer plain
/// callbacks over an event enum.
pub struct Callback(Box<dyn FnMut(&mut TimerScheduler<Callback>, EventId)>);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut(&mut TimerScheduler<Callback>, EventId) + 'static,
    {
        Self(Box::new(f))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

impl TimerScheduler<Callback> {
    /// Pump, invoking each due callback.
    pub fn run_until(&mut self, until: u64) -> usize {
        self.pump(until, |scheduler, id, callback| (callback.0)(scheduler, id))
    }
}
