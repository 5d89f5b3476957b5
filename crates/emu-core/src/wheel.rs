//! The event wheel — a deterministic per-cycle scheduler.
//!
//! Every timed side effect in the machine goes through one of a small fixed
//! set of slots. A slot holds at most one pending event; scheduling
//! overwrites, cancelling parks the slot at [`NEVER`]. The machine drains
//! due events with [`EventWheel::pop_due`] and dispatches each to its
//! owner, which may re-arm its own slot or others.
//!
//! Ordering contract: events fire in nondecreasing cycle order; when two
//! slots are due at the same cycle the slot declaration order below breaks
//! the tie. During dispatch the wheel's clock reads as the scheduled cycle
//! of the event being serviced, not the wall cycle the machine is advancing
//! towards.

use crate::Cycle;

/// Trigger value of an empty (never-firing) slot.
pub const NEVER: Cycle = Cycle(u64::MAX);

/// Scheduler slots in tie-break order.
///
/// The declaration order doubles as the dispatch order for events due at
/// the same cycle, so it mirrors the chipset's DMA arbitration priority:
/// beam bookkeeping first, then the DMA channels, then the processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum EventSlot {
    Beam = 0,
    Disk,
    Audio0,
    Audio1,
    Audio2,
    Audio3,
    Sprite,
    Bitplane,
    Copper,
    Blitter,
    RasterIrq,
    CiaA,
    CiaB,
    Cpu,
    Secondary,
}

pub(crate) const SLOT_COUNT: usize = 15;

const ALL_SLOTS: [EventSlot; SLOT_COUNT] = [
    EventSlot::Beam,
    EventSlot::Disk,
    EventSlot::Audio0,
    EventSlot::Audio1,
    EventSlot::Audio2,
    EventSlot::Audio3,
    EventSlot::Sprite,
    EventSlot::Bitplane,
    EventSlot::Copper,
    EventSlot::Blitter,
    EventSlot::RasterIrq,
    EventSlot::CiaA,
    EventSlot::CiaB,
    EventSlot::Cpu,
    EventSlot::Secondary,
];

impl EventSlot {
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Audio slot for a channel number (0..=3).
    #[must_use]
    pub const fn audio(channel: u8) -> Self {
        match channel {
            0 => Self::Audio0,
            1 => Self::Audio1,
            2 => Self::Audio2,
            _ => Self::Audio3,
        }
    }
}

/// What a slot should do when its trigger cycle is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventKind {
    #[default]
    None,
    /// Horizontal sync edge.
    Hsync,
    /// End of the current rasterline (beam wraps to h = 0).
    EndOfLine,
    /// Vertical sync edge.
    Vsync,
    /// End of the current frame (beam wraps to (0, 0)).
    EndOfFrame,
    /// Copper regains the bus after a WAIT resolved.
    CopWake,
    /// Copper instruction word fetch.
    CopFetch,
    /// One blitter word step (area or line mode).
    BltStep,
    /// Blit finished; raise the completion interrupt.
    BltDone,
    /// Next disk word passes under the head.
    DskRotate,
    /// Disk auto-sync timeout expired.
    DskAutoSync,
    /// Audio DMA slot for the channel owning this wheel slot.
    AudDma,
    /// Audio period timer elapsed (payload = channel).
    AudSample,
    /// Sprite pointer/data fetch pair (payload = sprite number).
    SprFetch,
    /// Bitplane data fetch (payload = plane number).
    BplFetch,
    /// Beam reached the raster interrupt position.
    RasTrigger,
    /// CIA time-of-day counter tick.
    CiaTod,
    /// CIA timer A underflow.
    CiaTimerA,
    /// CIA timer B underflow.
    CiaTimerB,
    /// CPU may retry a stalled chip-bus access.
    CpuResume,
    /// Inspector refresh point (frame boundary bookkeeping).
    SecInspect,
}

/// One scheduled entry.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub trigger: Cycle,
    pub kind: EventKind,
    pub data: u32,
}

impl Event {
    const EMPTY: Self = Self {
        trigger: NEVER,
        kind: EventKind::None,
        data: 0,
    };
}

/// A due event popped from the wheel, ready for dispatch.
#[derive(Debug, Clone, Copy)]
pub struct PendingEvent {
    pub slot: EventSlot,
    pub kind: EventKind,
    pub data: u32,
    /// The cycle the event was scheduled for (the clock handlers observe).
    pub cycle: Cycle,
}

/// Scheduling contract violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    /// A handler tried to schedule a trigger before the cycle being
    /// dispatched.
    InvalidScheduleOrder {
        slot: EventSlot,
        requested: Cycle,
        clock: Cycle,
    },
}

impl core::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidScheduleOrder {
                slot,
                requested,
                clock,
            } => write!(
                f,
                "slot {slot:?} scheduled into the past (cycle {requested} < clock {clock})"
            ),
        }
    }
}

impl std::error::Error for SchedulerError {}

pub struct EventWheel {
    slots: [Event; SLOT_COUNT],
    /// Cached minimum over all slot triggers.
    next_trigger: Cycle,
    /// Scheduled cycle of the event currently (or last) dispatched.
    clock: Cycle,
    /// Fire count per slot at the current clock cycle. A slot may fire at
    /// most twice at one cycle: the original event plus one same-cycle
    /// chained stage.
    same_cycle_fires: [u8; SLOT_COUNT],
    /// Release-build telemetry for contract violations.
    schedule_faults: u64,
}

impl EventWheel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: [Event::EMPTY; SLOT_COUNT],
            next_trigger: NEVER,
            clock: Cycle::ZERO,
            same_cycle_fires: [0; SLOT_COUNT],
            schedule_faults: 0,
        }
    }

    /// The clock as observed by event handlers: during dispatch this is the
    /// scheduled cycle of the event being serviced.
    #[must_use]
    pub fn clock(&self) -> Cycle {
        self.clock
    }

    /// Cycle of the earliest armed slot, or [`NEVER`] if all slots are idle.
    #[must_use]
    pub fn next_trigger(&self) -> Cycle {
        self.next_trigger
    }

    #[must_use]
    pub fn is_armed(&self, slot: EventSlot) -> bool {
        self.slots[slot.index()].trigger != NEVER
    }

    #[must_use]
    pub fn pending(&self, slot: EventSlot) -> Option<Event> {
        let ev = self.slots[slot.index()];
        (ev.trigger != NEVER).then_some(ev)
    }

    #[must_use]
    pub fn schedule_faults(&self) -> u64 {
        self.schedule_faults
    }

    /// Validate a trigger cycle against the scheduling contract without
    /// arming anything.
    pub fn check_schedule(&self, slot: EventSlot, cycle: Cycle) -> Result<(), SchedulerError> {
        if cycle < self.clock {
            return Err(SchedulerError::InvalidScheduleOrder {
                slot,
                requested: cycle,
                clock: self.clock,
            });
        }
        Ok(())
    }

    /// Arm a slot, overwriting any pending event.
    ///
    /// Scheduling into the past violates the wheel contract: fatal in debug
    /// builds, counted and dropped in release builds.
    pub fn schedule(&mut self, slot: EventSlot, cycle: Cycle, kind: EventKind, data: u32) {
        if let Err(err) = self.check_schedule(slot, cycle) {
            debug_assert!(false, "{err}");
            self.schedule_faults += 1;
            log::warn!("event wheel: {err}");
            return;
        }
        self.slots[slot.index()] = Event {
            trigger: cycle,
            kind,
            data,
        };
        if cycle < self.next_trigger {
            self.next_trigger = cycle;
        }
    }

    /// Arm a slot `delta` cycles after the current clock.
    pub fn schedule_rel(&mut self, slot: EventSlot, delta: u64, kind: EventKind, data: u32) {
        let cycle = self.clock + delta;
        self.schedule(slot, cycle, kind, data);
    }

    /// Park a slot at [`NEVER`].
    pub fn cancel(&mut self, slot: EventSlot) {
        let was_next = self.slots[slot.index()].trigger == self.next_trigger;
        self.slots[slot.index()] = Event::EMPTY;
        if was_next {
            self.recompute_next_trigger();
        }
    }

    fn recompute_next_trigger(&mut self) {
        self.next_trigger = self
            .slots
            .iter()
            .map(|ev| ev.trigger)
            .min()
            .unwrap_or(NEVER);
    }

    /// Pop the next due event at or before `horizon`.
    ///
    /// Returns events in nondecreasing trigger order; equal triggers resolve
    /// in slot declaration order. The popped slot is cleared and the wheel
    /// clock moves to the event's scheduled cycle.
    pub fn pop_due(&mut self, horizon: Cycle) -> Option<PendingEvent> {
        if self.next_trigger > horizon {
            return None;
        }

        // The cache guarantees at least one slot is due; the scan picks the
        // minimum trigger, first slot wins on ties.
        let mut best: Option<EventSlot> = None;
        let mut best_cycle = NEVER;
        for slot in ALL_SLOTS {
            let trigger = self.slots[slot.index()].trigger;
            if trigger < best_cycle {
                best_cycle = trigger;
                best = Some(slot);
            }
        }
        let slot = best?;
        debug_assert!(best_cycle <= horizon);

        if best_cycle > self.clock {
            self.same_cycle_fires = [0; SLOT_COUNT];
        }
        self.same_cycle_fires[slot.index()] += 1;
        if self.same_cycle_fires[slot.index()] > 2 {
            // More than one chained same-cycle stage means a handler is
            // spinning; treat like a past-cycle schedule.
            debug_assert!(
                false,
                "slot {slot:?} fired more than twice at cycle {best_cycle}"
            );
            self.schedule_faults += 1;
            self.slots[slot.index()] = Event::EMPTY;
            self.recompute_next_trigger();
            return self.pop_due(horizon);
        }

        let ev = self.slots[slot.index()];
        self.slots[slot.index()] = Event::EMPTY;
        self.clock = best_cycle;
        self.recompute_next_trigger();

        Some(PendingEvent {
            slot,
            kind: ev.kind,
            data: ev.data,
            cycle: best_cycle,
        })
    }

    /// Move the clock forward to `horizon` once all due events are drained.
    pub fn sync(&mut self, horizon: Cycle) {
        debug_assert!(self.next_trigger > horizon, "sync with events still due");
        if horizon > self.clock {
            self.clock = horizon;
            self.same_cycle_fires = [0; SLOT_COUNT];
        }
    }

    /// Drop every pending event and rewind the clock (hard reset).
    pub fn clear(&mut self) {
        self.restart_at(Cycle::ZERO);
    }

    /// Drop every pending event and continue from an arbitrary cycle
    /// (snapshot restore).
    pub fn restart_at(&mut self, cycle: Cycle) {
        self.slots = [Event::EMPTY; SLOT_COUNT];
        self.next_trigger = NEVER;
        self.clock = cycle;
        self.same_cycle_fires = [0; SLOT_COUNT];
    }
}

impl Default for EventWheel {
    fn default() -> Self {
        Self::new()
    }
}
