//! Shared pipeline state: the trigger guard and the presence flag.
//!
//! Both live in one record behind one mutex. The guard is held as a
//! [`CyclePermit`]; while a permit exists no other recognition cycle can
//! start, and dropping it clears the guard.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// What asked for a recognition cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSource {
    Presence,
    Doorbell,
    VirtualDoorbell,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Presence => f.write_str("presence"),
            TriggerSource::Doorbell => f.write_str("doorbell"),
            TriggerSource::VirtualDoorbell => f.write_str("virtual doorbell"),
        }
    }
}

/// Why a trigger did not start a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuppressReason {
    /// Another cycle holds the guard
    CycleInFlight,
    /// Whitelist store still loading or refreshing
    StoreNotReady,
    /// Visitor is already known to be near
    AlreadyNear,
    /// Shutdown has begun; no new cycles start
    ShuttingDown,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub triggers_suppressed: u64,
}

#[derive(Debug, Default)]
struct StateRecord {
    in_flight: Option<TriggerSource>,
    person_near: bool,
    /// A presence trigger was already reported as suppressed for this visit
    presence_held_back: bool,
    closed: bool,
    stats: PipelineStats,
}

#[derive(Debug, Default)]
pub struct PipelineState {
    record: Mutex<StateRecord>,
    idle: Notify,
}

impl PipelineState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set the guard if it is clear
    pub fn try_acquire(
        self: &Arc<Self>,
        source: TriggerSource,
    ) -> Result<CyclePermit, SuppressReason> {
        let mut record = self.record.lock();
        if record.closed {
            return Err(SuppressReason::ShuttingDown);
        }
        if let Some(holder) = record.in_flight {
            record.stats.triggers_suppressed += 1;
            debug!("{} trigger suppressed, {} cycle in flight", source, holder);
            return Err(SuppressReason::CycleInFlight);
        }

        record.in_flight = Some(source);
        record.stats.cycles_started += 1;
        Ok(CyclePermit {
            state: Arc::clone(self),
            source,
        })
    }

    /// Presence entry: flip to "near" and set the guard in one step.
    /// Fails without touching presence when the guard is held. Suppressions
    /// are not counted here; see [`PipelineState::hold_back_presence`].
    pub fn try_enter_presence(self: &Arc<Self>) -> Result<CyclePermit, SuppressReason> {
        let mut record = self.record.lock();
        if record.closed {
            return Err(SuppressReason::ShuttingDown);
        }
        if record.person_near {
            return Err(SuppressReason::AlreadyNear);
        }
        if let Some(holder) = record.in_flight {
            trace!("Presence trigger suppressed, {} cycle in flight", holder);
            return Err(SuppressReason::CycleInFlight);
        }

        record.person_near = true;
        record.presence_held_back = false;
        record.in_flight = Some(TriggerSource::Presence);
        record.stats.cycles_started += 1;
        Ok(CyclePermit {
            state: Arc::clone(self),
            source: TriggerSource::Presence,
        })
    }

    /// Count a trigger dropped before reaching the guard
    pub fn record_suppressed(&self) {
        self.record.lock().stats.triggers_suppressed += 1;
    }

    /// Note that a presence trigger was suppressed. A visitor standing in
    /// range is re-seen on every poll, so only the first suppression of a
    /// visit is counted. Returns `true` for that first one.
    pub fn hold_back_presence(&self) -> bool {
        let mut record = self.record.lock();
        if record.presence_held_back {
            return false;
        }
        record.presence_held_back = true;
        record.stats.triggers_suppressed += 1;
        true
    }

    /// Refuse every later trigger
    pub fn close(&self) {
        self.record.lock().closed = true;
        debug!("Trigger guard closed");
    }

    pub fn is_closed(&self) -> bool {
        self.record.lock().closed
    }

    /// Resolve once no cycle holds the guard
    pub async fn wait_idle(&self) {
        loop {
            let released = self.idle.notified();
            if self.cycle_in_flight().is_none() {
                return;
            }
            released.await;
        }
    }

    /// Visitor left or reading was invalid. Returns whether they were near.
    pub fn clear_presence(&self) -> bool {
        let mut record = self.record.lock();
        let was_near = record.person_near;
        if was_near {
            trace!("Presence cleared");
        }
        record.person_near = false;
        record.presence_held_back = false;
        was_near
    }

    pub fn person_near(&self) -> bool {
        self.record.lock().person_near
    }

    pub fn cycle_in_flight(&self) -> Option<TriggerSource> {
        self.record.lock().in_flight
    }

    pub fn stats(&self) -> PipelineStats {
        self.record.lock().stats
    }

    fn release(&self, source: TriggerSource) {
        let mut record = self.record.lock();
        debug_assert_eq!(record.in_flight, Some(source));
        record.in_flight = None;
        record.stats.cycles_completed += 1;
        drop(record);
        self.idle.notify_waiters();
        trace!("Trigger guard released by {}", source);
    }
}

/// Proof that the holder owns the trigger guard
#[derive(Debug)]
pub struct CyclePermit {
    state: Arc<PipelineState>,
    source: TriggerSource,
}

impl CyclePermit {
    pub fn source(&self) -> TriggerSource {
        self.source
    }
}

impl Drop for CyclePermit {
    fn drop(&mut self) {
        self.state.release(self.source);
    }
}
