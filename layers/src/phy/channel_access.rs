//! Channel occupancy state for shared spectrum
//!
//! The coordinator only tracks state and computes the timing decisions; the
//! slot engine performs the transitions and owns the lost-channel timer.

use crate::sim::EventId;
use interfaces::sap::{AccessOutcome, AccessResponse, ChannelAccessManager};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tracing::{debug, info};

/// Idle time after the last DL data symbol above which the channel is released
pub const CHANNEL_RELEASE_GUARD: Duration = Duration::from_micros(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Channel not held, no request outstanding
    None,
    Requested,
    Granted,
    /// Granted, released at the end of the current slot
    ToLose,
}

/// Result of a grant notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantDecision {
    /// Grant shorter than a slot; dropped
    Ignored,
    /// Channel held; the lost timer must fire after `lost_after`
    Granted { slots: u32, lost_after: Duration },
}

#[derive(Debug)]
pub struct ChannelAccessCoordinator {
    status: ChannelStatus,
    lost_timer: Option<EventId>,
}

impl Default for ChannelAccessCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelAccessCoordinator {
    pub fn new() -> Self {
        Self { status: ChannelStatus::None, lost_timer: None }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn is_granted(&self) -> bool {
        self.status == ChannelStatus::Granted
    }

    /// NONE -> REQUESTED. Must happen before the manager is asked.
    pub fn mark_requested(&mut self) {
        debug_assert_eq!(self.status, ChannelStatus::None, "access already requested");
        self.status = ChannelStatus::Requested;
    }

    /// Apply a grant of `time` received `time_to_next_slot` before the next
    /// slot boundary.
    pub fn on_granted(
        &mut self,
        time: Duration,
        slot_period: Duration,
        time_to_next_slot: Duration,
    ) -> GrantDecision {
        if time < slot_period {
            info!("Channel granted for {:?}, less than a slot; ignoring the grant", time);
            self.status = ChannelStatus::None;
            return GrantDecision::Ignored;
        }

        self.status = ChannelStatus::Granted;
        let usable = time.saturating_sub(time_to_next_slot);
        let slots = ((usable.as_nanos() / slot_period.as_nanos()) as u32).max(1);
        let lost_after = (slot_period * slots).saturating_sub(Duration::from_nanos(1));
        info!("Channel granted for {:?}, {} slots, lost in {:?}", time, slots, lost_after);
        GrantDecision::Granted { slots, lost_after }
    }

    /// Access denied or lost: back to NONE
    pub fn on_lost(&mut self) {
        info!("Channel access lost");
        self.status = ChannelStatus::None;
    }

    pub fn set_lost_timer(&mut self, id: EventId) {
        self.lost_timer = Some(id);
    }

    /// Keep or release the channel depending on how long it would stay idle
    /// after the last DL data symbol of the slot.
    pub fn check_or_release(&mut self, slot_period: Duration, last_data_time: Duration) {
        debug_assert_eq!(self.status, ChannelStatus::Granted);
        let idle = slot_period.saturating_sub(last_data_time);
        if idle > CHANNEL_RELEASE_GUARD {
            debug!("{:?} idle after the last DL data, the channel will be released", idle);
            self.status = ChannelStatus::ToLose;
        } else {
            debug!("{:?} idle after the last DL data, keeping the channel", idle);
        }
    }

    /// End of slot: a channel marked TO_LOSE goes back to NONE. Returns the
    /// lost timer to cancel, if any.
    pub fn end_slot(&mut self) -> Option<EventId> {
        if self.status == ChannelStatus::ToLose {
            info!("Release the channel because there is no data to maintain the grant");
            self.status = ChannelStatus::None;
            return self.lost_timer.take();
        }
        None
    }
}

/// Manager for licensed spectrum: every request is granted at once
#[derive(Debug, Clone)]
pub struct AlwaysOnAccessManager {
    grant: Duration,
}

impl AlwaysOnAccessManager {
    pub fn new(grant: Duration) -> Self {
        Self { grant }
    }
}

impl Default for AlwaysOnAccessManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ChannelAccessManager for AlwaysOnAccessManager {
    fn request_access(&mut self) -> AccessResponse {
        AccessResponse::Immediate(AccessOutcome::Granted(self.grant))
    }
}

/// Listen-before-talk approximation: after a random backoff the channel is
/// found busy with probability `busy_probability`, otherwise granted for a
/// maximum channel occupancy time.
#[derive(Debug)]
pub struct ProbabilisticAccessManager {
    rng: StdRng,
    busy_probability: f64,
    max_backoff: Duration,
    occupancy: Duration,
}

impl ProbabilisticAccessManager {
    pub fn new(seed: u64, busy_probability: f64, max_backoff: Duration, occupancy: Duration) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            busy_probability: busy_probability.clamp(0.0, 1.0),
            max_backoff,
            occupancy,
        }
    }
}

impl ChannelAccessManager for ProbabilisticAccessManager {
    fn request_access(&mut self) -> AccessResponse {
        let backoff_ns = self.rng.gen_range(0..=self.max_backoff.as_nanos() as u64);
        let outcome = if self.rng.gen_bool(self.busy_probability) {
            AccessOutcome::Denied
        } else {
            AccessOutcome::Granted(self.occupancy)
        };
        if backoff_ns == 0 {
            AccessResponse::Immediate(outcome)
        } else {
            AccessResponse::Deferred { after: Duration::from_nanos(backoff_ns), outcome }
        }
    }
}
