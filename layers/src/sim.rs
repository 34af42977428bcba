//! Discrete-event scheduler
//!
//! Events are kept in a min-heap ordered by `(time, sequence)`. The sequence
//! number makes events scheduled for the same instant run in the order they
//! were added. Simulated time is a `Duration` since the start of the run.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;
use tracing::{debug, trace};

/// Handle of a scheduled event, usable for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u64);

struct Scheduled<E> {
    time: Duration,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest time, then lowest sequence)
        (other.time, other.seq).cmp(&(self.time, self.seq))
    }
}

pub struct EventQueue<E> {
    heap: BinaryHeap<Scheduled<E>>,
    now: Duration,
    event_sequence: u64,
    pending: HashSet<u64>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            now: Duration::ZERO,
            event_sequence: 0,
            pending: HashSet::new(),
        }
    }

    /// Current simulated time
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Schedule `event` to run `delay` after now
    pub fn schedule(&mut self, delay: Duration, event: E) -> EventId {
        self.schedule_at(self.now + delay, event)
    }

    /// Schedule `event` at absolute time `time`; times in the past run now
    pub fn schedule_at(&mut self, time: Duration, event: E) -> EventId {
        let seq = self.event_sequence;
        self.event_sequence += 1;
        self.heap.push(Scheduled { time: time.max(self.now), seq, event });
        self.pending.insert(seq);
        EventId(seq)
    }

    /// Cancel a pending event. Returns false if it already ran or was cancelled.
    pub fn cancel(&mut self, id: EventId) -> bool {
        self.pending.remove(&id.0)
    }

    pub fn is_pending(&self, id: EventId) -> bool {
        self.pending.contains(&id.0)
    }

    /// Time of the next event that will run
    pub fn peek_time(&mut self) -> Option<Duration> {
        self.discard_cancelled();
        self.heap.peek().map(|s| s.time)
    }

    /// Remove the next event and advance the clock to its time
    pub fn pop(&mut self) -> Option<(Duration, E)> {
        self.discard_cancelled();
        let next = self.heap.pop()?;
        self.pending.remove(&next.seq);
        self.now = next.time;
        Some((next.time, next.event))
    }

    pub fn is_empty(&mut self) -> bool {
        self.peek_time().is_none()
    }

    /// Number of events still to run
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    fn discard_cancelled(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.pending.contains(&top.seq) {
                break;
            }
            self.heap.pop();
        }
    }
}

/// Something that reacts to events of a queue
pub trait EventHandler {
    type Event;
    type Error;

    fn handle(
        &mut self,
        queue: &mut EventQueue<Self::Event>,
        event: Self::Event,
    ) -> Result<(), Self::Error>;
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Next event is at or after the stop time
    StopTimeReached,
    QueueEmpty,
    /// The external stop flag was raised
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub events_processed: u64,
    pub end_time: Duration,
    pub reason: StopReason,
}

/// Run `handler` on events strictly before `stop_at`. Stops early on the first
/// handler error or when `stop_flag` is raised.
pub fn run_until<H: EventHandler>(
    handler: &mut H,
    queue: &mut EventQueue<H::Event>,
    stop_at: Duration,
    stop_flag: Option<&AtomicBool>,
) -> Result<RunSummary, H::Error> {
    let mut events_processed = 0u64;

    let reason = loop {
        if stop_flag.is_some_and(|f| f.load(AtomicOrdering::Relaxed)) {
            break StopReason::Interrupted;
        }
        match queue.peek_time() {
            None => break StopReason::QueueEmpty,
            Some(t) if t >= stop_at => break StopReason::StopTimeReached,
            Some(_) => {}
        }
        let Some((time, event)) = queue.pop() else {
            break StopReason::QueueEmpty;
        };
        trace!("Running event at {:?}", time);
        handler.handle(queue, event)?;
        events_processed += 1;
    };

    debug!("Simulation stopped at {:?} after {} events: {:?}", queue.now(), events_processed, reason);
    Ok(RunSummary { events_processed, end_time: queue.now(), reason })
}

/// A handler together with its event queue
pub struct Simulator<H: EventHandler> {
    pub handler: H,
    pub queue: EventQueue<H::Event>,
}

impl<H: EventHandler> Simulator<H> {
    pub fn new(handler: H) -> Self {
        Self { handler, queue: EventQueue::new() }
    }

    pub fn now(&self) -> Duration {
        self.queue.now()
    }

    /// Run until `stop_at`, the queue drains, `stop_flag` is raised or the
    /// handler fails
    pub fn run(
        &mut self,
        stop_at: Duration,
        stop_flag: Option<&AtomicBool>,
    ) -> Result<RunSummary, H::Error> {
        run_until(&mut self.handler, &mut self.queue, stop_at, stop_flag)
    }
}
