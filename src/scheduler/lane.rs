//! Priority lanes and the handoff between them.
//!
//! All lanes of a stream share one consumer group, so a lane may read records
//! tagged for another lane. Those records are already in the group's
//! pending-entries list; rather than leaving them stranded there, the lane
//! parks them in the [`Handoff`] and the owning lane drains them before its
//! next read.
//!
//! The handoff is bounded per priority. A lane never reads more records than
//! the fullest parked queue can still take, so a slow lane throttles the
//! reads of the others instead of growing an in-memory backlog.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::{LaneSettings, LanesConfig};
use crate::queue::Priority;
use crate::stream::StreamRecord;

/// Cadence of one polling lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lane {
    pub priority: Priority,
    pub interval: Duration,
    pub batch_size: usize,
}

impl Lane {
    pub fn new(priority: Priority, settings: LaneSettings) -> Self {
        Self {
            priority,
            interval: settings.interval(),
            batch_size: settings.batch_size.max(1),
        }
    }

    /// The three lanes of a stream, highest priority first.
    pub fn all(lanes: &LanesConfig) -> [Lane; 3] {
        Priority::ALL.map(|priority| Lane::new(priority, lanes.get(priority)))
    }
}

#[derive(Debug, Default)]
struct Parked {
    queues: HashMap<Priority, VecDeque<StreamRecord>>,
    /// Room promised to reads still in flight.
    reserved: usize,
}

impl Parked {
    fn len(&self, priority: Priority) -> usize {
        self.queues.get(&priority).map_or(0, VecDeque::len)
    }
}

/// Records read by one lane but owned by another.
#[derive(Debug)]
pub struct Handoff {
    parked: Mutex<Parked>,
    max_parked: usize,
}

impl Handoff {
    pub fn new(max_parked: usize) -> Self {
        Self {
            parked: Mutex::new(Parked::default()),
            max_parked,
        }
    }

    pub fn max_parked(&self) -> usize {
        self.max_parked
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Parked> {
        self.parked.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserves room for a read of up to `wanted` records.
    ///
    /// Every record of the read may end up parked in the same queue, so the
    /// grant is bounded by the fullest queue. The room is held until the
    /// returned [`ReadReservation`] is dropped.
    pub fn reserve(&self, wanted: usize) -> ReadReservation<'_> {
        let mut parked = self.lock();
        let fullest = Priority::ALL
            .iter()
            .map(|p| parked.len(*p))
            .max()
            .unwrap_or(0);
        let room = self
            .max_parked
            .saturating_sub(fullest)
            .saturating_sub(parked.reserved);
        let granted = wanted.min(room);
        parked.reserved += granted;
        ReadReservation {
            handoff: self,
            granted,
        }
    }

    /// Parks a record behind those already waiting for `priority`.
    ///
    /// Callers stay within a [`reserve`](Self::reserve) grant; the bound is
    /// not enforced here because the record is already pending in the log.
    pub fn park(&self, priority: Priority, record: StreamRecord) {
        self.lock()
            .queues
            .entry(priority)
            .or_default()
            .push_back(record);
    }

    /// Feeds up to `max` parked records for `priority` to `dispatch`, oldest
    /// first. A record handed back stays at the front and ends the drain.
    ///
    /// Returns how many records were accepted.
    pub fn drain_with<F>(&self, priority: Priority, max: usize, mut dispatch: F) -> usize
    where
        F: FnMut(StreamRecord) -> Result<(), StreamRecord>,
    {
        let mut parked = self.lock();
        let Some(queue) = parked.queues.get_mut(&priority) else {
            return 0;
        };
        let mut accepted = 0;
        while accepted < max {
            let Some(record) = queue.pop_front() else {
                break;
            };
            if let Err(record) = dispatch(record) {
                queue.push_front(record);
                break;
            }
            accepted += 1;
        }
        accepted
    }

    pub fn len(&self, priority: Priority) -> usize {
        self.lock().len(priority)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queues.values().all(VecDeque::is_empty)
    }
}

/// Room in the [`Handoff`] held for one read.
#[derive(Debug)]
pub struct ReadReservation<'a> {
    handoff: &'a Handoff,
    granted: usize,
}

impl ReadReservation<'_> {
    pub fn granted(&self) -> usize {
        self.granted
    }
}

impl Drop for ReadReservation<'_> {
    fn drop(&mut self) {
        let mut parked = self.handoff.lock();
        parked.reserved = parked.reserved.saturating_sub(self.granted);
    }
}
