//! In-process synchronization broker.
//!
//! Runs a whole federation inside one process, each federate on its own
//! thread. Time advances conservatively: grants are only computed once every
//! executing federate is blocked in a time request.
//!
//! ```text
//! candidate(f) = max(granted(f), min(requested(f), earliest undelivered stamp on f's subscriptions))
//! next         = min over f of candidate(f)
//! grant next to every f with candidate(f) <= next   (MAX_TIME when nothing is pending)
//! ```
//!
//! A subscriber requesting [`MAX_TIME`] is therefore woken at the stamp of
//! the next publication it can see, which lets relays and estimators run
//! purely event-driven. Publications carry the publisher's granted time and
//! are delivered (latest value wins) when the subscriber is granted.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use dsse_core::{DsseError, DsseResult};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::substrate::{SimTime, Substrate, Update, MAX_TIME};

#[derive(Debug)]
struct Message {
    stamp: SimTime,
    payload: String,
}

/// Messages on one channel still awaited by some subscriber.
///
/// Cursors are absolute positions; `first` is the position of the oldest
/// retained message.
#[derive(Debug, Default)]
struct ChannelLog {
    first: usize,
    messages: VecDeque<Message>,
}

impl ChannelLog {
    fn push(&mut self, message: Message) {
        self.messages.push_back(message);
    }

    fn get(&self, position: usize) -> Option<&Message> {
        position
            .checked_sub(self.first)
            .and_then(|i| self.messages.get(i))
    }

    /// Absolute position one past the last message stamped at or before `time`.
    fn end_at(&self, time: SimTime) -> usize {
        self.first + self.messages.partition_point(|m| m.stamp <= time)
    }

    fn end(&self) -> usize {
        self.first + self.messages.len()
    }

    /// Drop every message before absolute position `upto`.
    fn discard_before(&mut self, upto: usize) {
        while self.first < upto && self.messages.pop_front().is_some() {
            self.first += 1;
        }
    }
}

#[derive(Debug, Default)]
struct Inbox {
    delivered: usize,
    latest: Option<String>,
    fresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Registered,
    Executing,
    Disconnected,
}

#[derive(Debug)]
struct Slot {
    name: String,
    phase: Phase,
    granted: SimTime,
    requested: Option<SimTime>,
    grant: Option<SimTime>,
    inboxes: HashMap<String, Inbox>,
}

#[derive(Debug, Default)]
struct BrokerState {
    slots: Vec<Slot>,
    channels: HashMap<String, ChannelLog>,
}

impl BrokerState {
    fn all_entered(&self) -> bool {
        self.slots.iter().all(|s| s.phase != Phase::Registered)
    }

    fn earliest_pending(&self, slot: &Slot) -> Option<SimTime> {
        slot.inboxes
            .iter()
            .filter_map(|(channel, inbox)| {
                self.channels
                    .get(channel)
                    .and_then(|log| log.get(inbox.delivered))
                    .map(|m| m.stamp)
            })
            .reduce(f64::min)
    }

    /// Grant the next time if every executing federate is waiting.
    fn resolve(&mut self) -> bool {
        if !self.all_entered() {
            return false;
        }
        let active: Vec<usize> = (0..self.slots.len())
            .filter(|&i| self.slots[i].phase == Phase::Executing)
            .collect();
        if active.is_empty() || active.iter().any(|&i| self.slots[i].requested.is_none()) {
            return false;
        }

        let candidates: Vec<(usize, SimTime)> = active
            .iter()
            .map(|&i| {
                let slot = &self.slots[i];
                let requested = slot.requested.unwrap_or(MAX_TIME);
                let wake = self
                    .earliest_pending(slot)
                    .map_or(requested, |stamp| stamp.min(requested));
                (i, wake.max(slot.granted))
            })
            .collect();
        let next = candidates
            .iter()
            .map(|&(_, c)| c)
            .fold(MAX_TIME, f64::min);

        for (i, candidate) in candidates {
            if candidate <= next {
                self.grant(i, next);
            }
        }
        self.compact();
        true
    }

    /// Forget messages every connected subscriber has already been handed.
    fn compact(&mut self) {
        let BrokerState { slots, channels } = self;
        for (channel, log) in channels.iter_mut() {
            let oldest_needed = slots
                .iter()
                .filter(|s| s.phase != Phase::Disconnected)
                .filter_map(|s| s.inboxes.get(channel))
                .map(|inbox| inbox.delivered)
                .min()
                .unwrap_or_else(|| log.end());
            log.discard_before(oldest_needed);
        }
    }

    fn grant(&mut self, i: usize, time: SimTime) {
        let BrokerState { slots, channels } = self;
        let slot = &mut slots[i];
        for (channel, inbox) in &mut slot.inboxes {
            let Some(log) = channels.get(channel) else {
                continue;
            };
            let upto = log.end_at(time);
            if upto > inbox.delivered {
                inbox.latest = log.get(upto - 1).map(|m| m.payload.clone());
                inbox.fresh = true;
                inbox.delivered = upto;
            }
        }
        trace!(federate = %slot.name, time, "granted");
        slot.granted = time;
        slot.requested = None;
        slot.grant = Some(time);
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BrokerState>,
    changed: Condvar,
}

/// Cloneable handle to one federation.
///
/// Every federate must [`register`](Broker::register) before any of them
/// enters execution mode.
#[derive(Debug, Clone, Default)]
pub struct Broker {
    shared: Arc<Shared>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` subscribing to fully qualified `subscriptions`
    /// (`"<publisher>/<key>"`).
    pub fn register(&self, name: &str, subscriptions: &[String]) -> DsseResult<BrokerFederate> {
        let mut state = self.shared.state.lock();
        if state.slots.iter().any(|s| s.phase == Phase::Executing) {
            return Err(DsseError::Substrate(format!(
                "cannot register {name}: federation already executing"
            )));
        }
        if state.slots.iter().any(|s| s.name == name) {
            return Err(DsseError::Configuration(format!(
                "federate name {name} registered twice"
            )));
        }

        let id = state.slots.len();
        state.slots.push(Slot {
            name: name.to_string(),
            phase: Phase::Registered,
            granted: 0.0,
            requested: None,
            grant: None,
            inboxes: subscriptions
                .iter()
                .map(|s| (s.clone(), Inbox::default()))
                .collect(),
        });
        debug!(federate = name, subscriptions = subscriptions.len(), "registered");

        Ok(BrokerFederate {
            id,
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Federates that have not disconnected.
    pub fn connected(&self) -> usize {
        self.shared
            .state
            .lock()
            .slots
            .iter()
            .filter(|s| s.phase != Phase::Disconnected)
            .count()
    }
}

/// One federate's connection to a [`Broker`].
#[derive(Debug)]
pub struct BrokerFederate {
    id: usize,
    name: String,
    shared: Arc<Shared>,
}

impl BrokerFederate {
    fn not_executing(&self) -> DsseError {
        DsseError::Substrate(format!("federate {} is not in execution mode", self.name))
    }

    fn unsubscribed(&self, channel: &str) -> DsseError {
        DsseError::Configuration(format!(
            "federate {} is not subscribed to {channel}",
            self.name
        ))
    }

    fn leave(&self) -> bool {
        let mut state = self.shared.state.lock();
        let slot = &mut state.slots[self.id];
        if slot.phase == Phase::Disconnected {
            return false;
        }
        slot.phase = Phase::Disconnected;
        slot.requested = None;
        state.resolve();
        self.shared.changed.notify_all();
        true
    }
}

impl Substrate for BrokerFederate {
    fn name(&self) -> &str {
        &self.name
    }

    fn enter_execution_mode(&mut self) -> DsseResult<()> {
        let mut state = self.shared.state.lock();
        let slot = &mut state.slots[self.id];
        if slot.phase != Phase::Registered {
            return Err(DsseError::Substrate(format!(
                "federate {} cannot enter execution mode twice",
                self.name
            )));
        }
        slot.phase = Phase::Executing;
        self.shared.changed.notify_all();
        while !state.all_entered() {
            self.shared.changed.wait(&mut state);
        }
        Ok(())
    }

    fn request_time(&mut self, time: SimTime) -> DsseResult<SimTime> {
        let mut state = self.shared.state.lock();
        let slot = &mut state.slots[self.id];
        if slot.phase != Phase::Executing {
            return Err(self.not_executing());
        }
        slot.requested = Some(time.max(slot.granted));
        slot.grant = None;

        if state.resolve() {
            self.shared.changed.notify_all();
        }
        loop {
            let slot = &mut state.slots[self.id];
            if let Some(granted) = slot.grant.take() {
                return Ok(granted);
            }
            if slot.phase != Phase::Executing {
                return Err(self.not_executing());
            }
            self.shared.changed.wait(&mut state);
        }
    }

    fn publish(&mut self, key: &str, payload: String) -> DsseResult<()> {
        let mut state = self.shared.state.lock();
        let slot = &state.slots[self.id];
        if slot.phase != Phase::Executing {
            return Err(self.not_executing());
        }
        let stamp = slot.granted;
        let channel = format!("{}/{key}", self.name);
        state
            .channels
            .entry(channel)
            .or_default()
            .push(Message { stamp, payload });
        Ok(())
    }

    fn is_updated(&self, channel: &str) -> DsseResult<bool> {
        let state = self.shared.state.lock();
        state.slots[self.id]
            .inboxes
            .get(channel)
            .map(|inbox| inbox.fresh)
            .ok_or_else(|| self.unsubscribed(channel))
    }

    fn subscription(&mut self, channel: &str) -> DsseResult<Option<Update>> {
        let mut state = self.shared.state.lock();
        let inbox = state.slots[self.id]
            .inboxes
            .get_mut(channel)
            .ok_or_else(|| self.unsubscribed(channel))?;
        let update = inbox.latest.clone().map(|payload| Update {
            payload,
            fresh: inbox.fresh,
        });
        inbox.fresh = false;
        Ok(update)
    }

    fn disconnect(&mut self) -> DsseResult<()> {
        if self.leave() {
            debug!(federate = %self.name, "disconnected");
            Ok(())
        } else {
            Err(DsseError::Substrate(format!(
                "federate {} already disconnected",
                self.name
            )))
        }
    }
}

impl Drop for BrokerFederate {
    fn drop(&mut self) {
        // unblocks peers if the owner never disconnected
        self.leave();
    }
}
