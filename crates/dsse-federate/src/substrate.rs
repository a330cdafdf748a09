//! Contract between a federate and the synchronization substrate.
//!
//! A federate owns exactly one [`Substrate`] connection. Its only suspension
//! point is [`Substrate::request_time`], which blocks until the substrate
//! grants a time no earlier than the request. Publications made while a
//! federate holds grant `t` are stamped `t` and become visible to subscribers
//! once they are granted a time `>= t`.

use dsse_core::DsseResult;

/// Simulated time in seconds.
pub type SimTime = f64;

/// Sentinel grant signalling end of run.
pub const MAX_TIME: SimTime = 9_223_372_036.854_776;

/// Latest value on a subscribed channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub payload: String,
    /// Whether the value arrived since the previous read
    pub fresh: bool,
}

/// Time-request/grant connection of one federate.
pub trait Substrate: Send {
    /// Federate name as registered with the substrate
    fn name(&self) -> &str;

    /// One-time handshake; returns once every registered federate entered.
    fn enter_execution_mode(&mut self) -> DsseResult<()>;

    /// Block until a time `>= time` is granted.
    fn request_time(&mut self, time: SimTime) -> DsseResult<SimTime>;

    /// Publish on `key`, which subscribers address as `"<name>/<key>"`.
    fn publish(&mut self, key: &str, payload: String) -> DsseResult<()>;

    /// Whether `channel` holds a value newer than the last read.
    fn is_updated(&self, channel: &str) -> DsseResult<bool>;

    /// Latest value on `channel`, clearing its freshness. `None` until the
    /// first publication has been delivered.
    fn subscription(&mut self, channel: &str) -> DsseResult<Option<Update>>;

    /// Leave the federation. Further calls fail with a substrate error.
    fn disconnect(&mut self) -> DsseResult<()>;
}

/// Whether `granted` is the end-of-run sentinel.
pub fn is_terminal(granted: SimTime) -> bool {
    granted >= MAX_TIME
}
