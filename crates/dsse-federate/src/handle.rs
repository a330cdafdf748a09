//! Owned federate connection with scoped release.

use dsse_core::{DsseError, DsseResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::InputMapping;
use crate::substrate::{SimTime, Substrate};

/// A substrate connection plus the federate's input mapping.
///
/// Inputs are addressed by logical key (`"powers_real"`) and resolved
/// through the [`InputMapping`]. The connection is released exactly once:
/// explicitly through [`FederateHandle::disconnect`], or on drop when a run
/// loop exits early.
pub struct FederateHandle<S: Substrate> {
    substrate: S,
    inputs: InputMapping,
    connected: bool,
}

impl<S: Substrate> FederateHandle<S> {
    pub fn new(substrate: S, inputs: InputMapping) -> Self {
        Self {
            substrate,
            inputs,
            connected: true,
        }
    }

    pub fn name(&self) -> &str {
        self.substrate.name()
    }

    pub fn inputs(&self) -> &InputMapping {
        &self.inputs
    }

    pub fn enter_execution_mode(&mut self) -> DsseResult<()> {
        self.substrate.enter_execution_mode()?;
        info!(federate = self.substrate.name(), "entered execution mode");
        Ok(())
    }

    pub fn request_time(&mut self, time: SimTime) -> DsseResult<SimTime> {
        self.substrate.request_time(time)
    }

    /// Serialize `value` as JSON and publish it on `key`.
    pub fn publish<T: Serialize>(&mut self, key: &str, value: &T) -> DsseResult<()> {
        let payload = serde_json::to_string(value)?;
        self.substrate.publish(key, payload)
    }

    pub fn is_updated(&self, input: &str) -> DsseResult<bool> {
        let channel = self.inputs.channel(input)?;
        self.substrate.is_updated(channel)
    }

    /// Decode the latest value on `input`, if any has arrived.
    pub fn read<T: DeserializeOwned>(&mut self, input: &str) -> DsseResult<Option<T>> {
        let channel = self.inputs.channel(input)?;
        match self.substrate.subscription(channel)? {
            Some(update) => Ok(Some(serde_json::from_str(&update.payload)?)),
            None => Ok(None),
        }
    }

    /// Like [`FederateHandle::read`], failing when nothing has arrived yet.
    pub fn read_required<T: DeserializeOwned>(&mut self, input: &str) -> DsseResult<T> {
        self.read(input)?.ok_or_else(|| {
            DsseError::Substrate(format!("no value received yet on input {input:?}"))
        })
    }

    /// Release the connection. Later calls are no-ops.
    pub fn disconnect(&mut self) -> DsseResult<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.substrate.disconnect()?;
        info!(federate = self.substrate.name(), "disconnected");
        Ok(())
    }
}

impl<S: Substrate> Drop for FederateHandle<S> {
    fn drop(&mut self) {
        if self.connected {
            self.connected = false;
            if let Err(err) = self.substrate.disconnect() {
                warn!(federate = self.substrate.name(), %err, "disconnect on drop failed");
            }
        }
    }
}
