// Connection state machine for a single device
//
// States: Discovered -> Pairing -> Connected -> Reconnecting -> Disconnected,
// with Unpaired as the terminal state. All transitions are validated here,
// separate from the async actor, so the legal-transition table can be tested
// without a runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::device::types::DeviceId;
use crate::error::ConnectionError;

/// Connection lifecycle state of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Seen in a scan, never connected
    Discovered,
    /// Link establishment in flight (bounded by the connect timeout)
    Pairing,
    /// Live link, payloads flowing
    Connected,
    /// Link dropped, backoff retries in flight
    Reconnecting,
    /// No link and no retries pending; `connect` may be called again
    Disconnected,
    /// Explicitly removed; terminal
    Unpaired,
}

impl ConnectionState {
    pub fn display_name(&self) -> &'static str {
        match self {
            ConnectionState::Discovered => "discovered",
            ConnectionState::Pairing => "pairing",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Unpaired => "unpaired",
        }
    }

    /// Terminal states accept no further transitions except `unpair` itself
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Unpaired)
    }

    /// States from which `connect` is a legal request
    pub fn may_connect(&self) -> bool {
        matches!(
            self,
            ConnectionState::Discovered | ConnectionState::Disconnected
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Validated state machine for one device's connection lifecycle
///
/// The actor task is the single writer; every mutation goes through a
/// transition method that either returns the new state or a typed
/// `ConnectionError::InvalidTransition`.
#[derive(Debug, Clone)]
pub struct DeviceStateMachine {
    device_id: DeviceId,
    state: ConnectionState,
}

impl DeviceStateMachine {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            state: ConnectionState::Discovered,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// `connect` requested: Discovered | Disconnected -> Pairing
    pub fn begin_pairing(&mut self) -> Result<(), ConnectionError> {
        if !self.state.may_connect() {
            return Err(self.invalid("connect"));
        }
        self.state = ConnectionState::Pairing;
        Ok(())
    }

    /// Link established: Pairing | Reconnecting -> Connected
    pub fn link_up(&mut self) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Pairing | ConnectionState::Reconnecting => {
                self.state = ConnectionState::Connected;
                Ok(())
            }
            _ => Err(self.invalid("complete link")),
        }
    }

    /// Pairing failed or timed out: Pairing -> Disconnected
    pub fn pairing_failed(&mut self) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Pairing => {
                self.state = ConnectionState::Disconnected;
                Ok(())
            }
            _ => Err(self.invalid("fail pairing")),
        }
    }

    /// In-progress connect cancelled; restore the pre-pairing state
    pub fn cancel_pairing(&mut self, prior: ConnectionState) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Pairing => {
                self.state = prior;
                Ok(())
            }
            _ => Err(self.invalid("cancel pairing")),
        }
    }

    /// Hardware reported link loss: Connected -> Reconnecting
    pub fn link_lost(&mut self) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Connected => {
                self.state = ConnectionState::Reconnecting;
                Ok(())
            }
            _ => Err(self.invalid("handle link loss")),
        }
    }

    /// Retry budget exhausted: Reconnecting -> Disconnected
    pub fn retries_exhausted(&mut self) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Reconnecting => {
                self.state = ConnectionState::Disconnected;
                Ok(())
            }
            _ => Err(self.invalid("exhaust retries")),
        }
    }

    /// `unpair` requested: legal from every state, idempotent
    pub fn unpair(&mut self) {
        self.state = ConnectionState::Unpaired;
    }

    fn invalid(&self, requested: &'static str) -> ConnectionError {
        ConnectionError::InvalidTransition {
            device_id: self.device_id.clone(),
            from: self.state,
            requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> DeviceStateMachine {
        DeviceStateMachine::new(DeviceId::new("D1"))
    }

    #[test]
    fn test_initial_state_is_discovered() {
        assert_eq!(machine().state(), ConnectionState::Discovered);
    }

    #[test]
    fn test_happy_path_to_connected() {
        let mut m = machine();
        m.begin_pairing().unwrap();
        assert_eq!(m.state(), ConnectionState::Pairing);
        m.link_up().unwrap();
        assert_eq!(m.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_connect_illegal_while_connected() {
        let mut m = machine();
        m.begin_pairing().unwrap();
        m.link_up().unwrap();

        let err = m.begin_pairing().unwrap_err();
        match err {
            ConnectionError::InvalidTransition { from, .. } => {
                assert_eq!(from, ConnectionState::Connected);
            }
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
        // State unchanged by the rejected request
        assert_eq!(m.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_pairing_failure_returns_to_disconnected() {
        let mut m = machine();
        m.begin_pairing().unwrap();
        m.pairing_failed().unwrap();
        assert_eq!(m.state(), ConnectionState::Disconnected);
        // connect is legal again from Disconnected
        assert!(m.begin_pairing().is_ok());
    }

    #[test]
    fn test_cancel_restores_prior_state() {
        let mut m = machine();
        m.begin_pairing().unwrap();
        m.cancel_pairing(ConnectionState::Discovered).unwrap();
        assert_eq!(m.state(), ConnectionState::Discovered);
    }

    #[test]
    fn test_link_loss_and_recovery() {
        let mut m = machine();
        m.begin_pairing().unwrap();
        m.link_up().unwrap();
        m.link_lost().unwrap();
        assert_eq!(m.state(), ConnectionState::Reconnecting);
        m.link_up().unwrap();
        assert_eq!(m.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_link_loss_budget_exhausted() {
        let mut m = machine();
        m.begin_pairing().unwrap();
        m.link_up().unwrap();
        m.link_lost().unwrap();
        m.retries_exhausted().unwrap();
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_link_lost_ignored_when_not_connected() {
        let mut m = machine();
        assert!(m.link_lost().is_err());
        assert_eq!(m.state(), ConnectionState::Discovered);
    }

    #[test]
    fn test_unpair_from_every_state_is_terminal() {
        for setup in 0..4 {
            let mut m = machine();
            match setup {
                1 => {
                    m.begin_pairing().unwrap();
                }
                2 => {
                    m.begin_pairing().unwrap();
                    m.link_up().unwrap();
                }
                3 => {
                    m.begin_pairing().unwrap();
                    m.link_up().unwrap();
                    m.link_lost().unwrap();
                }
                _ => {}
            }
            m.unpair();
            assert_eq!(m.state(), ConnectionState::Unpaired);
            assert!(m.state().is_terminal());
            // Idempotent
            m.unpair();
            assert_eq!(m.state(), ConnectionState::Unpaired);
        }
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ConnectionState::Reconnecting).unwrap();
        assert_eq!(json, "\"reconnecting\"");
    }
}
