// DeviceConnectionManager: per-device connection actors
//
// Single-writer discipline: every discovered device gets one actor task
// owning its state machine, and all mutations arrive as commands on that
// actor's channel. No two transitions for the same device ever apply
// concurrently; different devices proceed fully in parallel.
//
// The actor is also what makes `connect` cancellable: while a pairing
// attempt is in flight the actor keeps draining its command channel, so a
// cancel or unpair can race the link completion and restore the prior
// state.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::ConnectionConfig;
use crate::device::backoff::ReconnectBackoff;
use crate::device::link::DeviceLink;
use crate::device::state::{ConnectionState, DeviceStateMachine};
use crate::device::types::{Capability, Device, DeviceId};
use crate::error::{log_connection_error, ConnectionError};

/// Events published on the device broadcast channel
///
/// Consumed by the stream-buffer wiring (flush/drop on loss) and, read-only,
/// by the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// State machine moved to a new state
    StateChanged {
        device_id: DeviceId,
        state: ConnectionState,
    },
    /// Reconnect budget exhausted after link loss
    DeviceLost { device_id: DeviceId },
}

enum DeviceCommand {
    Connect {
        respond_to: oneshot::Sender<Result<(), ConnectionError>>,
    },
    CancelConnect,
    LinkLost,
    Seen {
        timestamp_us: u64,
    },
    Unpair {
        respond_to: oneshot::Sender<()>,
    },
}

struct DeviceHandle {
    commands: mpsc::UnboundedSender<DeviceCommand>,
    record: Arc<RwLock<Device>>,
}

/// Owns the connection lifecycle of every paired device
///
/// Registry access is a short critical section; all per-device work happens
/// inside the device's actor task. Must be constructed inside a tokio
/// runtime (actors are spawned on `discover`).
pub struct DeviceConnectionManager {
    link: Arc<dyn DeviceLink>,
    config: ConnectionConfig,
    events: broadcast::Sender<DeviceEvent>,
    devices: Mutex<HashMap<DeviceId, DeviceHandle>>,
}

impl DeviceConnectionManager {
    pub fn new(
        link: Arc<dyn DeviceLink>,
        config: ConnectionConfig,
        events: broadcast::Sender<DeviceEvent>,
    ) -> Self {
        Self {
            link,
            config,
            events,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Register a device seen in a scan and spawn its actor
    ///
    /// Idempotent: re-discovering a known device only refreshes its
    /// last-seen timestamp. A device removed by `unpair` can be discovered
    /// again, which creates a fresh record and actor.
    pub fn discover(
        &self,
        device_id: &DeviceId,
        capabilities: Vec<Capability>,
    ) -> Result<(), ConnectionError> {
        let mut devices = self.lock_registry()?;
        if let Some(handle) = devices.get(device_id) {
            let _ = handle.commands.send(DeviceCommand::Seen {
                timestamp_us: wall_clock_us(),
            });
            return Ok(());
        }

        let record = Arc::new(RwLock::new(Device::discovered(
            device_id.clone(),
            capabilities,
            wall_clock_us(),
        )));
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = DeviceActor {
            id: device_id.clone(),
            machine: DeviceStateMachine::new(device_id.clone()),
            record: Arc::clone(&record),
            link: Arc::clone(&self.link),
            config: self.config.clone(),
            events: self.events.clone(),
            commands: rx,
        };
        tokio::spawn(actor.run());
        devices.insert(device_id.clone(), DeviceHandle { commands: tx, record });

        log::info!("[DeviceConnectionManager] Discovered device {}", device_id);
        Ok(())
    }

    /// Request a connection and wait for the outcome
    ///
    /// Legal from `Discovered` or `Disconnected`. Fails with `Unreachable`
    /// when the link does not come up within the configured timeout, with
    /// the state machine back in `Disconnected`.
    pub async fn connect(&self, device_id: &DeviceId) -> Result<(), ConnectionError> {
        let commands = self.command_sender(device_id)?;
        let (respond_to, response) = oneshot::channel();
        commands
            .send(DeviceCommand::Connect { respond_to })
            .map_err(|_| ConnectionError::ActorGone {
                device_id: device_id.clone(),
            })?;
        response.await.map_err(|_| ConnectionError::ActorGone {
            device_id: device_id.clone(),
        })?
    }

    /// Cancel an in-flight `connect`, restoring the prior state
    pub fn cancel_connect(&self, device_id: &DeviceId) -> Result<(), ConnectionError> {
        let commands = self.command_sender(device_id)?;
        commands
            .send(DeviceCommand::CancelConnect)
            .map_err(|_| ConnectionError::ActorGone {
                device_id: device_id.clone(),
            })
    }

    /// Hardware notification that an established link dropped
    ///
    /// Kicks off the bounded-backoff reconnect loop; stale notifications
    /// for devices not currently `Connected` are ignored by the actor.
    pub fn on_link_lost(&self, device_id: &DeviceId) -> Result<(), ConnectionError> {
        let commands = self.command_sender(device_id)?;
        commands
            .send(DeviceCommand::LinkLost)
            .map_err(|_| ConnectionError::ActorGone {
                device_id: device_id.clone(),
            })
    }

    /// Refresh the last-seen timestamp from an ingested payload
    pub fn mark_seen(&self, device_id: &DeviceId) {
        if let Ok(devices) = self.devices.lock() {
            if let Some(handle) = devices.get(device_id) {
                let _ = handle.commands.send(DeviceCommand::Seen {
                    timestamp_us: wall_clock_us(),
                });
            }
        }
    }

    /// Remove a device and release all of its resources
    ///
    /// Valid from any state and idempotent: unpairing an unknown device is
    /// a no-op. Waits for the actor to acknowledge so callers can rely on
    /// the link being closed when this returns.
    pub async fn unpair(&self, device_id: &DeviceId) -> Result<(), ConnectionError> {
        let removed = {
            let mut devices = self.lock_registry()?;
            devices.remove(device_id)
        };
        let Some(handle) = removed else {
            return Ok(());
        };

        let (respond_to, ack) = oneshot::channel();
        if handle
            .commands
            .send(DeviceCommand::Unpair { respond_to })
            .is_ok()
        {
            // Actor gone before acking still means the device is released
            let _ = ack.await;
        }
        log::info!("[DeviceConnectionManager] Unpaired device {}", device_id);
        Ok(())
    }

    /// Read-only snapshot of one device record
    pub fn device(&self, device_id: &DeviceId) -> Option<Device> {
        let devices = self.devices.lock().ok()?;
        let handle = devices.get(device_id)?;
        handle.record.read().ok().map(|record| record.clone())
    }

    /// Read-only snapshots of every known device
    pub fn devices(&self) -> Vec<Device> {
        let Ok(devices) = self.devices.lock() else {
            return Vec::new();
        };
        devices
            .values()
            .filter_map(|handle| handle.record.read().ok().map(|record| record.clone()))
            .collect()
    }

    fn command_sender(
        &self,
        device_id: &DeviceId,
    ) -> Result<mpsc::UnboundedSender<DeviceCommand>, ConnectionError> {
        let devices = self.lock_registry()?;
        devices
            .get(device_id)
            .map(|handle| handle.commands.clone())
            .ok_or_else(|| ConnectionError::UnknownDevice {
                device_id: device_id.clone(),
            })
    }

    fn lock_registry(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<DeviceId, DeviceHandle>>, ConnectionError> {
        self.devices
            .lock()
            .map_err(|_| ConnectionError::RegistryPoisoned)
    }
}

fn wall_clock_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ============================================================================
// DEVICE ACTOR
// ============================================================================

struct DeviceActor {
    id: DeviceId,
    machine: DeviceStateMachine,
    record: Arc<RwLock<Device>>,
    link: Arc<dyn DeviceLink>,
    config: ConnectionConfig,
    events: broadcast::Sender<DeviceEvent>,
    commands: mpsc::UnboundedReceiver<DeviceCommand>,
}

enum AttemptOutcome {
    Up,
    Down,
}

impl DeviceActor {
    async fn run(mut self) {
        loop {
            let Some(command) = self.commands.recv().await else {
                // Manager dropped the handle; release the link and stop
                self.link.close(&self.id);
                break;
            };
            let flow = match command {
                DeviceCommand::Connect { respond_to } => self.handle_connect(respond_to).await,
                DeviceCommand::CancelConnect => ControlFlow::Continue(()),
                DeviceCommand::LinkLost => self.handle_link_lost().await,
                DeviceCommand::Seen { timestamp_us } => {
                    self.touch(timestamp_us);
                    ControlFlow::Continue(())
                }
                DeviceCommand::Unpair { respond_to } => {
                    self.do_unpair();
                    let _ = respond_to.send(());
                    ControlFlow::Break(())
                }
            };
            if flow.is_break() {
                break;
            }
        }
        log::debug!("[DeviceConnectionManager] Actor for {} stopped", self.id);
    }

    async fn handle_connect(
        &mut self,
        respond_to: oneshot::Sender<Result<(), ConnectionError>>,
    ) -> ControlFlow<()> {
        let prior = self.machine.state();
        if let Err(err) = self.machine.begin_pairing() {
            log_connection_error(&err, "connect");
            let _ = respond_to.send(Err(err));
            return ControlFlow::Continue(());
        }
        self.publish_state();

        let mut link_rx = self.link.open(&self.id);
        let timeout = tokio::time::sleep(self.config.connect_timeout());
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                res = &mut link_rx => {
                    match res {
                        Ok(Ok(())) => {
                            let _ = self.machine.link_up();
                            self.publish_state();
                            log::info!("[DeviceConnectionManager] Device {} connected", self.id);
                            let _ = respond_to.send(Ok(()));
                        }
                        Ok(Err(fault)) => self.fail_pairing(respond_to, fault.describe()),
                        Err(_) => self.fail_pairing(
                            respond_to,
                            "link layer dropped the attempt".to_string(),
                        ),
                    }
                    return ControlFlow::Continue(());
                }
                _ = &mut timeout => {
                    self.link.close(&self.id);
                    self.fail_pairing(respond_to, "link open timed out".to_string());
                    return ControlFlow::Continue(());
                }
                command = self.commands.recv() => match command {
                    Some(DeviceCommand::CancelConnect) => {
                        self.link.close(&self.id);
                        let _ = self.machine.cancel_pairing(prior);
                        self.publish_state();
                        let _ = respond_to.send(Err(ConnectionError::Cancelled {
                            device_id: self.id.clone(),
                        }));
                        return ControlFlow::Continue(());
                    }
                    Some(DeviceCommand::Unpair { respond_to: unpair_ack }) => {
                        let _ = respond_to.send(Err(ConnectionError::Cancelled {
                            device_id: self.id.clone(),
                        }));
                        self.do_unpair();
                        let _ = unpair_ack.send(());
                        return ControlFlow::Break(());
                    }
                    Some(DeviceCommand::Connect { respond_to: other }) => {
                        let _ = other.send(Err(ConnectionError::InvalidTransition {
                            device_id: self.id.clone(),
                            from: ConnectionState::Pairing,
                            requested: "connect",
                        }));
                    }
                    Some(DeviceCommand::LinkLost) => {
                        // Stale loss report for the previous link
                    }
                    Some(DeviceCommand::Seen { timestamp_us }) => self.touch(timestamp_us),
                    None => {
                        self.link.close(&self.id);
                        return ControlFlow::Break(());
                    }
                }
            }
        }
    }

    async fn handle_link_lost(&mut self) -> ControlFlow<()> {
        if self.machine.link_lost().is_err() {
            log::debug!(
                "[DeviceConnectionManager] Ignoring link loss for {} in state {}",
                self.id,
                self.machine.state()
            );
            return ControlFlow::Continue(());
        }
        log::info!(
            "[DeviceConnectionManager] Link lost for {}, reconnecting",
            self.id
        );
        self.publish_state();

        let mut backoff = ReconnectBackoff::new(&self.config);
        loop {
            let Some(delay) = backoff.next_delay() else {
                let _ = self.machine.retries_exhausted();
                self.publish_state();
                log::warn!(
                    "[DeviceConnectionManager] Reconnect budget exhausted for {}",
                    self.id
                );
                let _ = self.events.send(DeviceEvent::DeviceLost {
                    device_id: self.id.clone(),
                });
                return ControlFlow::Continue(());
            };

            // Wait out the backoff delay, still answering commands
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    command = self.commands.recv() => {
                        if self.handle_side_command(command).is_break() {
                            return ControlFlow::Break(());
                        }
                    }
                }
            }

            match self.reconnect_attempt().await {
                ControlFlow::Break(()) => return ControlFlow::Break(()),
                ControlFlow::Continue(AttemptOutcome::Up) => {
                    let _ = self.machine.link_up();
                    self.publish_state();
                    log::info!(
                        "[DeviceConnectionManager] Device {} reconnected after {} attempt(s)",
                        self.id,
                        backoff.attempt()
                    );
                    return ControlFlow::Continue(());
                }
                ControlFlow::Continue(AttemptOutcome::Down) => {
                    log::debug!(
                        "[DeviceConnectionManager] Reconnect attempt {} for {} failed",
                        backoff.attempt(),
                        self.id
                    );
                }
            }
        }
    }

    async fn reconnect_attempt(&mut self) -> ControlFlow<(), AttemptOutcome> {
        let mut link_rx = self.link.open(&self.id);
        let timeout = tokio::time::sleep(self.config.connect_timeout());
        tokio::pin!(timeout);
        loop {
            tokio::select! {
                res = &mut link_rx => {
                    return ControlFlow::Continue(match res {
                        Ok(Ok(())) => AttemptOutcome::Up,
                        _ => AttemptOutcome::Down,
                    });
                }
                _ = &mut timeout => {
                    self.link.close(&self.id);
                    return ControlFlow::Continue(AttemptOutcome::Down);
                }
                command = self.commands.recv() => {
                    if self.handle_side_command(command).is_break() {
                        return ControlFlow::Break(());
                    }
                }
            }
        }
    }

    /// Commands arriving while the actor is mid-reconnect
    fn handle_side_command(&mut self, command: Option<DeviceCommand>) -> ControlFlow<()> {
        match command {
            Some(DeviceCommand::Unpair { respond_to }) => {
                self.do_unpair();
                let _ = respond_to.send(());
                ControlFlow::Break(())
            }
            Some(DeviceCommand::Connect { respond_to }) => {
                let _ = respond_to.send(Err(ConnectionError::InvalidTransition {
                    device_id: self.id.clone(),
                    from: self.machine.state(),
                    requested: "connect",
                }));
                ControlFlow::Continue(())
            }
            Some(DeviceCommand::CancelConnect) | Some(DeviceCommand::LinkLost) => {
                ControlFlow::Continue(())
            }
            Some(DeviceCommand::Seen { timestamp_us }) => {
                self.touch(timestamp_us);
                ControlFlow::Continue(())
            }
            None => {
                self.link.close(&self.id);
                ControlFlow::Break(())
            }
        }
    }

    fn fail_pairing(
        &mut self,
        respond_to: oneshot::Sender<Result<(), ConnectionError>>,
        reason: String,
    ) {
        let _ = self.machine.pairing_failed();
        self.publish_state();
        let err = ConnectionError::Unreachable {
            device_id: self.id.clone(),
            timeout_ms: self.config.connect_timeout_ms,
            reason,
        };
        log_connection_error(&err, "connect");
        let _ = respond_to.send(Err(err));
    }

    fn do_unpair(&mut self) {
        self.link.close(&self.id);
        self.machine.unpair();
        self.publish_state();
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        if let Ok(mut record) = self.record.write() {
            record.state = state;
        }
        let _ = self.events.send(DeviceEvent::StateChanged {
            device_id: self.id.clone(),
            state,
        });
    }

    fn touch(&self, timestamp_us: u64) {
        if let Ok(mut record) = self.record.write() {
            if timestamp_us > record.last_seen_us {
                record.last_seen_us = timestamp_us;
            }
        }
    }
}
