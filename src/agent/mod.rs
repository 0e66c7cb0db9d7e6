//! ==============================================================================
//! agent - producer node control loop
//! ==============================================================================
//!
//! purpose:
//!     runs on every remote producer. each iteration:
//!         1. check the link; if it's down, run the attach sequence
//!            (3 attempts, 1s/2s/4s backoff, then offline mode)
//!         2. read the sensor source
//!         3. log the reading if it changed noticeably
//!         4. send it to the hub if online, otherwise skip
//!     then wait 5s (10s after a failed iteration).
//!
//! failure model:
//!     - send failures: logged, status led off, retried next iteration.
//!       they never change link state.
//!     - sensor/led failures: the iteration fails, the loop waits the
//!       longer error delay and carries on.
//!     - shutdown: only observed at delay points (backoff and
//!       inter-iteration waits); the led is switched off before returning.
//!     - anything escaping `run` is fatal and handled by the supervisor.
//!
//! everything the loop touches is injected (link, transport, sensor, led,
//! clock), so the state machine runs in tests without network or hardware.
//!
//! ==============================================================================

pub mod change;
pub mod clock;
pub mod link;
pub mod state;
pub mod transport;

pub use change::has_significant_change;
pub use clock::{Clock, SystemClock};
pub use link::{HostLink, NetworkLink};
pub use state::{backoff_delay, LinkState};
pub use transport::{HttpTransport, Transport};

use crate::config::{LoggingConfig, NodeConfig};
use crate::domain::{Payload, ReadingEnvelope};
use crate::error::AgentError;
use crate::hal::StatusIndicator;
use crate::sensor::SensorSource;
use crate::shutdown::{self, ShutdownSignal};

use std::sync::Arc;
use std::time::Duration;

/// per-node knobs, usually built from [`NodeConfig`]
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub producer_id: String,
    pub device_type: Option<String>,
    pub connect_attempts: u32,
    pub interval: Duration,
    pub error_delay: Duration,
    pub change_threshold: f64,
    pub show_sensor_data: bool,
}

impl AgentSettings {
    pub fn from_config(node: &NodeConfig, logging: &LoggingConfig) -> Self {
        Self {
            producer_id: node.producer_id.clone(),
            device_type: Some(node.device_type.clone()).filter(|d| !d.is_empty()),
            connect_attempts: node.connect_attempts.max(1),
            interval: node.interval(),
            error_delay: node.error_delay(),
            change_threshold: node.change_threshold,
            show_sensor_data: logging.show_sensor_data,
        }
    }
}

/// the capabilities a node runs on
pub struct AgentIo {
    pub link: Box<dyn NetworkLink>,
    pub transport: Box<dyn Transport>,
    pub sensor: Box<dyn SensorSource>,
    pub indicator: Box<dyn StatusIndicator>,
    pub clock: Arc<dyn Clock>,
}

/// what one iteration ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// reading accepted by the hub
    Sent,
    /// online, but the hub didn't take the reading
    SendFailed,
    /// no link; reading logged locally only
    Offline,
    /// shutdown requested during the attach backoff
    Stopped,
}

enum ConnectOutcome {
    Connected,
    Offline,
    Interrupted,
}

pub struct Agent {
    settings: AgentSettings,
    io: AgentIo,
    state: LinkState,
    last_logged: Option<Payload>,
    shutdown: ShutdownSignal,
}

impl Agent {
    pub fn new(settings: AgentSettings, io: AgentIo, shutdown: ShutdownSignal) -> Self {
        Self { settings, io, state: LinkState::Disconnected, last_logged: None, shutdown }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// the reading that was last written to the log
    pub fn last_logged(&self) -> Option<&Payload> {
        self.last_logged.as_ref()
    }

    /// main control loop. returns after a clean shutdown.
    pub async fn run(&mut self) -> Result<(), AgentError> {
        // a led we can't even switch off means the hardware is unusable
        self.io.indicator.set(false).map_err(AgentError::Fatal)?;
        tracing::info!("[AGENT] Starting for {}", self.settings.producer_id);

        loop {
            let delay = match self.tick().await {
                Ok(Tick::Stopped) => break,
                Ok(_) => self.settings.interval,
                Err(e) => {
                    tracing::error!("[AGENT] Error in main loop: {}", e);
                    if let Err(led) = self.io.indicator.set(false) {
                        tracing::warn!("[AGENT] Status LED unavailable: {:#}", led);
                    }
                    self.settings.error_delay
                }
            };
            if self.pause(delay).await {
                break;
            }
        }

        self.release();
        Ok(())
    }

    /// one loop iteration; the single dispatch point of the state machine
    pub async fn tick(&mut self) -> Result<Tick, AgentError> {
        if self.state.is_online() && !self.io.link.is_up().await {
            tracing::warn!("[LINK] Link lost");
            self.transition(LinkState::Disconnected);
        }

        if self.state == LinkState::Disconnected {
            match self.connect().await {
                ConnectOutcome::Interrupted => return Ok(Tick::Stopped),
                ConnectOutcome::Connected | ConnectOutcome::Offline => {}
            }
        }

        let payload = self.io.sensor.read().await.map_err(AgentError::Sensor)?;
        self.log_if_changed(&payload);

        if !self.state.is_online() {
            tracing::info!("[AGENT] Skipping server update (offline)");
            return Ok(Tick::Offline);
        }

        let envelope = ReadingEnvelope {
            producer_id: self.settings.producer_id.clone(),
            observed_at: Some(self.io.clock.now()),
            payload,
            device_type: self.settings.device_type.clone(),
        };

        self.transition(LinkState::Sending);
        let sent = self.io.transport.send(&envelope).await;
        self.transition(LinkState::Connected);

        match sent {
            Ok(()) => {
                tracing::info!("[AGENT] Data sent (observed_at {:.3})", envelope.observed_at.unwrap_or_default());
                self.io.indicator.set(true).map_err(AgentError::Indicator)?;
                Ok(Tick::Sent)
            }
            Err(e) => {
                tracing::warn!("[AGENT] Failed to send data: {}", e);
                self.io.indicator.set(false).map_err(AgentError::Indicator)?;
                Ok(Tick::SendFailed)
            }
        }
    }

    /// bounded attach attempts with exponential backoff between them
    async fn connect(&mut self) -> ConnectOutcome {
        self.transition(LinkState::Connecting);
        let attempts = self.settings.connect_attempts;

        for attempt in 0..attempts {
            match self.io.link.attach().await {
                Ok(()) => {
                    self.transition(LinkState::Connected);
                    return ConnectOutcome::Connected;
                }
                Err(e) => {
                    let wait = backoff_delay(attempt);
                    tracing::warn!(
                        "[LINK] Attach failed: {}. Retrying in {}s (attempt {}/{})",
                        e,
                        wait.as_secs(),
                        attempt + 1,
                        attempts
                    );
                    if self.pause(wait).await {
                        self.transition(LinkState::Disconnected);
                        return ConnectOutcome::Interrupted;
                    }
                }
            }
        }

        tracing::warn!("[LINK] Could not attach after {} attempts, continuing offline", attempts);
        self.transition(LinkState::Disconnected);
        ConnectOutcome::Offline
    }

    fn log_if_changed(&mut self, payload: &Payload) {
        let changed = match &self.last_logged {
            None => true,
            Some(previous) => has_significant_change(payload, previous, self.settings.change_threshold),
        };
        if !changed {
            return;
        }

        if self.settings.show_sensor_data {
            tracing::info!("[AGENT] New readings at {:.3}:\n{}", self.io.clock.now(), change::describe(payload));
        } else {
            tracing::info!("[AGENT] New readings at {:.3}", self.io.clock.now());
        }
        self.last_logged = Some(payload.clone());
    }

    /// sleep on the injected clock; true if shutdown was requested meanwhile
    async fn pause(&mut self, duration: Duration) -> bool {
        if *self.shutdown.borrow() {
            return true;
        }
        let clock = Arc::clone(&self.io.clock);
        tokio::select! {
            _ = clock.sleep(duration) => false,
            _ = shutdown::requested(&mut self.shutdown) => true,
        }
    }

    fn transition(&mut self, next: LinkState) {
        if self.state != next {
            tracing::debug!("[AGENT] {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// clean-shutdown path: leave the hardware dark
    fn release(&mut self) {
        tracing::info!("[AGENT] Cleaning up");
        if let Err(e) = self.io.indicator.set(false) {
            tracing::warn!("[AGENT] Failed to switch off status LED: {:#}", e);
        }
        self.transition(LinkState::Disconnected);
    }
}
