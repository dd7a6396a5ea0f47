//! Link state machine
//!
//! [`LinkMachine::handle`] is the whole connection policy: it takes one
//! event, updates the connection state and retained records, and returns
//! the effects an outer driver must carry out. It never touches a socket,
//! a timer or the UI itself.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use super::error::LinkError;
use super::record::{NotificationRecord, RecordLog};
use super::state::{BackoffPolicy, ConnectionState, ConnectionStatus, HandleId};
use crate::auth::AuthSnapshot;
use crate::config::LinkConfig;
use crate::notice::Notice;

/// Tunables for one link instance
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    pub policy: BackoffPolicy,
    /// Retained notifications before the oldest are evicted
    pub capacity: usize,
    pub sound_enabled: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            policy: BackoffPolicy::default(),
            capacity: 50,
            sound_enabled: true,
        }
    }
}

impl LinkSettings {
    pub fn from_config(config: &LinkConfig) -> Self {
        Self {
            policy: BackoffPolicy::from_config(config),
            capacity: config.max_notifications,
            sound_enabled: config.sound_enabled,
        }
    }
}

/// What brought the page back into view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeTrigger {
    Focus,
    Visible,
}

/// Inputs to the state machine
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Explicit connect request
    Start(AuthSnapshot),
    /// Window focus or visibility regained
    Resume {
        trigger: ResumeTrigger,
        auth: AuthSnapshot,
    },
    /// Login, logout or token refresh
    SessionChanged(AuthSnapshot),
    /// A scheduled retry fired
    RetryDue { epoch: u64, auth: AuthSnapshot },
    Opened {
        handle: HandleId,
    },
    /// The handle could not be created (bad address, construction failure)
    OpenFailed {
        handle: HandleId,
        error: LinkError,
    },
    Message {
        handle: HandleId,
        payload: String,
        received_at: DateTime<Utc>,
    },
    Closed {
        handle: HandleId,
        /// A close handshake completed
        clean: bool,
        code: Option<u16>,
        reason: Option<String>,
    },
    TransportError {
        handle: HandleId,
        error: LinkError,
    },
    Disconnect,
    Send(Value),
    MarkRead(String),
    MarkAllRead,
    ClearNotifications,
    SetSoundEnabled(bool),
}

/// Work for the driver
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Create a socket for the resolved address
    Open {
        handle: HandleId,
        credential: Option<String>,
    },
    /// Gracefully close a socket
    Close { handle: HandleId },
    SendFrame { handle: HandleId, text: String },
    /// Feed `RetryDue { epoch }` back after `delay`
    ScheduleRetry { delay: Duration, epoch: u64 },
    /// Hand a record to the notification sink
    Deliver(NotificationRecord),
    Notify(Notice),
    StatusChanged(ConnectionStatus),
    BadgeChanged { unread: usize },
    PlaySound,
    /// An incident-related notification arrived; dashboards should refresh
    IncidentsUpdated { record: NotificationRecord },
}

/// Connection policy plus the retained notification list
#[derive(Debug, Clone)]
pub struct LinkMachine {
    settings: LinkSettings,
    state: ConnectionState,
    records: RecordLog,
    /// Credential the live handle was opened with
    credential: Option<String>,
    next_handle: u64,
    next_local_id: u64,
}

impl LinkMachine {
    pub fn new(settings: LinkSettings) -> Self {
        Self {
            state: ConnectionState::new(&settings.policy),
            records: RecordLog::new(settings.capacity),
            settings,
            credential: None,
            next_handle: 0,
            next_local_id: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    pub fn records(&self) -> &RecordLog {
        &self.records
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn sound_enabled(&self) -> bool {
        self.settings.sound_enabled
    }

    pub fn unread_count(&self) -> usize {
        self.records.unread_count()
    }

    /// Apply one event
    pub fn handle(&mut self, event: LinkEvent) -> Vec<Effect> {
        let mut effects = Vec::new();

        match event {
            LinkEvent::Start(auth) => self.start(auth, &mut effects),
            LinkEvent::Resume { trigger, auth } => {
                if self.state.status.is_connected() {
                    tracing::trace!(?trigger, "Resume ignored; already connected");
                } else if auth.authenticated {
                    tracing::debug!(?trigger, status = %self.state.status, "Resuming notification link");
                    self.start(auth, &mut effects);
                }
            }
            LinkEvent::SessionChanged(auth) => self.session_changed(auth, &mut effects),
            LinkEvent::RetryDue { epoch, auth } => {
                if epoch != self.state.retry_epoch {
                    tracing::trace!(epoch, current = self.state.retry_epoch, "Stale retry ignored");
                } else if self.state.status == ConnectionStatus::Disconnected {
                    tracing::info!(attempt = self.state.attempt, "Reconnecting notification link");
                    self.start(auth, &mut effects);
                }
            }
            LinkEvent::Opened { handle } => self.opened(handle, &mut effects),
            LinkEvent::OpenFailed { handle, error } => {
                if self.state.owns(handle) {
                    tracing::warn!(%handle, %error, "Failed to open notification socket");
                    effects.push(Effect::Notify(Notice::error(format!(
                        "Could not connect to notifications: {}",
                        error
                    ))));
                    if error.triggers_backoff() {
                        self.abnormal_close(&mut effects);
                    } else {
                        self.release_handle();
                        self.set_status(ConnectionStatus::Disconnected, &mut effects);
                    }
                }
            }
            LinkEvent::Message {
                handle,
                payload,
                received_at,
            } => {
                if self.state.owns(handle) {
                    self.message(&payload, received_at, &mut effects);
                }
            }
            LinkEvent::Closed {
                handle,
                clean,
                code,
                reason,
            } => {
                if !self.state.owns(handle) {
                    tracing::trace!(%handle, "Close from retired socket ignored");
                } else if clean {
                    tracing::info!(%handle, ?code, ?reason, "Notification socket closed");
                    self.release_handle();
                    self.set_status(ConnectionStatus::Disconnected, &mut effects);
                } else {
                    tracing::warn!(%handle, ?code, ?reason, "Notification socket dropped");
                    self.abnormal_close(&mut effects);
                }
            }
            LinkEvent::TransportError { handle, error } => {
                if self.state.owns(handle) {
                    tracing::warn!(%handle, %error, "Notification socket error");
                    self.set_status(ConnectionStatus::Disconnected, &mut effects);
                }
            }
            LinkEvent::Disconnect => self.disconnect(&mut effects),
            LinkEvent::Send(value) => self.send(&value, &mut effects),
            LinkEvent::MarkRead(id) => {
                if !self.records.mark_read(&id) {
                    tracing::debug!(%id, "No notification with that id");
                }
                self.push_badge(&mut effects);
            }
            LinkEvent::MarkAllRead => {
                let changed = self.records.mark_all_read();
                tracing::debug!(changed, "Marked all notifications read");
                self.push_badge(&mut effects);
            }
            LinkEvent::ClearNotifications => {
                self.records.clear();
                self.push_badge(&mut effects);
            }
            LinkEvent::SetSoundEnabled(enabled) => {
                self.settings.sound_enabled = enabled;
            }
        }

        effects
    }

    fn start(&mut self, auth: AuthSnapshot, effects: &mut Vec<Effect>) {
        if !auth.authenticated {
            tracing::debug!(error = %LinkError::AuthRequired, "Not connecting notification link");
            return;
        }

        // Any retry still pending is superseded by this attempt
        self.state.retry_epoch += 1;

        if let Some(old) = self.release_handle() {
            effects.push(Effect::Close { handle: old });
        }

        self.next_handle += 1;
        let handle = HandleId(self.next_handle);
        self.state.handle = Some(handle);
        self.credential = auth.credential.clone();
        self.set_status(ConnectionStatus::Connecting, effects);

        tracing::debug!(%handle, attempt = self.state.attempt, "Opening notification socket");
        effects.push(Effect::Open {
            handle,
            credential: auth.credential,
        });
    }

    fn session_changed(&mut self, auth: AuthSnapshot, effects: &mut Vec<Effect>) {
        if !auth.authenticated {
            if self.state.handle.is_some() || self.state.status != ConnectionStatus::Disconnected {
                tracing::info!("Session ended; closing notification link");
            }
            self.disconnect(effects);
            return;
        }

        match self.state.status {
            ConnectionStatus::Connected | ConnectionStatus::Connecting
                if self.credential == auth.credential => {}
            ConnectionStatus::GivenUp => {
                tracing::debug!("Session changed while given up; waiting for an explicit start");
            }
            _ => self.start(auth, effects),
        }
    }

    fn opened(&mut self, handle: HandleId, effects: &mut Vec<Effect>) {
        if !self.state.owns(handle) {
            tracing::trace!(%handle, "Open from retired socket ignored");
            return;
        }

        tracing::info!(%handle, "Notification link connected");
        self.state.reset_backoff(&self.settings.policy);
        self.set_status(ConnectionStatus::Connected, effects);
        effects.push(Effect::Notify(Notice::success(
            "Connected to real-time notifications",
        )));
    }

    fn message(&mut self, payload: &str, received_at: DateTime<Utc>, effects: &mut Vec<Effect>) {
        let next_local_id = &mut self.next_local_id;
        let fallback_id = || {
            *next_local_id += 1;
            format!("local-{}", next_local_id)
        };

        let record = match NotificationRecord::parse(payload, fallback_id, received_at) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(%error, "Discarding inbound notification");
                effects.push(Effect::Notify(Notice::error("Error processing notification")));
                return;
            }
        };

        tracing::debug!(id = %record.id, kind = %record.kind, "Notification received");

        let evicted = self.records.push(record.clone());
        if evicted > 0 {
            tracing::trace!(evicted, "Evicted oldest notifications");
        }

        effects.push(Effect::Deliver(record.clone()));
        effects.push(Effect::Notify(Notice::for_record(&record)));
        self.push_badge(effects);
        if self.settings.sound_enabled {
            effects.push(Effect::PlaySound);
        }
        if record.category().is_incident() {
            effects.push(Effect::IncidentsUpdated { record });
        }
    }

    fn abnormal_close(&mut self, effects: &mut Vec<Effect>) {
        self.release_handle();
        self.state.attempt += 1;

        if self.settings.policy.exhausted(self.state.attempt) {
            let error = LinkError::RetryExhausted {
                attempts: self.state.attempt,
            };
            tracing::warn!(%error, "Notification link giving up");
            self.set_status(ConnectionStatus::GivenUp, effects);
            effects.push(Effect::Notify(
                Notice::warning("Could not reconnect to notifications. Run start to try again.")
                    .persistent(),
            ));
            return;
        }

        self.set_status(ConnectionStatus::Disconnected, effects);

        let delay = self.state.backoff();
        tracing::info!(
            attempt = self.state.attempt,
            max_attempts = self.settings.policy.max_attempts,
            delay_ms = self.state.backoff_ms,
            "Scheduling notification reconnect"
        );
        effects.push(Effect::ScheduleRetry {
            delay,
            epoch: self.state.retry_epoch,
        });
        self.state.backoff_ms = self.settings.policy.grow(self.state.backoff_ms);
    }

    fn disconnect(&mut self, effects: &mut Vec<Effect>) {
        self.state.retry_epoch += 1;
        if let Some(handle) = self.release_handle() {
            tracing::info!(%handle, "Disconnecting notification link");
            effects.push(Effect::Close { handle });
        }
        self.set_status(ConnectionStatus::Disconnected, effects);
    }

    fn send(&mut self, value: &Value, effects: &mut Vec<Effect>) {
        let handle = match (self.state.status, self.state.handle) {
            (ConnectionStatus::Connected, Some(handle)) => handle,
            _ => {
                tracing::debug!(status = %self.state.status, "Not connected; dropping outbound message");
                return;
            }
        };

        match serde_json::to_string(value) {
            Ok(text) => effects.push(Effect::SendFrame { handle, text }),
            Err(error) => tracing::warn!(%error, "Failed to serialize outbound message"),
        }
    }

    fn release_handle(&mut self) -> Option<HandleId> {
        self.credential = None;
        self.state.handle.take()
    }

    fn set_status(&mut self, status: ConnectionStatus, effects: &mut Vec<Effect>) {
        if self.state.status != status {
            self.state.status = status;
            effects.push(Effect::StatusChanged(status));
        }
    }

    fn push_badge(&self, effects: &mut Vec<Effect>) {
        effects.push(Effect::BadgeChanged {
            unread: self.records.unread_count(),
        });
    }
}
