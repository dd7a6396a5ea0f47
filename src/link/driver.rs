//! Link driver
//!
//! Runs a [`LinkMachine`] on a single tokio task. Commands from
//! [`NotificationLink`], socket events and timer fires all arrive through
//! one mailbox, so the machine only ever has one writer.

use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::error::{LinkError, LinkResult};
use super::machine::{Effect, LinkEvent, LinkMachine, LinkSettings, ResumeTrigger};
use super::record::NotificationRecord;
use super::sink::{NotificationSink, Notifier};
use super::state::{ConnectionStatus, HandleId};
use super::timer::TimerFacility;
use super::transport::{SocketHandle, Transport, TransportEvents};
use crate::auth::{AuthContext, AuthSnapshot};
use crate::endpoint::EndpointResolver;
use crate::preferences::PreferencesStore;

/// Mailbox entries
#[derive(Debug)]
pub(crate) enum Command {
    Start,
    Resume(ResumeTrigger),
    RefreshSession,
    RetryFired(u64),
    SetSoundEnabled(bool),
    Event(LinkEvent),
    Snapshot(oneshot::Sender<LinkSnapshot>),
    Notifications {
        unread_only: bool,
        reply: oneshot::Sender<Vec<NotificationRecord>>,
    },
    Shutdown,
}

/// Read-only view of the link for status displays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkSnapshot {
    pub status: ConnectionStatus,
    pub attempt: u32,
    pub backoff_ms: u64,
    pub unread: usize,
    pub retained: usize,
    pub sound_enabled: bool,
}

/// Collaborators the driver executes effects against
#[derive(Clone)]
pub struct LinkServices {
    pub auth: Arc<dyn AuthContext>,
    pub transport: Arc<dyn Transport>,
    pub timer: Arc<dyn TimerFacility>,
    pub sink: Arc<dyn NotificationSink>,
    pub notifier: Arc<dyn Notifier>,
    /// Where the sound flag is persisted, if anywhere
    pub preferences: Option<PreferencesStore>,
}

/// Cloneable handle to a running link
///
/// All methods return immediately; the driver task applies them in order.
/// When every handle is dropped the driver disconnects and exits.
#[derive(Debug, Clone)]
pub struct NotificationLink {
    sender: mpsc::UnboundedSender<Command>,
}

impl NotificationLink {
    /// Spawn the driver task on the current runtime
    pub fn spawn(
        settings: LinkSettings,
        resolver: EndpointResolver,
        services: LinkServices,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let actor = LinkActor::new(settings, resolver, services, sender.downgrade());
        let task = tokio::spawn(actor.run(receiver));
        (Self { sender }, task)
    }

    /// Connect if a session is active
    pub fn start(&self) -> LinkResult<()> {
        self.send_command(Command::Start)
    }

    /// The page regained focus or visibility
    pub fn resume(&self, trigger: ResumeTrigger) -> LinkResult<()> {
        self.send_command(Command::Resume(trigger))
    }

    /// Re-read the session after a login, logout or token refresh
    pub fn refresh_session(&self) -> LinkResult<()> {
        self.send_command(Command::RefreshSession)
    }

    pub fn disconnect(&self) -> LinkResult<()> {
        self.send_command(Command::Event(LinkEvent::Disconnect))
    }

    /// Send a JSON message if connected; dropped otherwise
    pub fn send(&self, message: Value) -> LinkResult<()> {
        self.send_command(Command::Event(LinkEvent::Send(message)))
    }

    pub fn mark_read(&self, id: impl Into<String>) -> LinkResult<()> {
        self.send_command(Command::Event(LinkEvent::MarkRead(id.into())))
    }

    pub fn mark_all_read(&self) -> LinkResult<()> {
        self.send_command(Command::Event(LinkEvent::MarkAllRead))
    }

    pub fn clear(&self) -> LinkResult<()> {
        self.send_command(Command::Event(LinkEvent::ClearNotifications))
    }

    /// Toggle the sound cue; persisted when a preference store is configured
    pub fn set_sound_enabled(&self, enabled: bool) -> LinkResult<()> {
        self.send_command(Command::SetSoundEnabled(enabled))
    }

    /// Disconnect and stop the driver task
    pub fn shutdown(&self) -> LinkResult<()> {
        self.send_command(Command::Shutdown)
    }

    pub async fn snapshot(&self) -> LinkResult<LinkSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::Snapshot(reply))?;
        rx.await.map_err(|_| LinkError::Shutdown)
    }

    pub async fn unread_notifications(&self) -> LinkResult<Vec<NotificationRecord>> {
        self.notifications(true).await
    }

    pub async fn all_notifications(&self) -> LinkResult<Vec<NotificationRecord>> {
        self.notifications(false).await
    }

    async fn notifications(&self, unread_only: bool) -> LinkResult<Vec<NotificationRecord>> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::Notifications { unread_only, reply })?;
        rx.await.map_err(|_| LinkError::Shutdown)
    }

    fn send_command(&self, command: Command) -> LinkResult<()> {
        self.sender.send(command).map_err(|_| LinkError::Shutdown)
    }
}

struct LinkActor {
    machine: LinkMachine,
    resolver: EndpointResolver,
    services: LinkServices,
    socket: Option<(HandleId, Box<dyn SocketHandle>)>,
    mailbox: mpsc::WeakUnboundedSender<Command>,
}

impl LinkActor {
    fn new(
        mut settings: LinkSettings,
        resolver: EndpointResolver,
        services: LinkServices,
        mailbox: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        if let Some(store) = &services.preferences {
            match store.sound_enabled() {
                Ok(enabled) => settings.sound_enabled = enabled,
                Err(e) => tracing::warn!(error = %e, "Failed to load preferences; using defaults"),
            }
        }

        Self {
            machine: LinkMachine::new(settings),
            resolver,
            services,
            socket: None,
            mailbox,
        }
    }

    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!("Notification link driver started");

        while let Some(command) = receiver.recv().await {
            match command {
                Command::Start => {
                    let auth = self.auth();
                    self.apply(LinkEvent::Start(auth));
                }
                Command::Resume(trigger) => {
                    let auth = self.auth();
                    self.apply(LinkEvent::Resume { trigger, auth });
                }
                Command::RefreshSession => {
                    let auth = self.auth();
                    self.apply(LinkEvent::SessionChanged(auth));
                }
                Command::RetryFired(epoch) => {
                    let auth = self.auth();
                    self.apply(LinkEvent::RetryDue { epoch, auth });
                }
                Command::SetSoundEnabled(enabled) => {
                    if let Some(store) = &self.services.preferences {
                        if let Err(e) = store.set_sound_enabled(enabled) {
                            tracing::warn!(error = %e, "Failed to persist sound preference");
                        }
                    }
                    self.apply(LinkEvent::SetSoundEnabled(enabled));
                }
                Command::Event(event) => self.apply(event),
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Notifications { unread_only, reply } => {
                    let records = if unread_only {
                        self.machine.records().unread()
                    } else {
                        self.machine.records().all()
                    };
                    let _ = reply.send(records);
                }
                Command::Shutdown => break,
            }
        }

        self.apply(LinkEvent::Disconnect);
        tracing::debug!("Notification link driver stopped");
    }

    fn auth(&self) -> AuthSnapshot {
        if let Err(e) = self.services.auth.reload() {
            tracing::warn!(error = %e, "Failed to reload session; using the cached one");
        }
        AuthSnapshot::capture(self.services.auth.as_ref())
    }

    fn snapshot(&self) -> LinkSnapshot {
        let state = self.machine.state();
        LinkSnapshot {
            status: state.status,
            attempt: state.attempt,
            backoff_ms: state.backoff_ms,
            unread: self.machine.unread_count(),
            retained: self.machine.records().len(),
            sound_enabled: self.machine.sound_enabled(),
        }
    }

    /// Feed one event through the machine, including any follow-up events
    /// its effects produce
    fn apply(&mut self, event: LinkEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for effect in self.machine.handle(event) {
                if let Some(follow_up) = self.execute(effect) {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    fn execute(&mut self, effect: Effect) -> Option<LinkEvent> {
        match effect {
            Effect::Open { handle, credential } => self.open(handle, credential.as_deref()),
            Effect::Close { handle } => {
                match self.socket.take() {
                    Some((live, mut socket)) if live == handle => socket.close(),
                    other => self.socket = other,
                }
                None
            }
            Effect::SendFrame { handle, text } => match &self.socket {
                Some((live, socket)) if *live == handle => socket
                    .send_text(text)
                    .err()
                    .map(|error| LinkEvent::TransportError { handle, error }),
                _ => None,
            },
            Effect::ScheduleRetry { delay, epoch } => {
                let mailbox = self.mailbox.clone();
                self.services.timer.schedule(
                    delay,
                    Box::new(move || {
                        if let Some(sender) = mailbox.upgrade() {
                            let _ = sender.send(Command::RetryFired(epoch));
                        }
                    }),
                );
                None
            }
            Effect::Deliver(record) => {
                self.services.sink.deliver(&record);
                None
            }
            Effect::Notify(notice) => {
                self.services.notifier.notify(&notice);
                None
            }
            Effect::StatusChanged(status) => {
                self.services.notifier.connection_status(status);
                None
            }
            Effect::BadgeChanged { unread } => {
                self.services.notifier.badge(unread);
                None
            }
            Effect::PlaySound => {
                self.services.notifier.play_sound();
                None
            }
            Effect::IncidentsUpdated { record } => {
                self.services.notifier.incidents_updated(&record);
                None
            }
        }
    }

    fn open(&mut self, handle: HandleId, credential: Option<&str>) -> Option<LinkEvent> {
        // The machine closes the previous handle before asking for a new one
        if let Some((stale, mut socket)) = self.socket.take() {
            tracing::warn!(%stale, "Replacing a socket that was not closed");
            socket.close();
        }

        let endpoint = match self.resolver.resolve() {
            Ok(endpoint) => endpoint,
            Err(error) => return Some(LinkEvent::OpenFailed { handle, error }),
        };
        tracing::debug!(%handle, url = %endpoint.url, source = ?endpoint.source, "Connecting notification socket");

        let events = TransportEvents::new(handle, self.mailbox.clone());
        match self
            .services
            .transport
            .open(&endpoint.with_credential(credential), events)
        {
            Ok(socket) => {
                self.socket = Some((handle, socket));
                None
            }
            Err(error) => Some(LinkEvent::OpenFailed { handle, error }),
        }
    }
}
