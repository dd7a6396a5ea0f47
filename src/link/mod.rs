//! Notification Link
//!
//! Session-scoped WebSocket client for live incident notifications.
//!
//! ## Layout
//!
//! - [`machine`]: pure transition function `(state, event) -> effects`
//! - [`driver`]: tokio task that executes effects and owns the socket
//! - [`transport`], [`timer`], [`sink`]: injected collaborators
//! - [`record`]: inbound payload normalization and the retained list
//!
//! ## Reconnect policy
//!
//! An abnormal close bumps `attempt` and schedules a retry after the
//! current backoff (3s, then x1.5, capped at 30s). Once `attempt` reaches
//! the configured maximum the link gives up until an explicit start. A
//! successful open resets both counters.

pub mod driver;
pub mod error;
pub mod machine;
pub mod record;
pub mod sink;
pub mod state;
pub mod timer;
pub mod transport;

pub use driver::{LinkServices, LinkSnapshot, NotificationLink};
pub use error::{LinkError, LinkResult};
pub use machine::{Effect, LinkEvent, LinkMachine, LinkSettings, ResumeTrigger};
pub use record::{
    IncidentEvent, NotificationKind, NotificationRecord, RecordLog, DEFAULT_KIND, DEFAULT_TITLE,
};
pub use sink::{BroadcastSink, FanOutSink, LogNotifier, NotificationSink, Notifier};
pub use state::{BackoffPolicy, ConnectionState, ConnectionStatus, HandleId};
pub use timer::{TimerCallback, TimerFacility, TokioTimer};
pub use transport::{SocketHandle, Transport, TransportEvents, WsTransport, CONNECT_TIMEOUT};
