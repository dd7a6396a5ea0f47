//! # incident-notify
//!
//! Live-notification client for the incident desk. Keeps one WebSocket
//! open per signed-in session, reconnects with capped exponential backoff,
//! and turns inbound payloads into notification records and UI notices.
//!
//! ## Modules
//!
//! - [`link`]: the notification link state machine and its tokio driver
//! - [`endpoint`]: environment detection and WebSocket address resolution
//! - [`auth`]: session store and the auth context the link consults
//! - [`notice`]: toast-style notices and notification styling
//! - [`preferences`]: persisted user toggles
//! - [`config`]: TOML + environment configuration
//! - [`logging`]: tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use incident_notify::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let session = Arc::new(SessionStore::open(config.storage.session_path())?);
//!     let sink = BroadcastSink::new(64);
//!     let mut notifications = sink.subscribe();
//!
//!     let services = LinkServices {
//!         auth: session,
//!         transport: Arc::new(WsTransport::new()),
//!         timer: Arc::new(TokioTimer),
//!         sink: Arc::new(sink),
//!         notifier: Arc::new(LogNotifier),
//!         preferences: None,
//!     };
//!     let (link, _task) = NotificationLink::spawn(
//!         LinkSettings::from_config(&config.link),
//!         EndpointResolver::from_config(&config.endpoint),
//!         services,
//!     );
//!
//!     link.start()?;
//!     while let Ok(record) = notifications.recv().await {
//!         println!("{}: {}", record.title, record.message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod endpoint;
pub mod link;
pub mod logging;
pub mod notice;
pub mod preferences;

// Re-export top-level types for convenience
pub use link::{
    BackoffPolicy, BroadcastSink, ConnectionState, ConnectionStatus, Effect, FanOutSink,
    HandleId, LinkError, LinkEvent, LinkMachine, LinkResult, LinkServices, LinkSettings,
    LinkSnapshot, LogNotifier, NotificationLink, NotificationRecord, NotificationSink, Notifier,
    RecordLog, ResumeTrigger, SocketHandle, TimerFacility, TokioTimer, Transport,
    TransportEvents, WsTransport,
};

pub use auth::{AuthContext, AuthSnapshot, Role, Session, SessionError, SessionStore, StaticCredential, UserInfo};

pub use endpoint::{EndpointResolver, EndpointSource, Environment, PageMeta, ResolvedEndpoint};

pub use notice::{badge_label, Notice, NoticeLevel, NotificationStyle};

pub use preferences::{Preferences, PreferencesError, PreferencesStore};

pub use config::{Config, ConfigError, EndpointConfig, LinkConfig, LoggingConfig, StorageConfig};
