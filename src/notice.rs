//! User-Visible Notices
//!
//! Toast-style messages the link raises for the UI: connection
//! acknowledgements, warnings, and the display form of incoming
//! notifications. Rendering is left to whoever implements
//! [`crate::link::Notifier`].

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::link::{IncidentEvent, NotificationKind, NotificationRecord};

/// How long an incoming notification stays on screen
pub const NOTIFICATION_DISPLAY_MS: u64 = 8000;

/// Badge counts above this are shown as `99+`
const BADGE_LIMIT: usize = 99;

/// Visual level of a notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Error,
    Warning,
    Info,
    Primary,
    Secondary,
    Danger,
}

impl NoticeLevel {
    /// Auto-dismiss delay when none is given
    pub fn default_duration(&self) -> Duration {
        let ms = match self {
            NoticeLevel::Error | NoticeLevel::Danger => 5000,
            NoticeLevel::Warning => 4000,
            _ => 3000,
        };
        Duration::from_millis(ms)
    }

    pub fn default_icon(&self) -> &'static str {
        match self {
            NoticeLevel::Success => "check-circle",
            NoticeLevel::Error | NoticeLevel::Danger => "exclamation-triangle",
            NoticeLevel::Warning => "exclamation-circle",
            _ => "info-circle",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeLevel::Success => "success",
            NoticeLevel::Error => "error",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Info => "info",
            NoticeLevel::Primary => "primary",
            NoticeLevel::Secondary => "secondary",
            NoticeLevel::Danger => "danger",
        }
    }
}

/// A toast-style message for the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: Option<String>,
    pub message: String,
    pub icon: &'static str,
    /// `None` keeps the notice until the user dismisses it
    pub duration: Option<Duration>,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            title: None,
            message: message.into(),
            icon: level.default_icon(),
            duration: Some(level.default_duration()),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_icon(mut self, icon: &'static str) -> Self {
        self.icon = icon;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn persistent(mut self) -> Self {
        self.duration = None;
        self
    }

    pub fn is_persistent(&self) -> bool {
        self.duration.is_none()
    }

    /// Display form of an incoming notification
    pub fn for_record(record: &NotificationRecord) -> Self {
        let style = NotificationStyle::for_record(record);
        Self::new(style.level, record.message.clone())
            .with_title(record.title.clone())
            .with_icon(style.icon)
            .with_duration(Duration::from_millis(NOTIFICATION_DISPLAY_MS))
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.title {
            Some(title) => write!(f, "[{}] {}: {}", self.level.as_str(), title, self.message),
            None => write!(f, "[{}] {}", self.level.as_str(), self.message),
        }
    }
}

/// Level and icon used to show a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationStyle {
    pub level: NoticeLevel,
    pub icon: &'static str,
}

impl NotificationStyle {
    pub fn for_record(record: &NotificationRecord) -> Self {
        Self::resolve(&record.category(), record.priority.as_deref())
    }

    /// High priority always wins over the kind's own level
    pub fn resolve(kind: &NotificationKind, priority: Option<&str>) -> Self {
        let (level, icon) = match kind {
            NotificationKind::Incident(Some(IncidentEvent::Created)) => {
                (NoticeLevel::Primary, "plus-circle")
            }
            NotificationKind::Incident(Some(IncidentEvent::Assigned)) => {
                (NoticeLevel::Info, "user-check")
            }
            NotificationKind::Incident(Some(IncidentEvent::Updated)) => {
                (NoticeLevel::Warning, "edit")
            }
            NotificationKind::Incident(Some(IncidentEvent::Resolved)) => {
                (NoticeLevel::Success, "check-circle")
            }
            NotificationKind::Incident(Some(IncidentEvent::Closed)) => {
                (NoticeLevel::Secondary, "times-circle")
            }
            NotificationKind::Success => (NoticeLevel::Success, "check-circle"),
            NotificationKind::Error => (NoticeLevel::Error, "exclamation-triangle"),
            NotificationKind::Warning => (NoticeLevel::Warning, "exclamation-circle"),
            _ => (NoticeLevel::Info, "bell"),
        };

        let level = if priority.map(is_high_priority).unwrap_or(false) {
            NoticeLevel::Danger
        } else {
            level
        };

        Self { level, icon }
    }
}

fn is_high_priority(priority: &str) -> bool {
    matches!(
        priority.trim().to_ascii_uppercase().as_str(),
        "ALTA" | "HIGH"
    )
}

/// Text for the unread badge; `None` hides it
pub fn badge_label(unread: usize) -> Option<String> {
    match unread {
        0 => None,
        n if n > BADGE_LIMIT => Some(format!("{}+", BADGE_LIMIT)),
        n => Some(n.to_string()),
    }
}
