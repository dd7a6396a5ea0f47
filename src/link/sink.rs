//! Outbound seams
//!
//! [`NotificationSink`] receives parsed records; [`Notifier`] receives
//! everything the UI shows about the link.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::record::NotificationRecord;
use super::state::ConnectionStatus;
use crate::notice::{badge_label, Notice};

/// Consumer of parsed notifications; must not block
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, record: &NotificationRecord);
}

impl<F> NotificationSink for F
where
    F: Fn(&NotificationRecord) + Send + Sync,
{
    fn deliver(&self, record: &NotificationRecord) {
        self(record)
    }
}

/// Publishes records on a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<NotificationRecord>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationRecord> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl NotificationSink for BroadcastSink {
    fn deliver(&self, record: &NotificationRecord) {
        if self.sender.send(record.clone()).is_err() {
            tracing::trace!(id = %record.id, "No subscribers for notification");
        }
    }
}

/// Delivers each record to every registered sink in order
#[derive(Clone, Default)]
pub struct FanOutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanOutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn push(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl NotificationSink for FanOutSink {
    fn deliver(&self, record: &NotificationRecord) {
        for sink in &self.sinks {
            sink.deliver(record);
        }
    }
}

/// User-facing side effects of the link
pub trait Notifier: Send + Sync {
    /// Show a toast-style notice
    fn notify(&self, notice: &Notice);

    fn connection_status(&self, _status: ConnectionStatus) {}

    /// Unread count changed
    fn badge(&self, _unread: usize) {}

    fn play_sound(&self) {}

    /// An incident notification arrived
    fn incidents_updated(&self, _record: &NotificationRecord) {}
}

/// Notifier that writes everything to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &Notice) {
        use crate::notice::NoticeLevel;

        match notice.level {
            NoticeLevel::Error | NoticeLevel::Danger => tracing::error!(%notice, "Notice"),
            NoticeLevel::Warning => tracing::warn!(%notice, "Notice"),
            _ => tracing::info!(%notice, "Notice"),
        }
    }

    fn connection_status(&self, status: ConnectionStatus) {
        tracing::info!(%status, "Connection status");
    }

    fn badge(&self, unread: usize) {
        tracing::debug!(unread, badge = ?badge_label(unread), "Badge updated");
    }

    fn incidents_updated(&self, record: &NotificationRecord) {
        tracing::info!(id = %record.id, kind = %record.kind, "Incidents updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(id: &str) -> NotificationRecord {
        NotificationRecord::parse(&format!(r#"{{"id":"{}"}}"#, id), String::new, Utc::now())
            .unwrap()
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let sink = move |_: &NotificationRecord| {
            counter.fetch_add(1, Ordering::SeqCst);
        };
        sink.deliver(&record("a"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fan_out_reaches_every_sink() {
        let seen = Arc::new(AtomicUsize::new(0));
        let (a, b) = (seen.clone(), seen.clone());
        let sink = FanOutSink::new()
            .with(move |_: &NotificationRecord| {
                a.fetch_add(1, Ordering::SeqCst);
            })
            .with(move |_: &NotificationRecord| {
                b.fetch_add(10, Ordering::SeqCst);
            });

        assert_eq!(sink.len(), 2);
        sink.deliver(&record("a"));
        assert_eq!(seen.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_broadcast_sink() {
        let sink = BroadcastSink::new(8);
        sink.deliver(&record("dropped"));

        let mut rx = sink.subscribe();
        assert_eq!(sink.receiver_count(), 1);
        sink.deliver(&record("kept"));
        assert_eq!(rx.recv().await.unwrap().id, "kept");
    }
}
