use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::Result;
use crate::state::AlertStore;
use crate::types::Severity;

/// A way to deliver an alert to a human. Implementations return true when
/// the message was handed off successfully.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send(&self, severity: Severity, title: &str, message: &str) -> bool;
}

/// Fans unsent alerts out to every registered channel.
///
/// With no channels registered the alerts simply stay in the database for
/// the assistant to surface during conversations.
pub struct AlertDispatcher {
    alerts: AlertStore,
    channels: Vec<Arc<dyn AlertChannel>>,
}

impl AlertDispatcher {
    pub fn new(alerts: AlertStore) -> Self {
        Self {
            alerts,
            channels: Vec::new(),
        }
    }

    pub fn register_channel(&mut self, channel: Arc<dyn AlertChannel>) {
        self.channels.push(channel);
    }

    /// Send every unsent active alert through the registered channels.
    /// An alert is marked sent as soon as ANY channel succeeds. Channel
    /// failures never stop the sweep. Returns the number dispatched.
    pub async fn dispatch_pending(&self) -> Result<usize> {
        if self.channels.is_empty() {
            return Ok(0);
        }

        let unsent = self.alerts.unsent_alerts()?;
        let mut sent_count = 0;
        for alert in unsent {
            let title = format!(
                "[{}] {}",
                alert.severity.to_string().to_uppercase(),
                alert.alert_key
            );
            if self.dispatch_one(alert.severity, &title, &alert.message).await {
                self.alerts.mark_sent(alert.id)?;
                sent_count += 1;
            }
        }
        if sent_count > 0 {
            info!(count = sent_count, "alerts dispatched");
        }
        Ok(sent_count)
    }

    async fn dispatch_one(&self, severity: Severity, title: &str, message: &str) -> bool {
        let mut any_success = false;
        for channel in &self.channels {
            // A panicking or failing channel must not block the others.
            if channel.send(severity, title, message).await {
                any_success = true;
            } else {
                error!(title, "alert channel reported failure");
            }
        }
        any_success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use valet_store::Store;

    struct RecordingChannel {
        succeed: bool,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        async fn send(&self, _severity: Severity, title: &str, _message: &str) -> bool {
            self.calls.lock().unwrap().push(title.to_string());
            self.succeed
        }
    }

    fn setup() -> (AlertStore, AlertDispatcher) {
        let store = AlertStore::new(Store::open_in_memory().unwrap()).unwrap();
        let dispatcher = AlertDispatcher::new(store.clone());
        (store, dispatcher)
    }

    #[tokio::test]
    async fn no_channels_means_nothing_dispatched() {
        let (alerts, dispatcher) = setup();
        alerts
            .trigger("k", "t", Severity::Critical, "m", None)
            .unwrap();
        assert_eq!(dispatcher.dispatch_pending().await.unwrap(), 0);
        // Alert stays queued for a future channel.
        assert_eq!(alerts.unsent_alerts().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn successful_channel_marks_alerts_sent() {
        let (alerts, mut dispatcher) = setup();
        let channel = Arc::new(RecordingChannel {
            succeed: true,
            calls: Mutex::new(Vec::new()),
        });
        dispatcher.register_channel(channel.clone());
        alerts
            .trigger("svc:down", "service_down", Severity::Critical, "down", None)
            .unwrap();

        assert_eq!(dispatcher.dispatch_pending().await.unwrap(), 1);
        assert!(alerts.unsent_alerts().unwrap().is_empty());
        let calls = channel.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), ["[CRITICAL] svc:down"]);
    }

    #[tokio::test]
    async fn dispatch_happens_exactly_once_per_firing() {
        let (alerts, mut dispatcher) = setup();
        let channel = Arc::new(RecordingChannel {
            succeed: true,
            calls: Mutex::new(Vec::new()),
        });
        dispatcher.register_channel(channel.clone());
        alerts
            .trigger("k", "t", Severity::Warning, "m", None)
            .unwrap();
        dispatcher.dispatch_pending().await.unwrap();
        // Second sweep: nothing new.
        assert_eq!(dispatcher.dispatch_pending().await.unwrap(), 0);
        assert_eq!(channel.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failing_channel_leaves_alert_queued_but_any_success_wins() {
        let (alerts, mut dispatcher) = setup();
        let failing = Arc::new(RecordingChannel {
            succeed: false,
            calls: Mutex::new(Vec::new()),
        });
        dispatcher.register_channel(failing.clone());
        alerts
            .trigger("k", "t", Severity::Warning, "m", None)
            .unwrap();
        assert_eq!(dispatcher.dispatch_pending().await.unwrap(), 0);
        assert_eq!(alerts.unsent_alerts().unwrap().len(), 1);

        // Add a working channel; both get tried, the alert is sent.
        let working = Arc::new(RecordingChannel {
            succeed: true,
            calls: Mutex::new(Vec::new()),
        });
        dispatcher.register_channel(working.clone());
        assert_eq!(dispatcher.dispatch_pending().await.unwrap(), 1);
        assert!(alerts.unsent_alerts().unwrap().is_empty());
        assert_eq!(failing.calls.lock().unwrap().len(), 2);
        assert_eq!(working.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refire_after_resolve_is_dispatched_again() {
        let (alerts, mut dispatcher) = setup();
        let channel = Arc::new(RecordingChannel {
            succeed: true,
            calls: Mutex::new(Vec::new()),
        });
        dispatcher.register_channel(channel.clone());

        alerts.trigger("k", "t", Severity::Critical, "m", None).unwrap();
        dispatcher.dispatch_pending().await.unwrap();
        alerts.resolve("k").unwrap();
        alerts.trigger("k", "t", Severity::Critical, "m", None).unwrap();
        dispatcher.dispatch_pending().await.unwrap();

        assert_eq!(channel.calls.lock().unwrap().len(), 2);
    }
}
