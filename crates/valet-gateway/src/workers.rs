//! Background workers owned by the process lifespan.
//!
//! Each loop follows the same shape: tick on an interval, bail out when
//! the shutdown channel flips, log-and-continue on errors. Nothing here
//! may take the process down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use valet_agent::audit::{cleanup_tool_usage, execute_and_log_tool};
use valet_agent::ToolRegistry;
use valet_alerts::{AlertChannel, AlertDispatcher, Severity};
use valet_core::types::UserRole;
use valet_notify::Notifier;
use valet_scheduler::{NotifyOn, ScheduledTask, TaskAction};
use valet_store::Store;
use valet_users::UserStore;

const ALERT_DISPATCH_SECS: u64 = 60;
const RETENTION_SWEEP_SECS: u64 = 24 * 60 * 60;
const SCHEDULER_CHANNEL: &str = "scheduler";

/// Executes fired tasks coming off the scheduler engine's channel.
pub async fn run_action_router(
    mut fired_rx: mpsc::Receiver<ScheduledTask>,
    registry: ToolRegistry,
    notifier: Option<Arc<Notifier>>,
    store: Store,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("action router started");
    loop {
        tokio::select! {
            task = fired_rx.recv() => {
                let Some(task) = task else { break };
                // A failing action is logged; next_run already advanced,
                // so the next occurrence will be tried regardless.
                execute_action(&task, &registry, notifier.as_ref(), &store).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("action router shutting down");
                    break;
                }
            }
        }
    }
}

async fn execute_action(
    task: &ScheduledTask,
    registry: &ToolRegistry,
    notifier: Option<&Arc<Notifier>>,
    store: &Store,
) {
    match &task.action {
        TaskAction::Reminder { message, category } => {
            let Some(notifier) = notifier else {
                warn!(task_id = task.id, "reminder fired but no notifier configured");
                return;
            };
            match notifier.send_message(&task.user_id, message, category).await {
                Ok(outcome) => info!(task_id = task.id, %outcome, "reminder handled"),
                Err(e) => error!(task_id = task.id, error = %e, "reminder failed"),
            }
        }

        TaskAction::Automation { tool, params } => {
            let result = execute_and_log_tool(
                tool,
                params.clone(),
                registry,
                Some(store),
                Some(&task.user_id),
                Some(SCHEDULER_CHANNEL),
            )
            .await;
            info!(task_id = task.id, tool, head = %result.chars().take(80).collect::<String>(),
                  "automation executed");
        }

        TaskAction::Check { tool, params, notify_on } => {
            let result = execute_and_log_tool(
                tool,
                params.clone(),
                registry,
                Some(store),
                Some(&task.user_id),
                Some(SCHEDULER_CHANNEL),
            )
            .await;
            let Some(matched) = check_triggers(&result, *notify_on) else {
                return;
            };
            let Some(notifier) = notifier else {
                warn!(task_id = task.id, "check tripped but no notifier configured");
                return;
            };
            let message = format!("Check '{}': {matched}", task.name);
            match notifier.send_message(&task.user_id, &message, "general").await {
                Ok(outcome) => info!(task_id = task.id, %outcome, "check notification handled"),
                Err(e) => error!(task_id = task.id, error = %e, "check notification failed"),
            }
        }
    }
}

/// Decide whether a check result crosses the notify threshold; returns
/// the line to report. WARNING matches on warning or critical markers,
/// CRITICAL only on critical, ALWAYS reports the first line regardless.
pub(crate) fn check_triggers(result: &str, notify_on: NotifyOn) -> Option<String> {
    let upper_match = |needles: &[&str]| {
        result.lines().find(|line| {
            let u = line.to_uppercase();
            needles.iter().any(|n| u.contains(n))
        })
    };
    match notify_on {
        NotifyOn::Always => result
            .lines()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.to_string()),
        NotifyOn::Critical => upper_match(&["CRITICAL"]).map(|l| l.to_string()),
        NotifyOn::Warning => upper_match(&["WARNING", "CRITICAL"]).map(|l| l.to_string()),
    }
}

/// Periodic sweep over unsent alerts.
pub async fn run_alert_dispatch(
    dispatcher: Arc<AlertDispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("alert dispatch loop started");
    let mut interval = tokio::time::interval(Duration::from_secs(ALERT_DISPATCH_SECS));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = dispatcher.dispatch_pending().await {
                    error!("alert dispatch error: {e}");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("alert dispatch loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Daily audit-log retention sweep. The first tick fires immediately so
/// startup cleans anything stale.
pub async fn run_audit_retention(
    store: Store,
    retention_days: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(RETENTION_SWEEP_SECS));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = cleanup_tool_usage(&store, retention_days) {
                    error!("audit retention sweep failed: {e}");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Alert channel that pushes to phone-configured admins through the
/// notification gateway.
pub struct AdminNotifyChannel {
    users: UserStore,
    notifier: Arc<Notifier>,
}

impl AdminNotifyChannel {
    pub fn new(users: UserStore, notifier: Arc<Notifier>) -> Self {
        Self { users, notifier }
    }
}

#[async_trait]
impl AlertChannel for AdminNotifyChannel {
    async fn send(&self, _severity: Severity, title: &str, message: &str) -> bool {
        let admins = match self.users.list() {
            Ok(users) => users,
            Err(e) => {
                error!(error = %e, "admin lookup failed for alert channel");
                return false;
            }
        };
        let mut any = false;
        for admin in admins
            .iter()
            .filter(|u| u.role == UserRole::Admin && u.has_phone())
        {
            let text = format!("{title}\n{message}");
            match self.notifier.send_message(&admin.id, &text, "general").await {
                Ok(outcome) if outcome.delivered() => any = true,
                Ok(outcome) => warn!(user_id = %admin.id, %outcome, "alert notification skipped"),
                Err(e) => error!(user_id = %admin.id, error = %e, "alert notification failed"),
            }
        }
        any
    }
}
