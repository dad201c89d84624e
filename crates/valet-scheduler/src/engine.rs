use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::db::TaskStore;
use crate::types::ScheduledTask;

/// Polls for due tasks and forwards claimed ones to the action router.
///
/// The engine only claims and advances; executing the action (reminder,
/// automation, check) happens on the other side of the channel so a slow
/// tool call can never stall the tick loop.
pub struct SchedulerEngine {
    tasks: TaskStore,
    poll: Duration,
    fired_tx: mpsc::Sender<ScheduledTask>,
}

impl SchedulerEngine {
    pub fn new(tasks: TaskStore, poll_secs: u64, fired_tx: mpsc::Sender<ScheduledTask>) -> Self {
        Self {
            tasks,
            poll: Duration::from_secs(poll_secs.max(1)),
            fired_tx,
        }
    }

    /// Main loop. Ticks until `shutdown` flips to true; in-flight claims
    /// finish before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_secs = self.poll.as_secs(), "scheduler engine started");
        let mut interval = tokio::time::interval(self.poll);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn tick(&self) {
        let claimed = match self.tasks.claim_due(Utc::now()) {
            Ok(c) => c,
            Err(e) => {
                // A failed tick is logged and retried next poll.
                error!("scheduler tick error: {e}");
                return;
            }
        };
        for task in claimed {
            info!(task_id = task.id, name = %task.name, "task fired");
            // try_send keeps the tick loop non-blocking; a full router
            // queue drops the occurrence (the next one is already set).
            if self.fired_tx.try_send(task).is_err() {
                warn!("action router channel full or closed; fired task dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskAction;
    use valet_store::Store;

    #[tokio::test]
    async fn engine_fires_due_tasks_and_honours_shutdown() {
        let tasks = TaskStore::new(Store::open_in_memory().unwrap()).unwrap();
        tasks
            .create(
                "ron",
                "once",
                None,
                &TaskAction::Reminder {
                    message: "hello".into(),
                    category: "general".into(),
                },
            )
            .unwrap();
        // Make the one-shot unambiguously due.
        tasks
            .store
            .with(|c| {
                c.execute(
                    "UPDATE scheduled_tasks SET next_run = '2020-01-01T00:00:00+00:00'",
                    [],
                )
            })
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = SchedulerEngine::new(tasks, 1, tx);
        let handle = tokio::spawn(engine.run(shutdown_rx));

        let fired = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("engine should fire within the poll interval")
            .expect("channel open");
        assert_eq!(fired.name, "once");
        assert!(fired.next_run.is_none());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("engine should exit on shutdown")
            .unwrap();
    }
}
