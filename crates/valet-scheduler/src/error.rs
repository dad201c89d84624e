use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression '{0}'")]
    InvalidCron(String),

    #[error("task not found: {id}")]
    TaskNotFound { id: i64 },

    #[error("invalid action payload: {0}")]
    InvalidAction(String),

    #[error(transparent)]
    Store(#[from] valet_store::StoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
