use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error(transparent)]
    Store(#[from] valet_store::StoreError),

    #[error(transparent)]
    User(#[from] valet_users::UserError),

    #[error("fact not found: {id}")]
    FactNotFound { id: i64 },
}

pub type Result<T> = std::result::Result<T, MemoryError>;
