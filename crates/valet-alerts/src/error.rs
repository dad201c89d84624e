use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error(transparent)]
    Store(#[from] valet_store::StoreError),
}

pub type Result<T> = std::result::Result<T, AlertError>;
