use thiserror::Error;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("user not found: {id}")]
    NotFound { id: String },

    #[error(transparent)]
    Store(#[from] valet_store::StoreError),

    #[error("invalid user data: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, UserError>;
