use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("A name is required")]
    MissingName,

    #[error("Invalid email address: {0:?}")]
    InvalidEmail(String),

    #[error("Message is empty")]
    EmptyMessage,
}
