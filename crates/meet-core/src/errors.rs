use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeetError {
    #[error("authentication required: {0}")]
    AuthRequired(String),
    #[error("invalid message format: {0}")]
    MalformedMessage(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),
    #[error("http request failed: {0}")]
    Http(String),
}
