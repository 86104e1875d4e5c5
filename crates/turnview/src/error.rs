use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("response text is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
