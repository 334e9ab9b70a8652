use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("missing field: apiKey")]
    MissingApiKey,

    #[error("apiKey must be a string")]
    InvalidApiKey,

    #[error("missing Content-Length header")]
    MissingContentLength,

    #[error("invalid Content-Length header: {0}")]
    InvalidContentLength(String),

    #[error("request body too large: {size} bytes (limit {limit})")]
    BodyTooLarge { size: u64, limit: u64 },

    #[error("failed to read request body: {0}")]
    BodyError(String),

    #[error("upstream request failed: {}", error_chain(.0))]
    HttpError(#[from] reqwest::Error),

    #[error("upstream request timed out after {0}s")]
    UpstreamTimeout(u64),

    #[error("Clova API returned {0}")]
    UpstreamStatus(u16),
}

impl RelayError {
    pub fn config(msg: impl Into<String>) -> Self {
        RelayError::ConfigError(msg.into())
    }

    pub fn body(msg: impl std::fmt::Display) -> Self {
        RelayError::BodyError(msg.to_string())
    }
}

/// 拼接错误及其全部 source，保留底层原因
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}
