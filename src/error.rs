use std::fmt;

#[derive(Debug)]
pub enum TouchpointError {
    Config(String),
    Url(url::ParseError),
    Json(serde_json::Error),
    Io(std::io::Error),
    Other(String),
}

impl fmt::Display for TouchpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TouchpointError::Config(e) => write!(f, "Config error: {}", e),
            TouchpointError::Url(e) => write!(f, "URL error: {}", e),
            TouchpointError::Json(e) => write!(f, "JSON error: {}", e),
            TouchpointError::Io(e) => write!(f, "IO error: {}", e),
            TouchpointError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for TouchpointError {}

impl From<url::ParseError> for TouchpointError {
    fn from(err: url::ParseError) -> Self {
        TouchpointError::Url(err)
    }
}

impl From<serde_json::Error> for TouchpointError {
    fn from(err: serde_json::Error) -> Self {
        TouchpointError::Json(err)
    }
}

impl From<std::io::Error> for TouchpointError {
    fn from(err: std::io::Error) -> Self {
        TouchpointError::Io(err)
    }
}

impl From<String> for TouchpointError {
    fn from(err: String) -> Self {
        TouchpointError::Other(err)
    }
}

impl From<&str> for TouchpointError {
    fn from(err: &str) -> Self {
        TouchpointError::Other(err.to_string())
    }
}
