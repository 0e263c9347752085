use std::{path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("no artifact url registered for key `{0}`")]
    MissingKey(String),
    #[error("artifact transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("artifact store answered {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },
    #[error("failed to write artifact to {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact fetch timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("detection model failed: {0}")]
    Model(String),
    #[error("detection timed out after {0:?}")]
    Timeout(Duration),
    #[error("detection worker failed: {0}")]
    Worker(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("label line {line} has {fields} fields, expected at least 5")]
    Malformed { line: usize, fields: usize },
    #[error("label line {line} has invalid {field} `{value}`")]
    InvalidNumber {
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error("label line {line} references unknown class id {class_id}")]
    UnknownClass { line: usize, class_id: usize },
}

#[derive(Error, Debug)]
#[error("failed to remove temporary artifact {path:?}: {source}")]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("invalid task: {0}")]
    InvalidTask(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Invocation(#[from] InvocationError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("failed to read label file {path:?}: {source}")]
    LabelFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write output {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}
