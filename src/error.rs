use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("controller returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed controller response: {0}")]
    Decode(#[source] reqwest::Error),
}

impl ControllerError {
    pub fn is_timeout(&self) -> bool {
        match self {
            ControllerError::Transport(e) => e.is_timeout(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("cannot read mask file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed mask file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("polygon {index} in {path}: {reason}")]
    InvalidPolygon {
        path: String,
        index: usize,
        reason: String,
    },
}
