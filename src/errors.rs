use thiserror::Error;

/// Failure of a single gateway operation.
///
/// Everything except `InvalidArgument` is an expected runtime condition and is
/// handed back to the caller as a value.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network failure, timeout, or a body that could not be decoded.
    #[error("{message}")]
    Transport { message: String },

    /// The gateway answered with a non-2xx status.
    #[error("{message}")]
    Remote { status: u16, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl GatewayError {
    pub fn transport(message: impl Into<String>) -> Self {
        GatewayError::Transport {
            message: message.into(),
        }
    }

    /// HTTP status of the failed call, if the gateway answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            GatewayError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => GatewayError::Remote {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None => GatewayError::transport(e.to_string()),
        }
    }
}

impl From<reqwest_middleware::Error> for GatewayError {
    fn from(e: reqwest_middleware::Error) -> Self {
        match e {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            reqwest_middleware::Error::Middleware(e) => GatewayError::transport(format!("{:#}", e)),
        }
    }
}

/// Failure to read the roster backing store.
#[derive(Debug, Error)]
pub enum RosterError {
    #[error("roster file {path} could not be read: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("roster file {path} is malformed: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
}
