use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/**
 * Everything that can stop a run. None of these are recovered from locally:
 * configuration errors surface before the scheduler starts, divergence and
 * communication failures terminate the run where they are detected.
 */
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("element {element} has no admissible level (stable step estimate {estimate})")]
    UnassignableElement { element: usize, estimate: f64 },

    #[error("found nan: non-finite value at outer step {step}, element {element}, node {node}, field {field}")]
    Divergence {
        step: usize,
        element: usize,
        node: usize,
        field: usize,
    },

    #[error("communication failed: {0}")]
    Communication(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("message codec: {0}")]
    Codec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::Configuration(message.into())
    }

    pub fn comm<S: Into<String>>(message: S) -> Self {
        Error::Communication(message.into())
    }

    /// Process exit status for this class of failure. Divergence gets its own
    /// code so that a batch system can tell a blown-up run from a broken one.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Configuration(_) | Error::UnassignableElement { .. } => 2,
            Error::Divergence { .. } => 3,
            Error::Communication(_) | Error::Timeout(_) | Error::Codec(_) | Error::Io(_) => 4,
        }
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}
