#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Not enough bytes")]
    NotEnoughData { actual: usize, minimum: usize },
    #[error("Invalid length {actual}, expected {expected}")]
    InvalidLength { actual: usize, expected: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Config(String),

    /// Integrity check or correct error executing the algorithm.
    #[error("integrity algorithm error: {0}")]
    IntegrityAlgorithm(String),

    /// The downstream transport stream consumer went away.
    #[error("transport sink closed")]
    SinkClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
