use std::{io, num::TryFromIntError};

use culprit::Culprit;

pub type Result<T> = culprit::Result<T, DirErr>;

#[derive(Debug, thiserror::Error)]
pub enum DirErr {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigErr),

    #[error("File `{0}` already exists")]
    AlreadyExists(String),

    #[error("File `{0}` not found")]
    NotFound(String),

    #[error("Output `{0}` is closed")]
    ClosedStream(String),

    #[error("File `{0}` is still open for writing")]
    StillOpen(String),

    #[error("Directory is closed")]
    AlreadyClosed,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}

impl DirErr {
    pub fn is_not_found(&self) -> bool {
        match self {
            DirErr::NotFound(_) => true,
            DirErr::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        match self {
            DirErr::AlreadyExists(_) => true,
            DirErr::Io(err) => err.kind() == io::ErrorKind::AlreadyExists,
            _ => false,
        }
    }
}

impl From<TryFromIntError> for DirErr {
    fn from(err: TryFromIntError) -> Self {
        DirErr::Io(io::Error::new(io::ErrorKind::InvalidInput, err))
    }
}

impl<T> From<DirErr> for culprit::Result<T, DirErr> {
    fn from(err: DirErr) -> culprit::Result<T, DirErr> {
        Err(Culprit::new(err))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigErr {
    #[error("`{field}` must be a finite number greater than zero, got {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}
