use crate::driver::DriverError;
use crate::oracle::OracleError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Timed out after {0:?} while {1}")]
    Timeout(std::time::Duration, String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Other error: {0}")]
    Other(String),
}

impl ScanError {
    /// Only a browser that never came up aborts a run; everything else is
    /// contained at page or element scope.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::Launch(_) | ScanError::Driver(DriverError::Launch(_)))
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
