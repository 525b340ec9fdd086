//! Engine error type.

use thiserror::Error;

/// Errors that prevent a scan from starting. Once a scan is running,
/// nothing is fatal: failures are absorbed, counted, and reported.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("event is not fully configured: missing {0}")]
    NotConfigured(&'static str),
}
