//! Domain errors raised by the MFA profile workflow.
//!
//! Failures coming from the AWS SDK or the filesystem are not listed here; they travel
//! through `anyhow` with context attached at the call site.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MfaError {
    /// One or more startup requirements are not met.
    #[error("Startup checks failed:\n  - {}", .0.join("\n  - "))]
    Preflight(Vec<String>),

    #[error("User {user} doesn't seem to have any MFA devices configured")]
    NoMfaDevice { user: String },

    /// Picking one device out of several is not supported.
    #[error(
        "User {user} has {count} MFA devices available, only users with a single MFA device are supported"
    )]
    MultipleMfaDevices { user: String, count: usize },

    #[error("Malformed credentials file: {0}")]
    Parse(String),

    #[error("Cannot extract a user name from caller identity `{0}`")]
    UnexpectedArn(String),
}
