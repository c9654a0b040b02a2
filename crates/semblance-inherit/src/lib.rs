//! Digital-will execution for Semblance.
//!
//! A trusted party holds an encrypted activation package. Presenting the
//! package with the right passphrase opens a time-locked activation;
//! after the lock expires, the pre-authorized actions execute in order,
//! each one audited. Destructive actions can additionally demand that
//! every trusted party has activated (deletion consensus). The
//! process-wide inheritance guard blocks all other activity while any
//! activation is live.

#![forbid(unsafe_code)]

mod activation;
mod package;
mod party;

pub use activation::{
    ActionDisposition, Activation, ActivationState, InheritanceConfig, InheritanceEngine,
    SimulatedStep,
};
pub use package::{
    open_package, seal_package, EncryptedActivationPackage, PackageContents, PackageHeader,
    PackagePayload, PACKAGE_VERSION_LEGACY, PACKAGE_VERSION_V2,
};
pub use party::{ActionCategory, InheritanceAction, TrustedParty};

use semblance_proto::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InheritError {
    #[error("unknown trusted party '{0}'")]
    UnknownParty(String),

    #[error("unknown activation '{0}'")]
    UnknownActivation(String),

    #[error("passphrase does not match")]
    PassphraseInvalid,

    #[error("activation package is invalid or corrupt: {0}")]
    PackageInvalidOrCorrupt(String),

    #[error("party '{0}' already has a live activation")]
    ActivationExists(String),

    #[error("cancellation is only permitted while time-locked")]
    CancelTooLate,

    #[error("time lock has not expired yet")]
    TimeLockActive,

    #[error("activation is in state '{0}', operation not permitted")]
    InvalidState(ActivationState),
}

impl InheritError {
    /// Stable taxonomy code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownParty(_) | Self::UnknownActivation(_) => ErrorCode::InvalidState,
            Self::PassphraseInvalid => ErrorCode::PassphraseInvalid,
            Self::PackageInvalidOrCorrupt(_) => ErrorCode::PackageInvalidOrCorrupt,
            Self::ActivationExists(_) => ErrorCode::ActivationExists,
            Self::CancelTooLate => ErrorCode::CancelTooLate,
            Self::TimeLockActive | Self::InvalidState(_) => ErrorCode::InvalidState,
        }
    }
}

pub type InheritResult<T> = Result<T, InheritError>;
