//! Enforcement mode

use crate::error::FilterResult;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Whether violations abort the offending call
///
/// The sandbox starts sealed. Unsealed exists for local diagnostics only: a
/// violation is logged as a warning and the call proceeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    /// Violations abort the call
    #[default]
    Sealed,
    /// Violations are logged and the call proceeds
    Unsealed,
}

impl Enforcement {
    /// Whether violations are fatal
    #[inline]
    #[must_use]
    pub fn is_sealed(self) -> bool {
        matches!(self, Self::Sealed)
    }

    /// Pass a check result through the mode
    ///
    /// Sealed returns the result unchanged. Unsealed turns an error into a
    /// warning naming `what` and reports success.
    ///
    /// # Errors
    /// The original error, when sealed
    pub fn enforce(self, result: FilterResult<()>, what: &str) -> FilterResult<()> {
        match (self, result) {
            (_, Ok(())) => Ok(()),
            (Self::Sealed, Err(e)) => Err(e),
            (Self::Unsealed, Err(e)) => {
                tracing::warn!(
                    "{} failed filtering, but proceeding because environment is unsealed: {}",
                    what,
                    e
                );
                Ok(())
            }
        }
    }
}

impl Display for Enforcement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sealed => write!(f, "sealed"),
            Self::Unsealed => write!(f, "unsealed"),
        }
    }
}
