//! Artifact type trait and implementations
//!
//! Defines the [`ArtifactType`] trait for integrity-pinned agent sources.
//! This is a sealed trait - only crate-internal types can implement it.

use crate::digest::Integrity;
use std::fmt::Debug;
use std::marker::PhantomData;

/// Trait for artifact types
///
/// Implemented for the two text artifacts the sandbox deals with: the opaque
/// agent body (whose digest is its version fingerprint) and the rewritten,
/// loadable agent script.
///
/// # Contract
/// - `integrity` must be deterministic
/// - `TYPE_ID` must be unique and stable
pub trait ArtifactType: Send + Sync + 'static + Debug + private::Sealed {
    /// The content type for this artifact
    type Content: Send + Sync + 'static + Debug + Clone + PartialEq;

    /// Compute the content digest
    fn integrity(content: &Self::Content) -> Integrity;

    /// Artifact type identifier
    const TYPE_ID: &'static str;

    /// Validate content invariants
    ///
    /// # Errors
    /// Returns error if content violates invariants
    fn validate_content(_content: &Self::Content) -> Result<(), ArtifactError> {
        Ok(())
    }
}

/// Sealed trait - prevents external implementations
#[doc(hidden)]
pub mod private {
    /// Sealed trait marker
    pub trait Sealed {}
}

/// Errors related to artifact operations
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Content invariant violation
    #[error("content invariant violated: {0}")]
    InvariantViolation(String),

    /// Digest mismatch (integrity check failed)
    #[error("integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch {
        expected: Integrity,
        actual: Integrity,
    },
}

/// Integrity-pinned typed artifact
///
/// # Invariants
/// - `integrity` is always `T::integrity(&content)`
/// - Immutable after construction
#[derive(Debug, PartialEq, Eq)]
pub struct Artifact<T: ArtifactType> {
    integrity: Integrity,
    content: T::Content,
    _phantom: PhantomData<T>,
}

impl<T: ArtifactType> Clone for Artifact<T> {
    fn clone(&self) -> Self {
        Self {
            integrity: self.integrity,
            content: self.content.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T: ArtifactType> Artifact<T> {
    /// Create new artifact (computes digest and validates)
    ///
    /// # Errors
    /// Returns error if content validation fails
    pub fn new(content: T::Content) -> Result<Self, ArtifactError> {
        T::validate_content(&content)?;
        let integrity = T::integrity(&content);
        Ok(Self {
            integrity,
            content,
            _phantom: PhantomData,
        })
    }

    /// Create artifact and require a specific digest
    ///
    /// # Errors
    /// Returns [`ArtifactError::IntegrityMismatch`] if the content does not hash to `expected`
    pub fn with_expected(content: T::Content, expected: Integrity) -> Result<Self, ArtifactError> {
        let artifact = Self::new(content)?;
        if artifact.integrity != expected {
            return Err(ArtifactError::IntegrityMismatch {
                expected,
                actual: artifact.integrity,
            });
        }
        Ok(artifact)
    }

    /// Content digest
    #[inline]
    #[must_use]
    pub fn integrity(&self) -> &Integrity {
        &self.integrity
    }

    /// Reference to content
    #[inline]
    #[must_use]
    pub fn content(&self) -> &T::Content {
        &self.content
    }

    /// Move content out of artifact
    #[inline]
    #[must_use]
    pub fn into_content(self) -> T::Content {
        self.content
    }

    /// Verify integrity (useful after the artifact crossed a boundary)
    #[inline]
    #[must_use]
    pub fn verify(&self) -> bool {
        self.integrity == T::integrity(&self.content)
    }
}

/// The opaque, minified agent body between the header and the config tail
#[derive(Debug, Clone)]
pub struct AgentBody;

impl private::Sealed for AgentBody {}

impl ArtifactType for AgentBody {
    type Content = String;

    fn integrity(content: &Self::Content) -> Integrity {
        Integrity::compute(content.as_bytes())
    }

    const TYPE_ID: &'static str = "agent_body";
}

/// The rewritten agent script handed to the loader
#[derive(Debug, Clone)]
pub struct AgentScript;

impl private::Sealed for AgentScript {}

impl ArtifactType for AgentScript {
    type Content = String;

    fn integrity(content: &Self::Content) -> Integrity {
        Integrity::compute(content.as_bytes())
    }

    const TYPE_ID: &'static str = "agent_script";

    fn validate_content(content: &Self::Content) -> Result<(), ArtifactError> {
        if !content.ends_with('\n') {
            return Err(ArtifactError::InvariantViolation(
                "agent script must end with a newline".to_string(),
            ));
        }
        Ok(())
    }
}
