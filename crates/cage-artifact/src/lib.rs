//! Agent Cage Artifacts
//!
//! Integrity-pinned text artifacts, a regex-aware JSON codec and the
//! offset-addressed fixup engine used to neutralize call sites in a vendor
//! agent body.
//!
//! # Core Concepts
//!
//! - [`Integrity`]: SHA-256 digest in subresource-integrity form
//! - [`Artifact<T>`]: digest-carrying container for [`AgentBody`] and [`AgentScript`]
//! - [`RegexCodec`]: JSON codec that round-trips regex literals via a random marker
//! - [`FixupSet`] / [`apply_fixups`]: sparse, batch-validated insertions
//!
//! # Example
//!
//! ```rust
//! use cage_artifact::{apply_fixups, FixupSet};
//!
//! let fixups = FixupSet::new().with(3, "bar");
//! assert_eq!(apply_fixups("foobaz", &fixups).unwrap(), "foobarbaz");
//! ```

#![warn(unreachable_pub)]

mod artifact;
mod codec;
mod digest;
mod fixup;

pub use artifact::{AgentBody, AgentScript, Artifact, ArtifactError, ArtifactType};
pub use codec::{CodecError, RegexCodec, RegexLiteral, StructuredValue};
pub use digest::{to_hex, Integrity, IntegrityError, INTEGRITY_PREFIX};
pub use fixup::{apply_fixups, FixupEntry, FixupError, FixupSet, HELPERS_GLOBAL};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
