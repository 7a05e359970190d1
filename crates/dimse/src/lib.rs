//! Async DICOM upper layer (DIMSE) engine.
//!
//! Provides the pieces a pseudonymizing DIMSE relay needs on both sides of
//! an association: upstream SCU operations ([`scu`]) built on a
//! per-operation [`associator`], inbound listeners ([`scp`]) generic over a
//! pluggable [`scp::AeHandler`], command dataset construction ([`message`]),
//! and the per-operation dataset [`queue`] that threads instances between
//! an inbound C-MOVE/C-GET and the internal C-STORE receiver.

pub mod associator;
pub mod config;
pub mod error;
pub mod message;
pub mod queue;
pub mod scp;
pub mod scu;
pub mod types;

pub use associator::{UpstreamAssociation, UpstreamTarget};
pub use config::DimseConfig;
pub use error::{DimseError, Result};
pub use scp::{AeHandler, DimseScp, RequestContext, ScpResponse};
pub use types::{AssociatorAction, DimseCommand, QueryRetrieveLevel};

/// Default DICOM port (non-TLS).
pub const DEFAULT_DIMSE_PORT: u16 = 11112;

/// Default TLS DICOM port, unused until TLS support is added.
pub const DEFAULT_DIMSE_TLS_PORT: u16 = 2762;
