//! Error types for pseudonym service clients.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PseudonymError>;

#[derive(Error, Debug)]
pub enum PseudonymError {
    #[error("request to pseudonymization service failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("pseudonymization service returned HTTP {status}")]
    Http { status: u16 },

    #[error("malformed FHIR Parameters XML: {0}")]
    Xml(String),

    #[error("invalid pseudonym client configuration: {0}")]
    Config(String),
}
