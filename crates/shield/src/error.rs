use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShieldError>;

#[derive(Error, Debug)]
pub enum ShieldError {
    #[error("dataset element error: {0}")]
    Element(String),
}
