use thiserror::Error;

#[derive(Error, Debug)]
pub enum TsloadError {
    #[error("Invalid configuration: {0}")]
    Config(String),
}
