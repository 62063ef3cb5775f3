use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool is shut down")]
    Shutdown,

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, PoolError>;
