pub mod config;
pub mod error;
pub mod types;
pub mod sse;
pub mod upstream;
pub mod server;

pub use error::RelayError;
pub type Result<T> = std::result::Result<T, RelayError>;
