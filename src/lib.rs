pub mod config;
pub mod error;
pub mod shell;

pub use error::{RemoteError, Result};
