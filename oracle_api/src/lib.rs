pub mod error;
pub mod keyfmt;
pub mod platform;
pub mod primitives;

pub use error::{OracleError, OracleResult};
