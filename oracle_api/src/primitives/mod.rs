pub mod digest;

pub use digest::DigestHex;
