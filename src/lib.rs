pub mod authenticode;
pub mod bank;
pub mod bootentry;
pub mod buffer;
pub mod config;
pub mod devpath;
pub mod digest;
pub mod eventlog;
pub mod keyfile;
pub mod logging;
pub mod policy;
pub mod scanners;
pub mod tpm;
