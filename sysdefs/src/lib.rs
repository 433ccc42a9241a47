pub mod devpath;
pub mod eventtype;
pub mod hashalg;
