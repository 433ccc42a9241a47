use anyhow::{Context, Error};

use crate::dependencies::Dependency;
use crate::exe::RunAndCheck;

/// Grabs the machine hardware name (`uname -m`), the architecture string
/// UAPI boot entries filter on.
pub fn machine() -> Result<String, Error> {
    Dependency::Uname
        .cmd()
        .arg("-m")
        .output_and_check()
        .map(|s| s.trim().to_string())
        .context("Failed to run uname -m")
}

#[cfg(test)]
mod tests {
    use crate::uname;
    #[test]
    fn test_machine() {
        uname::machine().unwrap();
    }
}
