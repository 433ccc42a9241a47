use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Error};
use etc_os_release::OsRelease;

/// Reads `ID` and `IMAGE_ID` out of `/etc/os-release`, the two fallback
/// entry-token candidates the boot-entry resolver tries after
/// `/etc/kernel/entry-token` and `/etc/machine-id`.
pub struct OsReleaseTokens {
    pub id: Option<String>,
    pub image_id: Option<String>,
}

pub fn read_tokens() -> Result<OsReleaseTokens, Error> {
    read_tokens_from(Path::new("/etc/os-release"))
}

pub fn read_tokens_from(path: &Path) -> Result<OsReleaseTokens, Error> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read os-release file '{}'", path.display()))?;
    let release = OsRelease::from_str(&content)
        .with_context(|| format!("Failed to parse os-release file '{}'", path.display()))?;

    Ok(OsReleaseTokens {
        id: release
            .get_value("ID")
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty()),
        image_id: release
            .get_value("IMAGE_ID")
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty()),
    })
}
