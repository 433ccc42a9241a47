use std::path::{Path, PathBuf};

use crate::error::{OracleError, OracleResult};

/// On-disk representation of a stored TPM key or sealed blob.
///
/// Mirrors `STORED_KEY_FMT_PEM`/`STORED_KEY_FMT_NATIVE` from the original
/// C tool's `store.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredKeyFormat {
    Pem,
    Native,
}

impl StoredKeyFormat {
    fn label(&self) -> &'static str {
        match self {
            StoredKeyFormat::Pem => "pem",
            StoredKeyFormat::Native => "native",
        }
    }
}

/// A path to a stored key together with the format it was declared or
/// inferred in.
///
/// A path may carry an explicit `pem:` or `native:` prefix; absent that, a
/// `.pem` suffix selects PEM and anything else falls back to the format
/// supplied by `default`. Once assigned, the format is load-bearing: trying
/// to reassign a different one is a caller bug, not a recoverable condition.
#[derive(Debug, Clone)]
pub struct StoredKey {
    pub path: PathBuf,
    pub is_private: bool,
    pub format: StoredKeyFormat,
}

impl StoredKey {
    pub fn parse(raw: &str, is_private: bool, default: StoredKeyFormat) -> OracleResult<Self> {
        let (format, rest) = if let Some(rest) = raw.strip_prefix("pem:") {
            (StoredKeyFormat::Pem, rest)
        } else if let Some(rest) = raw.strip_prefix("native:") {
            (StoredKeyFormat::Native, rest)
        } else if raw.ends_with(".pem") {
            (StoredKeyFormat::Pem, raw)
        } else {
            (default, raw)
        };

        Ok(StoredKey {
            path: PathBuf::from(rest),
            is_private,
            format,
        })
    }

    /// Re-assigns this key's format, failing if it conflicts with the
    /// already-established one.
    pub fn assign_format(&mut self, requested: StoredKeyFormat) -> OracleResult<()> {
        if self.format != requested {
            return Err(OracleError::KeyFormatConflict {
                path: self.path.clone(),
                existing: self.format.label(),
                requested: requested.label(),
            });
        }
        Ok(())
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_prefix_wins_over_suffix() {
        let k = StoredKey::parse("native:foo.pem", true, StoredKeyFormat::Pem).unwrap();
        assert_eq!(k.format, StoredKeyFormat::Native);
        assert_eq!(k.path, PathBuf::from("foo.pem"));
    }

    #[test]
    fn pem_suffix_infers_format() {
        let k = StoredKey::parse("foo.pem", false, StoredKeyFormat::Native).unwrap();
        assert_eq!(k.format, StoredKeyFormat::Pem);
    }

    #[test]
    fn no_hint_uses_default() {
        let k = StoredKey::parse("foo.key", false, StoredKeyFormat::Native).unwrap();
        assert_eq!(k.format, StoredKeyFormat::Native);
    }

    #[test]
    fn reassigning_same_format_is_ok() {
        let mut k = StoredKey::parse("pem:foo", true, StoredKeyFormat::Native).unwrap();
        k.assign_format(StoredKeyFormat::Pem).unwrap();
    }

    #[test]
    fn reassigning_different_format_is_an_error() {
        let mut k = StoredKey::parse("pem:foo", true, StoredKeyFormat::Native).unwrap();
        assert!(k.assign_format(StoredKeyFormat::Native).is_err());
    }
}
