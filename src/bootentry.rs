use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use oracle_api::error::{OracleError, OracleResult};
use osutils::machine_id::MachineId;
use osutils::osrelease;

/// One parsed UAPI Boot Loader Specification entry
/// (`/boot/efi/loader/entries/<token>-<id>.conf`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BootEntry {
    pub sort_key: Option<String>,
    pub machine_id: Option<String>,
    pub version: Option<String>,
    pub options: Option<String>,
    pub image_path: Option<String>,
    pub initrd_path: Option<String>,
    pub architecture: Option<String>,
    pub source_file: PathBuf,
}

fn parse_entry_file(source_file: PathBuf, content: &str) -> BootEntry {
    let mut entry = BootEntry {
        source_file,
        ..Default::default()
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let value = value.trim().to_string();
        match key {
            "sort-key" => entry.sort_key = Some(value),
            "machine-id" => entry.machine_id = Some(value),
            "version" => entry.version = Some(value),
            "options" => entry.options = Some(value),
            "linux" => entry.image_path = Some(value),
            "initrd" => entry.initrd_path = Some(value),
            "architecture" => entry.architecture = Some(value),
            _ => {}
        }
    }
    entry
}

/// Reads `/etc/kernel/entry-token`, `/etc/machine-id`, and the `ID`/`IMAGE_ID`
/// fields of `/etc/os-release`, in UAPI fallback order, and returns the first
/// candidate for which at least one matching entry file exists under
/// `entries_dir`.
fn discover_entry_token(root: &Path, entries_dir: &Path) -> OracleResult<String> {
    let mut candidates = Vec::new();

    if let Ok(token) = fs::read_to_string(root.join("etc/kernel/entry-token")) {
        candidates.push(token.trim().to_string());
    }
    if let Ok(machine_id) = MachineId::read_from(root.join("etc/machine-id")) {
        candidates.push(machine_id.as_string());
    }
    if let Ok(tokens) = osrelease::read_tokens_from(&root.join("etc/os-release")) {
        if let Some(id) = tokens.id {
            candidates.push(id);
        }
        if let Some(image_id) = tokens.image_id {
            candidates.push(image_id);
        }
    }

    let entry_names: Vec<String> = fs::read_dir(entries_dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect()
        })
        .unwrap_or_default();

    for candidate in candidates {
        if candidate.is_empty() {
            continue;
        }
        let prefix = format!("{candidate}-");
        if entry_names.iter().any(|n| n.starts_with(&prefix)) {
            return Ok(candidate);
        }
    }

    Err(OracleError::MissingFile(root.join("etc/kernel/entry-token")))
}

/// Enumerates, filters, and ranks boot entries under `root` (`/` in
/// production; a temporary directory in tests). Entries are returned newest
/// first per [`vercmp`].
pub fn resolve_entries(root: &Path, current_machine_id: Option<&str>, uname_machine: &str) -> OracleResult<Vec<BootEntry>> {
    let entries_dir = root.join("boot/efi/loader/entries");
    let token = discover_entry_token(root, &entries_dir)?;
    let prefix = format!("{token}-");

    let dir_entries = fs::read_dir(&entries_dir)
        .map_err(|_| OracleError::MissingFile(entries_dir.clone()))?;

    let mut entries = Vec::new();
    for dir_entry in dir_entries.filter_map(|e| e.ok()) {
        let path = dir_entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.starts_with(&prefix) || !file_name.ends_with(".conf") {
            continue;
        }
        let content = fs::read_to_string(&path).map_err(|_| OracleError::MissingFile(path.clone()))?;
        entries.push(parse_entry_file(path, &content));
    }

    entries.retain(|e| {
        let machine_ok = match (&e.machine_id, current_machine_id) {
            (Some(want), Some(have)) => want == have,
            _ => true,
        };
        let arch_ok = match &e.architecture {
            Some(want) => want == uname_machine,
            None => true,
        };
        machine_ok && arch_ok
    });

    entries.sort_by(|a, b| rank(a, b));
    entries.reverse();
    Ok(entries)
}

fn rank(a: &BootEntry, b: &BootEntry) -> Ordering {
    a.sort_key
        .cmp(&b.sort_key)
        .then_with(|| a.machine_id.cmp(&b.machine_id))
        .then_with(|| vercmp(a.version.as_deref().unwrap_or(""), b.version.as_deref().unwrap_or("")))
}

fn is_separator(c: u8) -> bool {
    matches!(c, b'~' | b'-' | b'^' | b'.')
}

fn separator_rank(c: u8) -> u8 {
    match c {
        b'~' => 0,
        b'-' => 1,
        b'^' => 2,
        b'.' => 3,
        _ => 4,
    }
}

fn is_verchar(c: u8) -> bool {
    c.is_ascii_alphanumeric() || is_separator(c)
}

/// The UAPI/systemd `strverscmp_improved` version comparator, walked
/// byte-by-byte in lockstep over both strings.
pub fn vercmp(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0usize, 0usize);

    loop {
        while i < a.len() && !is_verchar(a[i]) {
            i += 1;
        }
        while j < b.len() && !is_verchar(b[j]) {
            j += 1;
        }

        let a_done = i >= a.len();
        let b_done = j >= b.len();
        if a_done && b_done {
            return Ordering::Equal;
        }
        if a_done {
            return Ordering::Less;
        }
        if b_done {
            return Ordering::Greater;
        }

        if is_separator(a[i]) || is_separator(b[j]) {
            let a_is_sep = is_separator(a[i]);
            let b_is_sep = is_separator(b[j]);
            if a_is_sep && b_is_sep {
                match separator_rank(a[i]).cmp(&separator_rank(b[j])) {
                    Ordering::Equal => {
                        i += 1;
                        j += 1;
                        continue;
                    }
                    other => return other,
                }
            }
            // The side with the separator sorts earlier: a non-separator
            // beats a separator, i.e. `cmp(a_is_sep, b_is_sep)` inverted.
            return b_is_sep.cmp(&a_is_sep);
        }

        if a[i].is_ascii_digit() || b[j].is_ascii_digit() {
            let a_start = i;
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            let b_start = j;
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            let a_has_digits = i > a_start;
            let b_has_digits = j > b_start;
            if !a_has_digits || !b_has_digits {
                match a_has_digits.cmp(&b_has_digits) {
                    Ordering::Equal => {}
                    other => return other,
                }
                continue;
            }
            let a_num = std::str::from_utf8(&a[a_start..i]).unwrap().trim_start_matches('0');
            let b_num = std::str::from_utf8(&b[b_start..j]).unwrap().trim_start_matches('0');
            match a_num.len().cmp(&b_num.len()).then_with(|| a_num.cmp(b_num)) {
                Ordering::Equal => continue,
                other => return other,
            }
        }

        let a_start = i;
        while i < a.len() && a[i].is_ascii_alphabetic() {
            i += 1;
        }
        let b_start = j;
        while j < b.len() && b[j].is_ascii_alphabetic() {
            j += 1;
        }
        match a[a_start..i].cmp(&b[b_start..j]) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn version_order_matches_pinned_scenario() {
        let mut versions = vec![
            "6.4.0-150600.1",
            "6.4.0-150600.10",
            "6.4.0-150600.2~rc1",
            "6.4.0-150600.2",
        ];
        versions.sort_by(|a, b| vercmp(a, b));
        versions.reverse();
        assert_eq!(
            versions,
            vec![
                "6.4.0-150600.10",
                "6.4.0-150600.2",
                "6.4.0-150600.2~rc1",
                "6.4.0-150600.1",
            ]
        );
    }

    #[test]
    fn vercmp_is_antisymmetric() {
        assert_eq!(vercmp("1.2.3", "1.2.4").reverse(), vercmp("1.2.4", "1.2.3"));
        assert_eq!(vercmp("abc", "abc"), Ordering::Equal);
    }

    fn write_file(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = fs::File::create(path).unwrap();
        write!(f, "{content}").unwrap();
    }

    #[test]
    fn entry_token_falls_back_to_machine_id() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("etc/machine-id"), "cafef00dcafef00dcafef00dcafef00d\n");
        write_file(
            &root.join("boot/efi/loader/entries/cafef00dcafef00dcafef00dcafef00d-6.4.0.conf"),
            "title Test\nversion 6.4.0\nlinux /boot/vmlinuz\n",
        );

        let entries = resolve_entries(root, None, "x86_64").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version.as_deref(), Some("6.4.0"));
    }

    #[test]
    fn missing_entry_token_candidates_fail_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("boot/efi/loader/entries")).unwrap();
        assert!(resolve_entries(root, None, "x86_64").is_err());
    }

    #[test]
    fn architecture_mismatch_filters_entry_out() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("etc/machine-id"), "abc123abc123abc123abc123abc123ab\n");
        write_file(
            &root.join("boot/efi/loader/entries/abc123abc123abc123abc123abc123ab-a.conf"),
            "version 1\narchitecture aarch64\n",
        );
        write_file(
            &root.join("boot/efi/loader/entries/abc123abc123abc123abc123abc123ab-b.conf"),
            "version 2\narchitecture x86_64\n",
        );

        let entries = resolve_entries(root, None, "x86_64").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version.as_deref(), Some("2"));
    }
}
