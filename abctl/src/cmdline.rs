// SPDX-License-Identifier: MIT

use std::fs;
use std::path::Path;

/// Looks up `key=value` in a kernel command line file.
///
/// Tokenises on whitespace; quoting is not honoured, matching what the
/// bootloader actually emits. Any read failure or absent key is `None` and
/// the caller falls back to the on-disk active slot.
pub fn cmdline_value(path: &Path, key: &str) -> Option<String> {
    let data = fs::read_to_string(path).ok()?;
    for token in data.split_ascii_whitespace() {
        if let Some((k, v)) = token.split_once('=') {
            if k == key {
                return Some(v.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cmdline_file(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn finds_the_value() {
        let f = cmdline_file("console=ttyMSM0,115200n8 slot_suffix=_b root=/dev/sda12\n");
        assert_eq!(
            cmdline_value(f.path(), "slot_suffix").as_deref(),
            Some("_b")
        );
    }

    #[test]
    fn key_must_match_exactly() {
        let f = cmdline_file("notslot_suffix=_b androidboot.slot_suffix=_b\n");
        assert_eq!(cmdline_value(f.path(), "slot_suffix"), None);
    }

    #[test]
    fn first_occurrence_wins() {
        let f = cmdline_file("slot_suffix=_a slot_suffix=_b\n");
        assert_eq!(
            cmdline_value(f.path(), "slot_suffix").as_deref(),
            Some("_a")
        );
    }

    #[test]
    fn missing_key_and_missing_file() {
        let f = cmdline_file("console=ttyMSM0 quiet\n");
        assert_eq!(cmdline_value(f.path(), "slot_suffix"), None);
        assert_eq!(
            cmdline_value(Path::new("/nonexistent/cmdline"), "slot_suffix"),
            None
        );
    }

    #[test]
    fn bare_flags_are_skipped() {
        let f = cmdline_file("quiet splash slot_suffix=_a");
        assert_eq!(
            cmdline_value(f.path(), "slot_suffix").as_deref(),
            Some("_a")
        );
    }
}
