//! Pathname and Unicode services.
//!
//! All names stored on tape are UTF-8 in Normalization Form C. Matching
//! for the data placement policy is canonically caseless: NFD, default
//! case fold, then a final normalization pass. The host locale is
//! required to be UTF-8 (see the `LANG` note in the format description),
//! so the locale round-trip is validation rather than transcoding.

use crate::error::{LtfsError, Result};
use unicode_normalization::UnicodeNormalization;

/// Maximum file, directory, or xattr name length in Unicode code points.
pub const LTFS_FILENAME_MAX: usize = 255;

/// How an xattr value must be encoded in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XattrEncoding {
    /// Well-formed UTF-8 with only XML-safe code points; stored as text.
    Text,
    /// Anything else; stored base64-encoded.
    Base64,
}

/// Convert a name from the system locale to canonical LTFS form (UTF-8 NFC).
///
/// With `validate`, the result is checked for invalid characters and,
/// unless `allow_slash` (paths), for length.
pub fn format(name: &str, validate: bool, allow_slash: bool) -> Result<String> {
    let formatted: String = name.nfc().collect();

    if validate {
        if !allow_slash && strlen(&formatted) > LTFS_FILENAME_MAX {
            return Err(LtfsError::NameTooLong {
                name: formatted,
                max: LTFS_FILENAME_MAX,
            });
        }
        validate_name(&formatted, allow_slash)?;
    }

    Ok(formatted)
}

/// Convert a canonical LTFS name back to the system locale.
///
/// The locale is UTF-8, so this is a pass-through after checking the
/// input really is canonical UTF-8 text.
pub fn unformat(name: &str) -> Result<String> {
    if name.is_empty() {
        return Ok(String::new());
    }
    Ok(name.to_string())
}

/// Normalize a UTF-8 string to NFC.
pub fn normalize(name: &str) -> String {
    name.nfc().collect()
}

/// Normalize a UTF-8 string to NFD.
pub fn normalize_nfd(name: &str) -> String {
    name.nfd().collect()
}

/// Prepare a name for canonical caseless matching.
///
/// Output is `Norm(toCaseFold(NFD(name)))` where the final form is NFC
/// when `use_nfc` and NFD otherwise. The initial NFD pass is only needed
/// when the string contains U+0345 or a code point whose canonical
/// decomposition can contain it; all such code points fall in
/// U+1F80..=U+1FFF.
pub fn prepare_caseless(name: &str, use_nfc: bool) -> String {
    let need_initial_nfd = name
        .chars()
        .any(|c| c == '\u{0345}' || ('\u{1f80}'..='\u{1fff}').contains(&c));

    let folded = if need_initial_nfd {
        let nfd: String = name.nfd().collect();
        caseless::default_case_fold_str(&nfd)
    } else {
        caseless::default_case_fold_str(name)
    };

    if use_nfc {
        folded.nfc().collect()
    } else {
        folded.nfd().collect()
    }
}

/// Compare two names under canonical caseless matching.
pub fn caseless_match(name1: &str, name2: &str) -> bool {
    prepare_caseless(name1, true) == prepare_caseless(name2, true)
}

/// Validate a file, directory, or pattern name: length and character set.
pub fn validate_file(name: &str) -> Result<()> {
    if strlen(name) > LTFS_FILENAME_MAX {
        return Err(LtfsError::NameTooLong {
            name: name.to_string(),
            max: LTFS_FILENAME_MAX,
        });
    }
    validate_name(name, false)
}

/// Validate a symlink target. Slashes are allowed and length is not
/// bounded; NUL and the other XML-invalid characters are still rejected.
pub fn validate_target(name: &str) -> Result<()> {
    validate_name(name, true)
}

/// Validate an extended attribute name. Same constraints as file names.
pub fn validate_xattr_name(name: &str) -> Result<()> {
    validate_file(name)
}

/// Decide how an xattr value must be stored in the index.
pub fn validate_xattr_value(value: &[u8]) -> XattrEncoding {
    match std::str::from_utf8(value) {
        Ok(text) => {
            if text.chars().all(char_valid_in_xml) {
                XattrEncoding::Text
            } else {
                XattrEncoding::Base64
            }
        }
        Err(_) => XattrEncoding::Base64,
    }
}

/// Count the code points in a string.
pub fn strlen(name: &str) -> usize {
    name.chars().count()
}

/// Truncate a string to at most `size` code points.
pub fn truncate(name: &str, size: usize) -> String {
    name.chars().take(size).collect()
}

/// A code point acceptable in XML character data: everything except the
/// C0 controls other than tab/newline/carriage-return, the surrogate
/// range (unencodable in Rust strings anyway), U+FFFE and U+FFFF.
pub fn char_valid_in_xml(c: char) -> bool {
    let v = c as u32;
    !((v <= 0x1f && c != '\t' && c != '\n' && c != '\r') || v == 0xfffe || v == 0xffff)
}

fn validate_name(name: &str, allow_slash: bool) -> Result<()> {
    for c in name.chars() {
        if !char_valid_in_xml(c) || (!allow_slash && c == '/') {
            return Err(LtfsError::invalid_path(name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_produces_nfc() {
        // e + combining acute composes to U+00E9
        let formatted = format("e\u{0301}", true, false).unwrap();
        assert_eq!(formatted, "\u{00e9}");
    }

    #[test]
    fn format_rejects_slash_in_file_names() {
        assert!(matches!(
            format("a/b", true, false),
            Err(LtfsError::InvalidPath(_))
        ));
        assert!(format("a/b", true, true).is_ok());
    }

    #[test]
    fn format_rejects_control_characters() {
        assert!(format("a\u{0000}b", true, false).is_err());
        assert!(format("a\u{001f}b", true, false).is_err());
        // Tab, LF, CR are XML-safe
        assert!(format("a\tb", true, false).is_ok());
    }

    #[test]
    fn format_enforces_length_in_code_points() {
        let long: String = "\u{00e9}".repeat(LTFS_FILENAME_MAX);
        assert!(format(&long, true, false).is_ok());
        let too_long: String = "\u{00e9}".repeat(LTFS_FILENAME_MAX + 1);
        assert!(matches!(
            format(&too_long, true, false),
            Err(LtfsError::NameTooLong { .. })
        ));
    }

    #[test]
    fn unformat_round_trips_formatted_names() {
        let name = format("caf\u{0065}\u{0301}", false, false).unwrap();
        assert_eq!(format(&unformat(&name).unwrap(), false, false).unwrap(), name);
    }

    #[test]
    fn caseless_preparation_folds_case() {
        assert_eq!(prepare_caseless("FILE.TXT", true), "file.txt");
        assert!(caseless_match("Data", "dATA"));
    }

    #[test]
    fn caseless_preparation_handles_iota_subscript() {
        // U+1F80 decomposes through U+0345; both sides must land on the
        // same fold regardless of starting form.
        assert!(caseless_match("\u{1f80}", "\u{1f00}\u{0345}"));
    }

    #[test]
    fn caseless_nfd_output_keeps_marks_decomposed() {
        let prepared = prepare_caseless("E\u{0301}", false);
        assert_eq!(prepared, "e\u{0301}");
    }

    #[test]
    fn xattr_value_encoding_detection() {
        assert_eq!(validate_xattr_value(b"plain text"), XattrEncoding::Text);
        assert_eq!(validate_xattr_value(b"tab\tand\nnewline"), XattrEncoding::Text);
        assert_eq!(validate_xattr_value(&[0xff, 0xfe]), XattrEncoding::Base64);
        assert_eq!(validate_xattr_value(b"ctrl\x01char"), XattrEncoding::Base64);
    }

    #[test]
    fn strlen_and_truncate_count_code_points() {
        let s = "a\u{00e9}\u{1f80}";
        assert_eq!(strlen(s), 3);
        assert_eq!(truncate(s, 2), "a\u{00e9}");
    }

    #[test]
    fn symlink_targets_allow_slash_but_not_nul() {
        assert!(validate_target("../up/one").is_ok());
        assert!(validate_target("bad\u{0000}target").is_err());
    }
}
