//! Index partition criteria: the data placement policy.
//!
//! A rule string such as `size=1M/name=*.xml:*.json` decides which files'
//! payloads are duplicated on the index partition. Parsing accepts the
//! `name=` and `size=` options in any order, each at most once; matching
//! is caseless by grapheme cluster over the glob patterns.

use crate::error::{LtfsError, Result};
use crate::namematch;
use crate::pathname;
use std::sync::OnceLock;
use tracing::debug;

/// Data placement policy for one volume.
///
/// `glob_cache` holds the case-folded form of `glob_patterns`, built
/// lazily on the first match and dropped again whenever the rules are
/// duplicated.
#[derive(Debug, Default)]
pub struct IndexCriteria {
    pub have_criteria: bool,
    /// Maximum file size eligible for index-partition duplication, in
    /// bytes. Zero disables index-partition writes entirely.
    pub max_filesize: u64,
    pub glob_patterns: Vec<String>,
    glob_cache: OnceLock<Vec<String>>,
}

impl Clone for IndexCriteria {
    fn clone(&self) -> Self {
        // The fold cache is rebuilt lazily by the copy.
        Self {
            have_criteria: self.have_criteria,
            max_filesize: self.max_filesize,
            glob_patterns: self.glob_patterns.clone(),
            glob_cache: OnceLock::new(),
        }
    }
}

impl IndexCriteria {
    /// An absent policy: nothing qualifies for the index partition.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build criteria from already-validated parts (index parsing).
    pub fn from_parts(max_filesize: u64, glob_patterns: Vec<String>) -> Self {
        Self {
            have_criteria: true,
            max_filesize,
            glob_patterns,
            glob_cache: OnceLock::new(),
        }
    }

    /// Parse a user-supplied rule string.
    ///
    /// Grammar: `/`-separated `name=<pat>[:<pat>...]` and `size=<N>[kKmMgG]`
    /// segments. Keys are case-insensitive, each may appear at most once,
    /// and `name=` requires `size=`.
    pub fn parse(rules: &str) -> Result<Self> {
        if rules.len() < 5 {
            return Err(LtfsError::policy_invalid(rules));
        }

        let mut max_filesize: Option<u64> = None;
        let mut glob_patterns: Option<Vec<String>> = None;

        for segment in rules.split('/') {
            let lower = segment.to_ascii_lowercase();
            if let Some(value) = lower.strip_prefix("size=") {
                if max_filesize.is_some() {
                    return Err(LtfsError::policy_invalid(format!(
                        "option specified more than once: {segment}"
                    )));
                }
                max_filesize = Some(parse_size(value)?);
            } else if lower.starts_with("name=") {
                if glob_patterns.is_some() {
                    return Err(LtfsError::policy_invalid(format!(
                        "option specified more than once: {segment}"
                    )));
                }
                // Split the original segment, not the lowercased copy:
                // pattern text is case-preserved.
                glob_patterns = Some(parse_patterns(&segment["name=".len()..])?);
            } else {
                // Covers unknown options and empty segments from leading,
                // trailing, or doubled separators.
                return Err(LtfsError::policy_invalid(segment));
            }
        }

        if glob_patterns.is_some() && max_filesize.is_none() {
            return Err(LtfsError::policy_invalid(
                "name= requires an accompanying size=",
            ));
        }

        let criteria = Self {
            have_criteria: true,
            max_filesize: max_filesize.unwrap_or(0),
            glob_patterns: glob_patterns.unwrap_or_default(),
            glob_cache: OnceLock::new(),
        };
        debug!(
            max_filesize = criteria.max_filesize,
            patterns = criteria.glob_patterns.len(),
            "parsed data placement policy"
        );
        Ok(criteria)
    }

    /// True when no payload may be written to the index partition.
    pub fn disabled(&self) -> bool {
        !self.have_criteria || self.max_filesize == 0
    }

    /// Decide whether a file name belongs to the policy's pattern set.
    ///
    /// False when there is no policy or the size bound is zero; true when
    /// the policy is size-only. The caller applies the `size <=
    /// max_filesize` bound separately.
    pub fn matches(&self, name: &str) -> bool {
        if self.disabled() {
            return false;
        }
        if self.glob_patterns.is_empty() {
            return true;
        }

        let cache = self.glob_cache.get_or_init(|| {
            self.glob_patterns
                .iter()
                .map(|p| pathname::prepare_caseless(p, false))
                .collect()
        });

        let folded_name = pathname::prepare_caseless(name, false);
        cache.iter().any(|p| namematch::glob_match(p, &folded_name))
    }

    /// Duplicate the rules, leaving the fold cache behind.
    ///
    /// Used to keep the on-tape policy (`original_criteria`) separate from
    /// a mount-time override (the active criteria).
    pub fn dup_rules(&self) -> Self {
        self.clone()
    }
}

/// Parse a `size=` value: decimal digits with an optional single
/// `k`/`m`/`g` multiplier (1024-based), case-insensitive.
fn parse_size(value: &str) -> Result<u64> {
    if value.is_empty() {
        return Err(LtfsError::policy_invalid("size= requires a value"));
    }

    let (digits, multiplier) = match value.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let m = match c.to_ascii_lowercase() {
                'k' => 1024u64,
                'm' => 1024 * 1024,
                'g' => 1024 * 1024 * 1024,
                _ => return Err(LtfsError::policy_invalid(format!("bad size suffix: {c}"))),
            };
            (&value[..value.len() - 1], m)
        }
        _ => (value, 1),
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(LtfsError::policy_invalid(format!("bad size value: {value}")));
    }

    let n: u64 = digits
        .parse()
        .map_err(|_| LtfsError::policy_invalid(format!("bad size value: {value}")))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| LtfsError::policy_invalid(format!("size overflows: {value}")))
}

/// Parse a `name=` value: a `:`-separated list of non-empty glob patterns.
fn parse_patterns(value: &str) -> Result<Vec<String>> {
    let mut patterns = Vec::new();
    for pat in value.split(':') {
        if pat.is_empty() {
            return Err(LtfsError::PolicyEmptyRule(value.to_string()));
        }
        pathname::validate_file(pat)?;
        patterns.push(pat.to_string());
    }
    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_size_and_name_rules() {
        let c = IndexCriteria::parse("size=1M/name=*.xml:*.json").unwrap();
        assert!(c.have_criteria);
        assert_eq!(c.max_filesize, 1024 * 1024);
        assert_eq!(c.glob_patterns, vec!["*.xml", "*.json"]);
    }

    #[test]
    fn option_order_is_free_and_keys_are_case_insensitive() {
        let c = IndexCriteria::parse("NAME=*.log/SIZE=2k").unwrap();
        assert_eq!(c.max_filesize, 2048);
        assert_eq!(c.glob_patterns, vec!["*.log"]);
    }

    #[test]
    fn size_multipliers() {
        assert_eq!(IndexCriteria::parse("size=100").unwrap().max_filesize, 100);
        assert_eq!(IndexCriteria::parse("size=1k").unwrap().max_filesize, 1024);
        assert_eq!(
            IndexCriteria::parse("size=3G").unwrap().max_filesize,
            3 * 1024 * 1024 * 1024
        );
    }

    #[test]
    fn size_zero_disables_index_partition_writes() {
        let c = IndexCriteria::parse("size=0K").unwrap();
        assert_eq!(c.max_filesize, 0);
        assert!(c.disabled());
        assert!(!c.matches("anything.xml"));
    }

    #[test]
    fn rejects_malformed_rules() {
        assert!(IndexCriteria::parse("").is_err());
        assert!(IndexCriteria::parse("bogus=1").is_err());
        assert!(IndexCriteria::parse("/size=1M").is_err());
        assert!(IndexCriteria::parse("size=1M/").is_err());
        assert!(IndexCriteria::parse("size=1M/size=2M").is_err());
        assert!(IndexCriteria::parse("size=x").is_err());
        assert!(IndexCriteria::parse("size=1x").is_err());
        assert!(IndexCriteria::parse("size=k").is_err());
    }

    #[test]
    fn rejects_empty_patterns() {
        assert!(matches!(
            IndexCriteria::parse("size=1M/name="),
            Err(LtfsError::PolicyEmptyRule(_))
        ));
        assert!(IndexCriteria::parse("size=1M/name=a::b").is_err());
        assert!(IndexCriteria::parse("size=1M/name=a:").is_err());
        assert!(IndexCriteria::parse("size=1M/name=:a").is_err());
    }

    #[test]
    fn name_without_size_is_invalid() {
        assert!(IndexCriteria::parse("name=*.xml").is_err());
    }

    #[test]
    fn matches_is_gated_by_policy_presence_and_size_bound() {
        let none = IndexCriteria::none();
        assert!(!none.matches("foo.xml"));

        let size_only = IndexCriteria::parse("size=1M").unwrap();
        assert!(size_only.matches("anything-at-all"));

        let c = IndexCriteria::parse("size=1M/name=*.xml:*.json").unwrap();
        assert!(c.matches("foo.xml"));
        assert!(c.matches("FOO.XML"));
        assert!(c.matches("data.json"));
        assert!(!c.matches("foo.txt"));
    }

    #[test]
    fn dup_rules_preserves_patterns_and_drops_cache() {
        let c = IndexCriteria::parse("size=1M/name=*.xml").unwrap();
        assert!(c.matches("a.xml"));
        let copy = c.dup_rules();
        assert_eq!(copy.glob_patterns, c.glob_patterns);
        assert_eq!(copy.max_filesize, c.max_filesize);
        assert!(copy.matches("b.XML"));
    }
}
