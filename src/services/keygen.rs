use rand::{rngs::OsRng, RngCore};

use crate::config::{AppConfig, MIN_RANDOM_BYTES, READONLY_PREFIX_LEN};

pub const READONLY_PREFIX: &str = "readonly-";

/// Candidate identifiers for a new record. Not yet checked for collisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub name: String,
    pub roname: String,
}

/// Naming rules taken from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct KeyPolicy {
    pub min_len: usize,
    pub max_len: usize,
    pub force_random: bool,
}

impl From<&AppConfig> for KeyPolicy {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            min_len: cfg.min_key_length,
            max_len: cfg.max_key_length,
            force_random: cfg.force_random_key,
        }
    }
}

/// Random bytes behind a generated read-write key (`2 * n` hex chars).
fn rw_bytes(max_len: usize) -> usize {
    (max_len / 2).max(MIN_RANDOM_BYTES)
}

/// Random bytes behind a read-only key, leaving room for the prefix.
fn ro_bytes(max_len: usize) -> usize {
    (max_len.saturating_sub(READONLY_PREFIX_LEN) / 2).max(MIN_RANDOM_BYTES)
}

/// Lengths of the generated (read-write, read-only) ids for `max_len`.
///
/// Hex output is always even, so with tight bounds one of them can land one
/// character below `max_len`.
pub fn generated_id_lengths(max_len: usize) -> (usize, usize) {
    (
        2 * rw_bytes(max_len),
        READONLY_PREFIX_LEN + 2 * ro_bytes(max_len),
    )
}

impl KeyPolicy {
    /// Build a candidate pair. The caller's name is used only when allowed
    /// and valid; the read-only key is always random.
    pub fn candidate_pair(&self, requested: Option<&str>) -> KeyPair {
        let name = match requested {
            Some(n)
                if !self.force_random
                    && !n.is_empty()
                    && validate_name(n, self.min_len, self.max_len) =>
            {
                n.to_string()
            }
            _ => generate_random_id(rw_bytes(self.max_len)),
        };

        KeyPair {
            name,
            roname: derive_read_only_id(ro_bytes(self.max_len)),
        }
    }
}

/// Accepts names of `min..=max` characters drawn from `[A-Za-z0-9_-]`.
pub fn validate_name(name: &str, min_len: usize, max_len: usize) -> bool {
    let allowed = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    // Only ASCII past this point, so byte length is character length.
    allowed && (min_len..=max_len).contains(&name.len())
}

/// Hex rendering of `byte_len` bytes from the OS CSPRNG.
pub fn generate_random_id(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn derive_read_only_id(byte_len: usize) -> String {
    format!("{READONLY_PREFIX}{}", generate_random_id(byte_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> KeyPolicy {
        KeyPolicy {
            min_len: 3,
            max_len: 64,
            force_random: false,
        }
    }

    #[test]
    fn validate_name_edge_cases() {
        assert!(validate_name("abc", 3, 10));
        assert!(validate_name("A-b_9", 3, 10));
        assert!(!validate_name("ab", 3, 10));
        assert!(!validate_name("abcdefghijk", 3, 10));
        assert!(!validate_name("has space", 3, 20));
        assert!(!validate_name("tab\there", 3, 20));
        assert!(!validate_name("dot.name", 3, 20));
        assert!(!validate_name("ünïcode", 3, 20));
        assert!(!validate_name("", 1, 20));
    }

    #[test]
    fn random_ids_are_hex_of_requested_size() {
        let id = generate_random_id(16);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_random_id(16));
    }

    #[test]
    fn read_only_ids_fit_the_max_length() {
        for max in [25, 26, 40, 64, 255] {
            let p = KeyPolicy { max_len: max, ..policy() };
            let pair = p.candidate_pair(None);
            assert!(pair.roname.starts_with(READONLY_PREFIX));
            assert!(pair.roname.len() <= max, "{} > {max}", pair.roname.len());
            assert!(pair.name.len() <= max);
        }
    }

    #[test]
    fn valid_requested_name_is_kept() {
        let pair = policy().candidate_pair(Some("my-key"));
        assert_eq!(pair.name, "my-key");
        assert!(pair.roname.starts_with(READONLY_PREFIX));
    }

    #[test]
    fn invalid_or_forced_names_fall_back_to_random() {
        let p = policy();
        let invalid = p.candidate_pair(Some("no spaces please"));
        assert_ne!(invalid.name, "no spaces please");
        assert_eq!(invalid.name.len(), 64);

        let forced = KeyPolicy {
            force_random: true,
            ..p
        };
        assert_ne!(forced.candidate_pair(Some("my-key")).name, "my-key");
    }

    #[test]
    fn read_only_key_is_never_the_requested_name() {
        let pair = policy().candidate_pair(Some("readonly-abcdef"));
        assert_eq!(pair.name, "readonly-abcdef");
        assert_ne!(pair.roname, "readonly-abcdef");
    }

    proptest! {
        #[test]
        fn names_from_the_alphabet_are_valid(name in "[A-Za-z0-9_-]{3,64}") {
            prop_assert!(validate_name(&name, 3, 64));
        }

        #[test]
        fn validate_matches_the_pattern(name in "\\PC{0,70}") {
            let expected = name.len() >= 3
                && name.len() <= 64
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            prop_assert_eq!(validate_name(&name, 3, 64), expected);
        }

        #[test]
        fn any_whitespace_is_rejected(a in "[a-z]{2,10}", b in "[a-z]{2,10}", ws in "[ \\t\\n\\r]") {
            let name = format!("{a}{ws}{b}");
            prop_assert!(!validate_name(&name, 1, 64));
        }
    }

    #[test]
    fn generated_lengths_match_generated_ids() {
        for max in [25, 26, 40, 64, 255] {
            let p = KeyPolicy { max_len: max, ..policy() };
            let pair = p.candidate_pair(None);
            assert_eq!(
                generated_id_lengths(max),
                (pair.name.len(), pair.roname.len())
            );
        }
        assert_eq!(generated_id_lengths(26), (26, 25));
        assert_eq!(generated_id_lengths(25), (24, 25));
    }
}
