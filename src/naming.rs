//! Volume name normalization.
//!
//! The appliance only accepts ASCII letters and digits in target and LUN
//! names. Requested names are lowercased and every other character is
//! dropped. The mapping is lossy: `"db-1"` and `"db.1"` both become `"db1"`
//! and therefore address the same volume. Callers that need distinct volumes
//! must choose names that stay distinct after normalization.

/// Normalizes `name` into the appliance identifier charset.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}
