//! Query text canonicalization for ledger keys.

/// Key shared by every observation that carried no usable query text
pub const SENTINEL_KEY: &str = "auto";

/// Lower-case and trim raw query text into a ledger key.
///
/// Lookup, create and update must all go through this so that one question
/// maps to exactly one record.
pub fn normalize(raw: &str) -> String {
    let key = raw.trim().to_lowercase();
    if key.is_empty() {
        SENTINEL_KEY.to_string()
    } else {
        key
    }
}
