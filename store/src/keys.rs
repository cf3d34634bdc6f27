//! KV key encoding for the embedding store.
//!
//! Logo IDs are zero-padded to 20 decimal digits so a prefix scan returns
//! records in ascending logo_id order, which makes listing pagination
//! deterministic and total.

/// Key of an embedding record.
/// Format: `v:{model_version}:e:{logo_id_20d}`
pub fn embedding_key(model_version: &str, logo_id: u64) -> String {
    format!("v:{model_version}:e:{logo_id:020}")
}

/// Prefix covering all embedding records of a model version.
/// Format: `v:{model_version}:e:`
pub fn embedding_prefix(model_version: &str) -> String {
    format!("v:{model_version}:e:")
}

/// Key of the per-version dimension marker, written with the first record.
/// Format: `v:{model_version}:dim`
pub fn dim_key(model_version: &str) -> String {
    format!("v:{model_version}:dim")
}

/// Extract the logo_id from an embedding key given its prefix.
pub fn parse_logo_id(key: &str, prefix: &str) -> Option<u64> {
    key.strip_prefix(prefix)?.parse().ok()
}
