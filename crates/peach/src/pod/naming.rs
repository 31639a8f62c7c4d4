//! Deterministic pod and service names.

use sha2::{Digest, Sha256};

/// Number of hex characters of the digest kept in a pod name.
pub const NAME_HASH_LEN: usize = 12;

/// Default prefix for environment pods.
pub const DEFAULT_NAME_PREFIX: &str = "peach-ws-";

/// Kubernetes DNS-1123 label limit.
const MAX_LABEL_LEN: usize = 63;

/// Derive the pod (and service) name for an environment.
///
/// The name is a pure function of the environment id so it can be recomputed
/// after a restart without a stored mapping.
pub fn derive_pod_name(prefix: &str, environment_id: &str) -> String {
    let digest = Sha256::digest(environment_id.as_bytes());
    let hash = hex::encode(digest);
    format!("{}{}", prefix, &hash[..NAME_HASH_LEN])
}

/// Check that a prefix still yields valid DNS-1123 labels.
pub fn validate_prefix(prefix: &str) -> Result<(), String> {
    if prefix.is_empty() {
        return Err("pod name prefix cannot be empty".to_string());
    }
    if prefix.len() + NAME_HASH_LEN > MAX_LABEL_LEN {
        return Err(format!(
            "pod name prefix '{}' is too long (max {} chars)",
            prefix,
            MAX_LABEL_LEN - NAME_HASH_LEN
        ));
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!(
            "pod name prefix '{}' must contain only lowercase letters, digits and '-'",
            prefix
        ));
    }
    if !prefix.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(format!(
            "pod name prefix '{}' must start with a lowercase letter",
            prefix
        ));
    }
    Ok(())
}
