//! Shared proptest generators.

use std::time::Duration;

use proptest::prelude::*;

/// Generate secret keys shaped like S3 object keys or Vault paths.
pub fn secret_key_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{3,10}/[a-z0-9-]{3,20}\\.json",
        "secret/data/[a-z]{3,10}/[a-z0-9-]{3,20}",
    ]
}

/// Generate distinct secret keys.
pub fn distinct_keys_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set(secret_key_strategy(), 1..=max)
        .prop_map(|keys| keys.into_iter().collect())
}

/// Generate opaque secret payloads.
pub fn secret_bytes_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..256)
}

/// Generate positive cache TTLs between one second and one day.
pub fn ttl_strategy() -> impl Strategy<Value = Duration> {
    (1u64..=86_400).prop_map(Duration::from_secs)
}

/// Generate elapsed times that stay strictly inside `ttl`.
pub fn within_ttl_strategy(ttl: Duration) -> impl Strategy<Value = Duration> {
    let max = ttl.as_millis().saturating_sub(1);
    let max = u64::try_from(max).unwrap_or(u64::MAX);
    (0..=max).prop_map(Duration::from_millis)
}

/// Generate non-empty bucket names.
pub fn bucket_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{2,40}"
}

/// Generate AWS region names.
pub fn region_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("us-east-1".to_string()),
        Just("us-west-2".to_string()),
        Just("eu-west-1".to_string()),
        Just("ap-southeast-2".to_string()),
    ]
}
