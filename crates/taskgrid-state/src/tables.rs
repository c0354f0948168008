//! redb table definitions for the profile store.
//!
//! Both tables use `&str` keys and `&[u8]` values (JSON-serialized `Profile`).

use redb::TableDefinition;

/// Profiles of live workers keyed by `{worker}:{signature}`.
pub const WORKER_PROFILES: TableDefinition<&str, &[u8]> = TableDefinition::new("worker_profiles");

/// Profiles merged from workers that left the pool, keyed by `{signature}`.
pub const RETIRED_PROFILES: TableDefinition<&str, &[u8]> = TableDefinition::new("retired_profiles");

/// Build the `WORKER_PROFILES` key.
pub fn profile_key(worker: &str, signature: &str) -> String {
    format!("{worker}:{signature}")
}

/// Split a `WORKER_PROFILES` key back into worker and signature.
///
/// Worker names never contain `:`; signatures may.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
}
