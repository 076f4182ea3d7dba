//! # Engine Configuration
//!
//! Plain, explicitly-passed configuration for the hash field expiration
//! engine, mirroring the options enumerated in the specification's
//! configuration table rather than reading from thread-local or global
//! config state (see the "avoid implicit access" design note).

/// Tunables for hash encoding thresholds and expiration behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HfeConfig {
    /// Upper bound on entry count before `LISTPACK`/`LISTPACK_EX` convert to `HT`.
    pub hash_max_listpack_entries: usize,
    /// Upper bound on a field or value's byte length in listpack form.
    pub hash_max_listpack_value: usize,
    /// When set, read paths skip lazy expiration (replica stream, RDB load,
    /// or an explicit operator override).
    pub lazy_expire_disabled: bool,
    /// Maximum field-deletions performed by a single active-expire call.
    pub active_expire_quota_per_cycle: usize,
}

impl Default for HfeConfig {
    fn default() -> Self {
        HfeConfig {
            hash_max_listpack_entries: 128,
            hash_max_listpack_value: 64,
            lazy_expire_disabled: false,
            active_expire_quota_per_cycle: 20,
        }
    }
}

/// Quantization precision used by every [`crate::ebuckets::EBuckets`]
/// instance in this engine: a few seconds, as a power of two millisecond
/// count (`spec.md` §4.1 leaves the exact value implementation-chosen).
pub const EBUCKETS_PRECISION_MS: i64 = 4096;

impl HfeConfig {
    /// Minimum change in a hash's minimum expiry required to republish it
    /// in the global index (`max(4000ms, one bucket quantum)`).
    ///
    /// The spec's literal text ("`max(4000 ms, 2^P)` where P is the
    /// ebuckets precision") is internally inconsistent if `P` is already a
    /// millisecond quantity — see DESIGN.md for the reading adopted here:
    /// `P` denotes the quantum itself, not an exponent.
    pub fn hash_new_expire_diff_threshold_ms(&self) -> i64 {
        4000i64.max(EBUCKETS_PRECISION_MS)
    }
}
