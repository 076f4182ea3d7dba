//! # Hash-Table Representation With HFE Metadata
//!
//! The full hash table encoding (`HT`). Grounded in the teacher engine's
//! `hashbrown` + `ahash` combination (`hkv-engine/src/memory.rs`'s
//! `ShardInner::map`), generalized from `Arc<[u8]>` byte strings to
//! [`Field`] values that may carry their own expiry metadata.
//!
//! Two variants exist per `spec.md` §4.4: a plain table and one whose
//! header additionally carries an `hfe` (private ebuckets) and the hash's
//! own slot in the global index. Rather than two Rust types we carry a
//! single `Option<HfeMeta>` — promoting a hash in place is then just
//! filling in that `Option`, matching "reallocating the header region" in
//! spirit without needing unsafe reallocation.

use ahash::RandomState;
use hashbrown::HashMap;

use crate::ebuckets::{EBuckets, ItemHandle};
use crate::field::Field;

/// Present once a hash table has had at least one field expiry attached.
pub struct HfeMeta {
    /// Owned copy of the hash's key, synchronized on rename by the
    /// keyspace layer (stands in for the source's borrowed key pointer).
    pub key: Box<[u8]>,
    /// Private index over this hash's own expiring fields.
    pub ebuckets: EBuckets<Box<[u8]>>,
    /// This hash's position in the process-wide expiration index.
    pub global_handle: Option<ItemHandle>,
}

impl HfeMeta {
    fn new(key: impl Into<Box<[u8]>>, precision_ms: i64) -> Self {
        HfeMeta {
            key: key.into(),
            ebuckets: EBuckets::new(precision_ms),
            global_handle: None,
        }
    }
}

/// `HT`: a full hash table, optionally carrying per-field HFE metadata.
pub struct HashTable {
    pub fields: HashMap<Box<[u8]>, Field, RandomState>,
    pub hfe: Option<HfeMeta>,
}

impl HashTable {
    pub fn new() -> Self {
        HashTable {
            fields: HashMap::with_hasher(RandomState::new()),
            hfe: None,
        }
    }

    /// Promotes this table in place to carry HFE metadata, if it doesn't
    /// already. No-op if already promoted.
    pub fn ensure_hfe(&mut self, key: impl Into<Box<[u8]>>, precision_ms: i64) {
        if self.hfe.is_none() {
            self.hfe = Some(HfeMeta::new(key, precision_ms));
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: &[u8]) -> Option<&Field> {
        self.fields.get(field)
    }

    /// Links `field`'s metadata into the private ebuckets under `t`,
    /// upgrading the field's own storage to the metadata-carrying form if
    /// needed (`spec.md` §4.4: "its key is upgraded... via `dictSetKey`").
    ///
    /// Requires `self.hfe` to already be `Some` (call `ensure_hfe` first).
    pub fn attach_expiry(&mut self, field_name: &[u8], t: i64) {
        let hfe = self.hfe.as_mut().expect("attach_expiry requires ensure_hfe");
        let Some(field) = self.fields.get_mut(field_name) else {
            return;
        };
        field.upgrade_to_expiry();

        // Detach any previous link before re-linking under the new time.
        if let Some(old_handle) = field.meta().and_then(|m| m.bucket_handle) {
            hfe.ebuckets.remove(old_handle);
        }
        let handle = hfe.ebuckets.add(field_name.into(), t);
        let meta = field.meta_mut().unwrap();
        meta.expire_at_ms = Some(t);
        meta.bucket_handle = Some(handle);
    }

    /// Removes `field`'s TTL, detaching it from the private ebuckets
    /// without reallocating the field (`spec.md` §4.5 `persist`).
    pub fn detach_expiry(&mut self, field_name: &[u8]) {
        let Some(field) = self.fields.get_mut(field_name) else {
            return;
        };
        let handle = field.meta().and_then(|m| m.bucket_handle);
        field.persist();
        if let (Some(hfe), Some(handle)) = (self.hfe.as_mut(), handle) {
            hfe.ebuckets.remove(handle);
        }
    }

    /// Inserts or replaces `field`'s value. If `keep_field` is false and
    /// the field previously carried a TTL, the TTL is cleared.
    pub fn set(&mut self, field_name: &[u8], value: Box<[u8]>, keep_field: bool) {
        if let Some(existing) = self.fields.get_mut(field_name) {
            match existing {
                Field::Plain(v) => *v = value,
                Field::WithExpiry(v, _) => {
                    *v = value;
                    if !keep_field {
                        self.detach_expiry(field_name);
                    }
                }
            }
        } else {
            self.fields.insert(field_name.into(), Field::new(value));
        }
    }

    /// Removes `field`, unlinking it from the private ebuckets if present.
    pub fn remove(&mut self, field_name: &[u8]) -> Option<Field> {
        let field = self.fields.remove(field_name)?;
        if let (Some(hfe), Some(handle)) = (
            self.hfe.as_mut(),
            field.meta().and_then(|m| m.bucket_handle),
        ) {
            hfe.ebuckets.remove(handle);
        }
        Some(field)
    }

    /// The hash's own minimum finite expiry, or `None`. Uses
    /// `EBuckets::min_expire` (the exact deadline), not `next_expire_time`
    /// (a bucket-coarsened lower bound) — `spec.md` §3/§8 testable property
    /// 1 requires the global index key to equal the true minimum
    /// `expire_at_ms`, not a rounded-down approximation of it.
    pub fn min_expire(&self) -> Option<i64> {
        self.hfe.as_ref().and_then(|h| h.ebuckets.min_expire())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &Field)> {
        self.fields.iter().map(|(k, v)| (k.as_ref(), v))
    }
}

impl Default for HashTable {
    fn default() -> Self {
        Self::new()
    }
}
