//! # Field String With Inline Metadata
//!
//! The source engine tags a field's expiration bookkeeping onto the field's
//! own allocation (a fixed metadata block prepended to the byte string) so
//! a single pointer resolves to both the field's identity and its expiry
//! state, and distinguishes field handles from hash handles in the shared
//! ebuckets address space by forcing the pointer's low bit to one.
//!
//! Safe Rust has no pointer tagging, and this crate never shares one
//! ebuckets address space between field and hash handles in the first
//! place (each [`crate::ebuckets::EBuckets`] instance is generic over a
//! single item type), so the tag bit has no job here. We reproduce the
//! *behavior* — identity and expiry metadata resolved together, an upgrade
//! path that allocates only when a field first acquires a TTL — with a
//! plain enum discriminant standing in for the tag bit.

use crate::ebuckets::ItemHandle;

/// Per-field expiration bookkeeping, present only on [`Field::WithExpiry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldMeta {
    /// Absolute deadline in epoch milliseconds, or `None` (infinite TTL).
    pub expire_at_ms: Option<i64>,
    /// Position in the owning hash's private ebuckets, or `None`
    /// ("detached"/"trash").
    pub bucket_handle: Option<ItemHandle>,
}

impl FieldMeta {
    /// Invariant (spec.md §3): `bucket_handle.is_some()` iff the field is
    /// currently linked with a finite `expire_at_ms`.
    pub fn is_attached(&self) -> bool {
        self.bucket_handle.is_some()
    }
}

/// A hash field: a byte string, optionally carrying expiration metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// No metadata reserved — the common case for fields without a TTL.
    Plain(Box<[u8]>),
    /// Metadata reserved; `meta.expire_at_ms == None` once persisted.
    WithExpiry(Box<[u8]>, FieldMeta),
}

impl Field {
    /// Allocates a field with no metadata reserved.
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        Field::Plain(bytes.into())
    }

    /// Allocates a field with metadata reserved but detached (no TTL yet).
    pub fn new_with_expiry(bytes: impl Into<Box<[u8]>>) -> Self {
        Field::WithExpiry(bytes.into(), FieldMeta::default())
    }

    pub fn name(&self) -> &[u8] {
        match self {
            Field::Plain(b) => b,
            Field::WithExpiry(b, _) => b,
        }
    }

    pub fn meta(&self) -> Option<&FieldMeta> {
        match self {
            Field::Plain(_) => None,
            Field::WithExpiry(_, m) => Some(m),
        }
    }

    pub fn meta_mut(&mut self) -> Option<&mut FieldMeta> {
        match self {
            Field::Plain(_) => None,
            Field::WithExpiry(_, m) => Some(m),
        }
    }

    pub fn expire_at_ms(&self) -> Option<i64> {
        self.meta().and_then(|m| m.expire_at_ms)
    }

    /// Upgrades a plain field to the metadata-carrying form in place,
    /// reusing the source's "swap the key pointer" step as a value move:
    /// the old allocation is simply dropped, the caller's binding stays
    /// valid (single `&mut Field` receiver, no aliasing to repair).
    pub fn upgrade_to_expiry(&mut self) {
        if let Field::Plain(bytes) = self {
            let bytes = std::mem::take(bytes);
            *self = Field::WithExpiry(bytes, FieldMeta::default());
        }
    }

    /// Removes the field's TTL without reallocating. The field stays in
    /// its metadata-carrying form with the metadata marked detached; an
    /// implementer may optionally downgrade to `Plain` later, but this
    /// crate does not, matching the spec's "not required" note.
    pub fn persist(&mut self) {
        if let Field::WithExpiry(_, meta) = self {
            meta.expire_at_ms = None;
            meta.bucket_handle = None;
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expire_at_ms(), Some(t) if t <= now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_field_has_no_metadata() {
        let f = Field::new(*b"hello");
        assert!(f.meta().is_none());
        assert_eq!(f.name(), b"hello");
    }

    #[test]
    fn upgrade_preserves_bytes_and_reserves_metadata() {
        let mut f = Field::new(*b"hello");
        f.upgrade_to_expiry();
        assert_eq!(f.name(), b"hello");
        assert!(f.meta().unwrap().bucket_handle.is_none());
    }

    #[test]
    fn persist_detaches_without_downgrading() {
        let mut f = Field::new_with_expiry(*b"hello");
        f.meta_mut().unwrap().expire_at_ms = Some(1000);
        f.meta_mut().unwrap().bucket_handle = Some(3);
        f.persist();
        assert!(matches!(f, Field::WithExpiry(_, _)));
        assert_eq!(f.expire_at_ms(), None);
        assert!(!f.meta().unwrap().is_attached());
    }

    #[test]
    fn is_expired_compares_against_now() {
        let mut f = Field::new_with_expiry(*b"x");
        f.meta_mut().unwrap().expire_at_ms = Some(1_500);
        assert!(!f.is_expired(1_499));
        assert!(f.is_expired(1_500));
    }
}
