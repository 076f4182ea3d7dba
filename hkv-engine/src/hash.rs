//! # Hash Value — Dual/Triple Encoding
//!
//! Models a hash as a sum type over `{LISTPACK, LISTPACK_EX, HT}`
//! (`spec.md` §3) and encapsulates the encoding transitions behind a single
//! "upgrade" step per pair of encodings, so the invariants in §3 hold
//! atomically from the caller's point of view (`spec.md` §9, "Dual
//! encoding"). The encoding tag is never exposed outside this crate except
//! through [`crate::snapshot`].

use crate::config::HfeConfig;
use crate::ebuckets::ItemHandle;
use crate::field::Field;
use crate::hashtable::HashTable;
use crate::listpack::{ExpireCondition, Listpack, ListpackEx, SetExpiryOutcome};

/// Logs the offending bytes as a hex dump and aborts the process. A
/// listpack that reaches this point with a field name already present in
/// the table it's being copied into violates the invariant that a
/// listpack never holds duplicate fields — continuing would silently
/// drop one field's value and TTL rather than surface the corruption.
fn corrupted(context: &str, field: &[u8]) -> ! {
    let hex: String = field.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ");
    tracing::error!(context, field = %hex, "listpack is corrupted");
    panic!("listpack is corrupted: {context}");
}

/// Which of the three concrete encodings a [`HashValue`] currently uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Listpack,
    ListpackEx,
    Ht,
}

/// A hash value in one of its three encodings.
pub enum HashValue {
    Listpack(Listpack),
    ListpackEx(ListpackEx),
    Ht(HashTable),
}

impl HashValue {
    pub fn new() -> Self {
        HashValue::Listpack(Listpack::new())
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            HashValue::Listpack(_) => Encoding::Listpack,
            HashValue::ListpackEx(_) => Encoding::ListpackEx,
            HashValue::Ht(_) => Encoding::Ht,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HashValue::Listpack(lp) => lp.len(),
            HashValue::ListpackEx(lp) => lp.len(),
            HashValue::Ht(ht) => ht.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The hash's minimum finite field expiry, or `None`.
    pub fn min_expire(&self) -> Option<i64> {
        match self {
            HashValue::Listpack(_) => None,
            HashValue::ListpackEx(lp) => lp.min_expire(),
            HashValue::Ht(ht) => ht.min_expire(),
        }
    }

    /// Number of fields due to expire at or before `now_ms`, without
    /// sweeping any of them (`spec.md` §4.8 `length`'s `subtract_expired`
    /// dry-run count).
    pub fn count_due(&self, now_ms: i64) -> usize {
        match self {
            HashValue::Listpack(_) => 0,
            HashValue::ListpackEx(lp) => lp.expire_dry_run(now_ms),
            HashValue::Ht(ht) => ht
                .hfe
                .as_ref()
                .map(|h| h.ebuckets.dry_run_expired(now_ms))
                .unwrap_or(0),
        }
    }

    pub fn get(&self, field: &[u8]) -> Option<(&[u8], i64)> {
        match self {
            HashValue::Listpack(lp) => lp.get(field).map(|v| (v, 0)),
            HashValue::ListpackEx(lp) => lp.get(field),
            HashValue::Ht(ht) => ht.get(field).map(|f| match f {
                Field::Plain(v) => (v.as_ref(), 0),
                Field::WithExpiry(v, meta) => (v.as_ref(), meta.expire_at_ms.unwrap_or(0)),
            }),
        }
    }

    pub fn contains(&self, field: &[u8]) -> bool {
        match self {
            HashValue::Listpack(lp) => lp.contains(field),
            HashValue::ListpackEx(lp) => lp.contains(field),
            HashValue::Ht(ht) => ht.get(field).is_some(),
        }
    }

    /// Converts this value's encoding up (never down) as needed so that it
    /// can represent `new_entry_len` / `new_value_len` per `config`, and so
    /// that `LISTPACK` becomes at least `LISTPACK_EX` if `needs_expiry`.
    pub fn upgrade_if_needed(
        &mut self,
        key: &[u8],
        needs_expiry: bool,
        extra_field_len: usize,
        extra_value_len: usize,
        config: &HfeConfig,
        precision_ms: i64,
    ) {
        if needs_expiry {
            self.ensure_can_carry_expiry(key, precision_ms);
        }

        let should_convert_to_ht = match self {
            HashValue::Listpack(lp) => {
                lp.should_convert(config)
                    || extra_field_len > config.hash_max_listpack_value
                    || extra_value_len > config.hash_max_listpack_value
                    || lp.len() + 1 > config.hash_max_listpack_entries
            }
            HashValue::ListpackEx(lp) => {
                lp.should_convert(config)
                    || extra_field_len > config.hash_max_listpack_value
                    || extra_value_len > config.hash_max_listpack_value
                    || lp.len() + 1 > config.hash_max_listpack_entries
            }
            HashValue::Ht(_) => false,
        };

        if should_convert_to_ht {
            tracing::debug!(key = ?key, from = ?self.encoding(), "upgrading hash encoding to HT");
            self.promote_to_ht(key, precision_ms);
        }

        if needs_expiry {
            // The conversion above may have just produced a fresh `Ht`
            // without metadata, or this call may have found one already
            // sitting there from an earlier (TTL-free) promotion.
            self.ensure_can_carry_expiry(key, precision_ms);
        }
    }

    /// Promotes this value to at least `LISTPACK_EX` (if `LISTPACK`) or
    /// ensures an `HT` carries its HFE header (if `HT` without one). This
    /// is the "Init" phase's encoding-promotion step from the set-with-
    /// expiry protocol (`spec.md` §4.5); callers invoke it before the
    /// first `set_expiry` on a value that might still be TTL-naive.
    pub fn ensure_can_carry_expiry(&mut self, key: &[u8], precision_ms: i64) {
        match self {
            HashValue::Listpack(_) => {
                tracing::debug!(key = ?key, "upgrading hash encoding to LISTPACK_EX");
                let HashValue::Listpack(lp) =
                    std::mem::replace(self, HashValue::Listpack(Listpack::new()))
                else {
                    unreachable!()
                };
                *self = HashValue::ListpackEx(ListpackEx::from_listpack(key, lp));
            }
            HashValue::ListpackEx(_) => {}
            HashValue::Ht(ht) => ht.ensure_hfe(key, precision_ms),
        }
    }

    fn promote_to_ht(&mut self, key: &[u8], precision_ms: i64) {
        match self {
            HashValue::Listpack(_) => {
                let HashValue::Listpack(lp) =
                    std::mem::replace(self, HashValue::Listpack(Listpack::new()))
                else {
                    unreachable!()
                };
                let mut ht = HashTable::new();
                for (f, v) in lp.iter() {
                    if ht.get(f).is_some() {
                        corrupted("duplicate field in listpack during HT conversion", f);
                    }
                    ht.set(f, v.into(), false);
                }
                *self = HashValue::Ht(ht);
            }
            HashValue::ListpackEx(_) => {
                let HashValue::ListpackEx(lp) =
                    std::mem::replace(self, HashValue::Listpack(Listpack::new()))
                else {
                    unreachable!()
                };
                let mut ht = HashTable::new();
                let finite: Vec<_> = lp
                    .iter()
                    .map(|(f, v, t)| (f.to_vec(), v.to_vec(), t))
                    .collect();
                let has_expiry = finite.iter().any(|(_, _, t)| *t != 0);
                if has_expiry {
                    ht.ensure_hfe(key, precision_ms);
                }
                for (f, v, t) in finite {
                    if ht.get(&f).is_some() {
                        corrupted("duplicate field in listpack_ex during HT conversion", &f);
                    }
                    ht.set(&f, v.into_boxed_slice(), false);
                    if t != 0 {
                        ht.attach_expiry(&f, t);
                    }
                }
                if let Some(hfe) = ht.hfe.as_mut() {
                    hfe.global_handle = lp.global_handle;
                }
                *self = HashValue::Ht(ht);
            }
            HashValue::Ht(_) => {}
        }
    }

    /// Sets `field`'s value. `keep_field` preserves an existing TTL on
    /// overwrite (`spec.md` §4.8).
    pub fn set(&mut self, field: &[u8], value: &[u8], keep_field: bool) {
        match self {
            HashValue::Listpack(lp) => {
                lp.set(field, value);
            }
            HashValue::ListpackEx(lp) => {
                lp.set(field, value, keep_field);
            }
            HashValue::Ht(ht) => {
                ht.set(field, value.into(), keep_field);
            }
        }
    }

    pub fn remove(&mut self, field: &[u8]) -> bool {
        match self {
            HashValue::Listpack(lp) => lp.remove(field).is_some(),
            HashValue::ListpackEx(lp) => lp.remove(field).is_some(),
            HashValue::Ht(ht) => ht.remove(field).is_some(),
        }
    }

    /// Sets `field`'s expiry to absolute `t` subject to `cond`. Only valid
    /// once the value is at least `LISTPACK_EX` (callers upgrade first via
    /// `upgrade_if_needed`).
    pub fn set_expiry(&mut self, field: &[u8], t: i64, cond: ExpireCondition) -> SetExpiryOutcome {
        match self {
            HashValue::Listpack(_) => SetExpiryOutcome::NoField,
            HashValue::ListpackEx(lp) => lp.set_expiry(field, t, cond),
            HashValue::Ht(ht) => {
                let Some(existing) = ht.get(field) else {
                    return SetExpiryOutcome::NoField;
                };
                let current = existing.expire_at_ms();
                let met = match cond {
                    ExpireCondition::None => true,
                    ExpireCondition::Nx => current.is_none(),
                    ExpireCondition::Xx => current.is_some(),
                    ExpireCondition::Gt => matches!(current, Some(c) if t > c),
                    ExpireCondition::Lt => current.is_none() || matches!(current, Some(c) if t < c),
                };
                if !met {
                    return SetExpiryOutcome::NoConditionMet;
                }
                debug_assert!(
                    ht.hfe.is_some(),
                    "caller must invoke ensure_can_carry_expiry before set_expiry"
                );
                ht.attach_expiry(field, t);
                SetExpiryOutcome::Ok
            }
        }
    }

    pub fn persist(&mut self, field: &[u8]) -> bool {
        match self {
            HashValue::Listpack(_) => false,
            HashValue::ListpackEx(lp) => lp.persist(field),
            HashValue::Ht(ht) => {
                let had_ttl = ht.get(field).is_some_and(|f| f.expire_at_ms().is_some());
                if had_ttl {
                    ht.detach_expiry(field);
                }
                had_ttl
            }
        }
    }

    /// This hash's slot in the process-wide expiration index, if it is
    /// currently registered there (`spec.md` §4.1; see `crate::keyspace`).
    pub fn global_handle(&self) -> Option<ItemHandle> {
        match self {
            HashValue::Listpack(_) => None,
            HashValue::ListpackEx(lp) => lp.global_handle,
            HashValue::Ht(ht) => ht.hfe.as_ref().and_then(|h| h.global_handle),
        }
    }

    /// Updates this hash's slot in the process-wide expiration index. A
    /// `LISTPACK` has nowhere to store this and silently ignores the call;
    /// callers only register hashes that can carry a TTL in the first place.
    pub fn set_global_handle(&mut self, handle: Option<ItemHandle>) {
        match self {
            HashValue::Listpack(_) => {}
            HashValue::ListpackEx(lp) => lp.global_handle = handle,
            HashValue::Ht(ht) => {
                if let Some(hfe) = ht.hfe.as_mut() {
                    hfe.global_handle = handle;
                }
            }
        }
    }

    /// Updates the owned key copy this value carries for its own expiring
    /// fields, if any (`spec.md`'s borrowed-key-pointer model, reproduced
    /// here as an owned copy the keyspace layer must keep in sync on
    /// rename — see `crate::keyspace::Db::rename_to`).
    pub fn rekey(&mut self, new_key: &[u8]) {
        match self {
            HashValue::Listpack(_) => {}
            HashValue::ListpackEx(lp) => lp.key = new_key.into(),
            HashValue::Ht(ht) => {
                if let Some(hfe) = ht.hfe.as_mut() {
                    hfe.key = new_key.into();
                }
            }
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = (&[u8], &[u8], i64)> + '_> {
        match self {
            HashValue::Listpack(lp) => Box::new(lp.iter().map(|(f, v)| (f, v, 0))),
            HashValue::ListpackEx(lp) => Box::new(lp.iter()),
            HashValue::Ht(ht) => Box::new(ht.iter().map(|(f, field)| match field {
                Field::Plain(v) => (f, v.as_ref(), 0),
                Field::WithExpiry(v, meta) => (f, v.as_ref(), meta.expire_at_ms.unwrap_or(0)),
            })),
        }
    }
}

impl Default for HashValue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_upgrades_are_observationally_transparent() {
        let config = HfeConfig {
            hash_max_listpack_entries: 2,
            ..Default::default()
        };

        let mut small = HashValue::new();
        small.set(b"a", b"1", false);
        small.upgrade_if_needed(b"k", false, 1, 1, &config, 64);

        let mut big = HashValue::new();
        big.set(b"a", b"1", false);
        big.set(b"b", b"2", false);
        big.set(b"c", b"3", false);
        big.upgrade_if_needed(b"k", false, 1, 1, &config, 64);

        assert_eq!(small.encoding(), Encoding::Listpack);
        assert_eq!(big.encoding(), Encoding::Ht);
        assert_eq!(small.get(b"a"), Some((&b"1"[..], 0)));
        assert_eq!(big.get(b"a"), Some((&b"1"[..], 0)));
    }

    #[test]
    fn value_length_overflow_triggers_ht_before_insert() {
        let config = HfeConfig {
            hash_max_listpack_value: 8,
            ..Default::default()
        };
        let mut h = HashValue::new();
        h.set(b"f", b"12345678", false);
        h.upgrade_if_needed(b"k", false, 1, 8, &config, 64);
        assert_eq!(h.encoding(), Encoding::Listpack);

        h.upgrade_if_needed(b"k", false, 2, 9, &config, 64);
        h.set(b"f2", b"123456789", false);
        assert_eq!(h.encoding(), Encoding::Ht);
    }

    #[test]
    fn promote_listpack_ex_to_ht_preserves_triples_and_min_expire() {
        let mut h = HashValue::new();
        h.set(b"a", b"1", false);
        h.upgrade_if_needed(b"k", true, 1, 1, &Default::default(), 64);
        h.set_expiry(b"a", 5000, ExpireCondition::None);
        assert_eq!(h.encoding(), Encoding::ListpackEx);

        let config = HfeConfig {
            hash_max_listpack_entries: 0,
            ..Default::default()
        };
        h.upgrade_if_needed(b"k", false, 1, 1, &config, 64);
        assert_eq!(h.encoding(), Encoding::Ht);
        assert_eq!(h.min_expire(), Some(5000));
        assert_eq!(h.get(b"a"), Some((&b"1"[..], 5000)));
    }
}
