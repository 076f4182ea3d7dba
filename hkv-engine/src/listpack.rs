//! # Compact Listpack Representations
//!
//! Two inline encodings for small hashes: a plain `(field, value)` sequence
//! used while no field carries a TTL, and a TTL-aware sequence ordered by
//! expiry for hashes that do. The source packs these into a single
//! contiguous byte buffer; this crate represents the same *logical*
//! sequence as a `Vec` of owned byte pairs/triples; the conversion
//! thresholds (`spec.md` §4.3) are unaffected by that choice since they
//! only gate encoding transitions, not byte layout.

use crate::config::HfeConfig;

/// `LISTPACK`: a hash value with no field expirations at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listpack {
    entries: Vec<(Box<[u8]>, Box<[u8]>)>,
}

impl Listpack {
    pub fn new() -> Self {
        Listpack::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, field: &[u8]) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(f, _)| f.as_ref() == field)
            .map(|(_, v)| v.as_ref())
    }

    pub fn contains(&self, field: &[u8]) -> bool {
        self.entries.iter().any(|(f, _)| f.as_ref() == field)
    }

    /// Inserts or overwrites `field`. Returns the previous value, if any.
    pub fn set(&mut self, field: &[u8], value: impl Into<Box<[u8]>>) -> Option<Box<[u8]>> {
        if let Some(entry) = self.entries.iter_mut().find(|(f, _)| f.as_ref() == field) {
            Some(std::mem::replace(&mut entry.1, value.into()))
        } else {
            self.entries.push((field.into(), value.into()));
            None
        }
    }

    pub fn remove(&mut self, field: &[u8]) -> Option<Box<[u8]>> {
        let idx = self.entries.iter().position(|(f, _)| f.as_ref() == field)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(f, v)| (f.as_ref(), v.as_ref()))
    }

    /// Whether this listpack should convert to `HT` given `config`.
    pub fn should_convert(&self, config: &HfeConfig) -> bool {
        should_convert(
            self.entries.len(),
            self.entries
                .iter()
                .map(|(f, v)| f.len().max(v.len()))
                .max()
                .unwrap_or(0),
            config,
        )
    }
}

fn should_convert(entry_count: usize, max_field_or_value_len: usize, config: &HfeConfig) -> bool {
    entry_count > config.hash_max_listpack_entries
        || max_field_or_value_len > config.hash_max_listpack_value
}

/// One `(field, value, expiry)` triple. `expiry == 0` denotes "no TTL".
#[derive(Debug, Clone, PartialEq, Eq)]
struct Triple {
    field: Box<[u8]>,
    value: Box<[u8]>,
    expire_at_ms: i64,
}

/// `LISTPACK_EX`: a hash value with at least one prior field expiration
/// (even if that field has since been persisted), ordered by `expire_at_ms`
/// ascending with all "no TTL" (`expiry == 0`) entries trailing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListpackEx {
    triples: Vec<Triple>,
    /// Owned copy of the hash's key, kept in sync with the keyspace on
    /// rename (see `crate::keyspace`); stands in for the source's borrowed
    /// key-string reference.
    pub key: Box<[u8]>,
    /// Handle into the process-wide expiration index, or `None` if this
    /// hash currently has no finite-expiry field.
    pub global_handle: Option<crate::ebuckets::ItemHandle>,
}

/// Outcome of [`ListpackEx::set_expiry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetExpiryOutcome {
    NoField,
    NoConditionMet,
    Deleted,
    Ok,
}

/// Condition gating a `set_expiry` call (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpireCondition {
    #[default]
    None,
    Nx,
    Xx,
    Gt,
    Lt,
}

impl ListpackEx {
    pub fn new(key: impl Into<Box<[u8]>>) -> Self {
        ListpackEx {
            triples: Vec::new(),
            key: key.into(),
            global_handle: None,
        }
    }

    pub fn from_listpack(key: impl Into<Box<[u8]>>, lp: Listpack) -> Self {
        let mut ex = ListpackEx::new(key);
        for (field, value) in lp.entries {
            ex.triples.push(Triple {
                field,
                value,
                expire_at_ms: 0,
            });
        }
        ex
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    fn position(&self, field: &[u8]) -> Option<usize> {
        self.triples.iter().position(|t| t.field.as_ref() == field)
    }

    /// Returns `(value, expiry_ms_or_zero)` for `field`.
    pub fn get(&self, field: &[u8]) -> Option<(&[u8], i64)> {
        self.position(field)
            .map(|i| (self.triples[i].value.as_ref(), self.triples[i].expire_at_ms))
    }

    pub fn contains(&self, field: &[u8]) -> bool {
        self.position(field).is_some()
    }

    /// Replaces `field`'s value. Clears any TTL on that field unless
    /// `keep_field` is set (used to implement `keep_field` overwrite
    /// semantics, `spec.md` §4.8).
    pub fn set(&mut self, field: &[u8], value: impl Into<Box<[u8]>>, keep_field: bool) {
        if let Some(i) = self.position(field) {
            self.triples[i].value = value.into();
            if !keep_field && self.triples[i].expire_at_ms != 0 {
                self.persist(field);
            }
        } else {
            self.triples.push(Triple {
                field: field.into(),
                value: value.into(),
                expire_at_ms: 0,
            });
        }
    }

    pub fn remove(&mut self, field: &[u8]) -> Option<Box<[u8]>> {
        let i = self.position(field)?;
        Some(self.triples.remove(i).value)
    }

    /// Sets `field`'s expiry to `t` (absolute ms; `t <= 0` is not a valid
    /// input here — callers route `t <= now` through the `Deleted` path
    /// before calling `set_expiry`) subject to `cond`. See `spec.md` §4.3
    /// and §4.5 for the condition semantics, including the "infinity"
    /// treatment of "no TTL".
    pub fn set_expiry(&mut self, field: &[u8], t: i64, cond: ExpireCondition) -> SetExpiryOutcome {
        let Some(i) = self.position(field) else {
            return SetExpiryOutcome::NoField;
        };
        let current = self.triples[i].expire_at_ms;
        let has_ttl = current != 0;

        let met = match cond {
            ExpireCondition::None => true,
            ExpireCondition::Nx => !has_ttl,
            ExpireCondition::Xx => has_ttl,
            ExpireCondition::Gt => has_ttl && t > current,
            ExpireCondition::Lt => !has_ttl || t < current,
        };
        if !met {
            return SetExpiryOutcome::NoConditionMet;
        }

        let triple = self.triples.remove(i);
        self.insert_ordered(Triple {
            expire_at_ms: t,
            ..triple
        });
        SetExpiryOutcome::Ok
    }

    fn insert_ordered(&mut self, triple: Triple) {
        let pos = if triple.expire_at_ms == 0 {
            self.triples.len()
        } else {
            self.triples
                .iter()
                .position(|t| t.expire_at_ms == 0 || t.expire_at_ms > triple.expire_at_ms)
                .unwrap_or(self.triples.len())
        };
        self.triples.insert(pos, triple);
    }

    /// Sets `field`'s expiry to "no TTL" and moves it to the trailing run.
    pub fn persist(&mut self, field: &[u8]) -> bool {
        let Some(i) = self.position(field) else {
            return false;
        };
        if self.triples[i].expire_at_ms == 0 {
            return false;
        }
        let mut triple = self.triples.remove(i);
        triple.expire_at_ms = 0;
        self.triples.push(triple);
        true
    }

    /// The smallest finite expiry, or `None` if every field has no TTL.
    pub fn min_expire(&self) -> Option<i64> {
        self.triples
            .first()
            .map(|t| t.expire_at_ms)
            .filter(|&t| t != 0)
    }

    /// Count of leading triples with `0 < expiry <= now`.
    pub fn expire_dry_run(&self, now: i64) -> usize {
        self.triples
            .iter()
            .take_while(|t| t.expire_at_ms != 0 && t.expire_at_ms <= now)
            .count()
    }

    /// Deletes the leading run of expired triples in one range-delete,
    /// returning `(fields_deleted, next_expire_or_zero)`. Callers are
    /// responsible for propagating one deletion event per returned field.
    pub fn expire(&mut self, now: i64) -> (Vec<Box<[u8]>>, i64) {
        self.expire_up_to(now, usize::MAX)
    }

    /// Like `expire`, but deletes at most `max` of the leading due triples,
    /// leaving the rest linked for a later call (`spec.md` §4.7's bounded
    /// active-expire budget).
    pub fn expire_up_to(&mut self, now: i64, max: usize) -> (Vec<Box<[u8]>>, i64) {
        let n = self.expire_dry_run(now).min(max);
        let removed: Vec<_> = self.triples.drain(0..n).map(|t| t.field).collect();
        let next = self.min_expire().unwrap_or(0);
        (removed, next)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8], i64)> {
        self.triples
            .iter()
            .map(|t| (t.field.as_ref(), t.value.as_ref(), t.expire_at_ms))
    }

    pub fn should_convert(&self, config: &HfeConfig) -> bool {
        should_convert(
            self.triples.len(),
            self.triples
                .iter()
                .map(|t| t.field.len().max(t.value.len()))
                .max()
                .unwrap_or(0),
            config,
        )
    }

    #[cfg(debug_assertions)]
    /// Debug-only structural check used by tests: ascending finite expiries
    /// followed by zero or more "no TTL" entries (`spec.md` §3 invariant).
    pub fn check_ordering_invariant(&self) -> bool {
        let mut seen_no_ttl = false;
        let mut prev_finite = i64::MIN;
        for t in &self.triples {
            if t.expire_at_ms == 0 {
                seen_no_ttl = true;
            } else {
                if seen_no_ttl {
                    return false;
                }
                if t.expire_at_ms < prev_finite {
                    return false;
                }
                prev_finite = t.expire_at_ms;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_scenario_from_spec() {
        // hset k a 1 b 2 c 3
        let mut ex = ListpackEx::new(*b"k");
        ex.set(b"a", *b"1", false);
        ex.set(b"b", *b"2", false);
        ex.set(b"c", *b"3", false);

        ex.set_expiry(b"b", 3000, ExpireCondition::None);
        ex.set_expiry(b"c", 2000, ExpireCondition::None);
        ex.set_expiry(b"a", 4000, ExpireCondition::None);

        let order: Vec<_> = ex.iter().map(|(f, _, t)| (f.to_vec(), t)).collect();
        assert_eq!(
            order,
            vec![(b"c".to_vec(), 2000), (b"b".to_vec(), 3000), (b"a".to_vec(), 4000)]
        );
        assert_eq!(ex.min_expire(), Some(2000));
        assert!(ex.check_ordering_invariant());
    }

    #[test]
    fn gt_fails_and_lt_succeeds_against_no_ttl() {
        let mut ex = ListpackEx::new(*b"k");
        ex.set(b"f", *b"v", false);
        assert_eq!(
            ex.set_expiry(b"f", 1000, ExpireCondition::Gt),
            SetExpiryOutcome::NoConditionMet
        );
        assert_eq!(
            ex.set_expiry(b"f", 1000, ExpireCondition::Lt),
            SetExpiryOutcome::Ok
        );
    }

    #[test]
    fn persist_moves_field_to_trailing_run() {
        let mut ex = ListpackEx::new(*b"k");
        ex.set(b"a", *b"1", false);
        ex.set(b"b", *b"2", false);
        ex.set_expiry(b"a", 1000, ExpireCondition::None);
        ex.set_expiry(b"b", 500, ExpireCondition::None);
        assert!(ex.persist(b"b"));
        let order: Vec<_> = ex.iter().map(|(f, _, t)| (f.to_vec(), t)).collect();
        assert_eq!(order, vec![(b"a".to_vec(), 1000), (b"b".to_vec(), 0)]);
    }

    #[test]
    fn expire_bulk_deletes_leading_run() {
        let mut ex = ListpackEx::new(*b"k");
        ex.set(b"a", *b"1", false);
        ex.set(b"b", *b"2", false);
        ex.set(b"c", *b"3", false);
        ex.set_expiry(b"a", 100, ExpireCondition::None);
        ex.set_expiry(b"b", 200, ExpireCondition::None);
        ex.set_expiry(b"c", 10_000, ExpireCondition::None);

        let (removed, next) = ex.expire(150);
        assert_eq!(removed, vec![b"a".to_vec().into_boxed_slice()]);
        assert_eq!(next, 200);
        assert_eq!(ex.len(), 2);
    }

    #[test]
    fn expire_up_to_respects_budget() {
        let mut ex = ListpackEx::new(*b"k");
        ex.set(b"a", *b"1", false);
        ex.set(b"b", *b"2", false);
        ex.set_expiry(b"a", 100, ExpireCondition::None);
        ex.set_expiry(b"b", 200, ExpireCondition::None);

        let (removed, _) = ex.expire_up_to(1_000, 1);
        assert_eq!(removed, vec![b"a".to_vec().into_boxed_slice()]);
        assert_eq!(ex.len(), 1);
    }

    #[test]
    fn set_clears_ttl_unless_keep_field() {
        let mut ex = ListpackEx::new(*b"k");
        ex.set(b"a", *b"1", false);
        ex.set_expiry(b"a", 1000, ExpireCondition::None);

        ex.set(b"a", *b"2", true);
        assert_eq!(ex.get(b"a"), Some((&b"2"[..], 1000)));

        ex.set(b"a", *b"3", false);
        assert_eq!(ex.get(b"a"), Some((&b"3"[..], 0)));
    }
}
