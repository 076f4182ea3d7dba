//! # Keyspace And Top-Level Database
//!
//! `Db` owns one logical keyspace: a map of keys to hash values plus the
//! process-wide expiration index that tracks each hash by its own earliest
//! field deadline (`spec.md` §4.1, §6). There is no internal locking here —
//! per `spec.md` §5, an embedder owns one `Db` per logical shard/database
//! and is the sole caller into it; this is a deliberate departure from the
//! sharded `parking_lot`-locked design in `crate::memory` (see DESIGN.md).
//!
//! The [`Keyspace`] trait is the seam an embedder's command layer talks to;
//! `Db` is this crate's reference implementation, grounded in the teacher
//! engine's `hashbrown` + `ahash` map (`crate::memory::ShardInner::map`)
//! generalized from flat byte strings to [`HashValue`]s.

use ahash::RandomState;
use hashbrown::HashMap;
use rand::Rng;

use crate::config::HfeConfig;
use crate::ebuckets::{EBuckets, ExpireAction};
use crate::expire::{hash_active_expire, lazy_check_all, lazy_check_field, LazyCheck};
use crate::hash::HashValue;
use crate::propagate::{propagate_del, NullSink, PropagationSink};
use hkv_common::{HkvError, HkvResult};

/// The command-layer seam onto a keyspace. An embedder's dispatcher talks
/// to this trait, not to `Db`'s concrete fields (`spec.md` §6).
pub trait Keyspace {
    fn lookup(&self, key: &[u8]) -> Option<&HashValue>;
    fn lookup_mut(&mut self, key: &[u8]) -> Option<&mut HashValue>;
    fn insert(&mut self, key: &[u8], value: HashValue);
    fn remove_key(&mut self, key: &[u8]) -> Option<HashValue>;
    /// Looks up a value together with its own stored key copy — the shape
    /// an HFE-aware lookup needs to (re)attach owned-key metadata.
    fn find_entry(&self, key: &[u8]) -> Option<(&[u8], &HashValue)>;
}

/// One logical keyspace/database (`spec.md` §1's "owning process").
pub struct Db {
    pub(crate) id: usize,
    pub(crate) config: HfeConfig,
    pub(crate) precision_ms: i64,
    pub(crate) entries: HashMap<Box<[u8]>, HashValue, RandomState>,
    pub(crate) global: EBuckets<Box<[u8]>>,
    pub(crate) sink: Box<dyn PropagationSink>,
}

impl Keyspace for Db {
    fn lookup(&self, key: &[u8]) -> Option<&HashValue> {
        self.entries.get(key)
    }

    fn lookup_mut(&mut self, key: &[u8]) -> Option<&mut HashValue> {
        self.entries.get_mut(key)
    }

    fn insert(&mut self, key: &[u8], value: HashValue) {
        self.entries.insert(key.into(), value);
    }

    fn remove_key(&mut self, key: &[u8]) -> Option<HashValue> {
        let value = self.entries.remove(key)?;
        if let Some(handle) = value.global_handle() {
            self.global.remove(handle);
        }
        Some(value)
    }

    fn find_entry(&self, key: &[u8]) -> Option<(&[u8], &HashValue)> {
        self.entries.get_key_value(key).map(|(k, v)| (k.as_ref(), v))
    }
}

impl Db {
    pub fn new(id: usize, config: HfeConfig) -> Self {
        Db::with_sink(id, config, Box::new(NullSink))
    }

    pub fn with_sink(id: usize, config: HfeConfig, sink: Box<dyn PropagationSink>) -> Self {
        Db {
            id,
            config,
            precision_ms: crate::config::EBUCKETS_PRECISION_MS,
            entries: HashMap::with_hasher(RandomState::new()),
            global: EBuckets::new(crate::config::EBUCKETS_PRECISION_MS),
            sink,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn config(&self) -> &HfeConfig {
        &self.config
    }

    /// Re-registers (or unregisters) `key`'s slot in the process-wide
    /// expiration index after an operation may have changed its minimum
    /// field expiry, applying the republish threshold from
    /// `HfeConfig::hash_new_expire_diff_threshold_ms` so a hash with many
    /// fields expiring close together doesn't thrash the global index on
    /// every single field update (`spec.md` §4.1).
    pub(crate) fn sync_global_index(&mut self, key: &[u8]) {
        let threshold = self.config.hash_new_expire_diff_threshold_ms();
        let Some(value) = self.entries.get_mut(key) else {
            return;
        };
        let new_min = value.min_expire();
        match (value.global_handle(), new_min) {
            (None, None) => {}
            (None, Some(t)) => {
                let handle = self.global.add(key.into(), t);
                value.set_global_handle(Some(handle));
            }
            (Some(handle), None) => {
                self.global.remove(handle);
                value.set_global_handle(None);
            }
            (Some(handle), Some(t)) => {
                let recorded = self.global.expire_at(handle).unwrap_or(t);
                if (t - recorded).abs() >= threshold {
                    self.global.update(handle, t);
                }
            }
        }
    }

    /// Removes `key` entirely, propagating a synthetic `DEL` — used when a
    /// hash becomes empty as a side effect of expiration rather than an
    /// explicit `delete` call (`spec.md` §4.6/§4.7).
    pub(crate) fn drop_emptied_hash(&mut self, key: &[u8]) {
        if let Some(handle) = self
            .entries
            .get(key)
            .and_then(|value| value.global_handle())
        {
            self.global.remove(handle);
        }
        self.entries.remove(key);
        propagate_del(self.sink.as_mut(), self.id, key);
    }

    /// Applies lazy expiration to one field of `key` before a read/write
    /// touches it, per `spec.md` §4.6. Suppressed by
    /// `HfeConfig::lazy_expire_disabled` (snapshot load, replica stream, or
    /// an explicit operator override).
    pub(crate) fn lazy_touch_field(&mut self, key: &[u8], field: &[u8], now_ms: i64) {
        if self.config.lazy_expire_disabled {
            return;
        }
        let Some(value) = self.entries.get_mut(key) else {
            return;
        };
        let outcome = lazy_check_field(value, key, field, now_ms, self.id, self.sink.as_mut());
        if outcome == LazyCheck::Expired && value.is_empty() {
            self.drop_emptied_hash(key);
        } else if outcome == LazyCheck::Expired {
            self.sync_global_index(key);
        }
    }

    /// Applies lazy expiration across every field of `key` before a
    /// whole-hash read (`all`, `values`, `length`) observes it.
    pub(crate) fn lazy_touch_whole(&mut self, key: &[u8], now_ms: i64) {
        if self.config.lazy_expire_disabled {
            return;
        }
        let Some(value) = self.entries.get_mut(key) else {
            return;
        };
        let removed = lazy_check_all(value, key, now_ms, self.id, self.sink.as_mut());
        if removed == 0 {
            return;
        }
        if value.is_empty() {
            self.drop_emptied_hash(key);
        } else {
            self.sync_global_index(key);
        }
    }

    // ---- spec.md §4.8 read/write API -------------------------------------

    /// Looks up `field`'s value inside `key`'s hash, lazily expiring it
    /// first if due.
    pub fn get(&mut self, key: &[u8], field: &[u8], now_ms: i64) -> Option<Box<[u8]>> {
        self.lazy_touch_field(key, field, now_ms);
        self.entries
            .get(key)
            .and_then(|v| v.get(field))
            .map(|(value, _)| value.into())
    }

    pub fn exists(&mut self, key: &[u8], field: &[u8], now_ms: i64) -> bool {
        self.lazy_touch_field(key, field, now_ms);
        self.entries.get(key).is_some_and(|v| v.contains(field))
    }

    /// Inserts or replaces `field`. Creates `key`'s hash if absent.
    /// `keep_field` preserves an existing TTL on overwrite.
    pub fn set(&mut self, key: &[u8], field: &[u8], value: &[u8], keep_field: bool) {
        let entry = self
            .entries
            .entry(key.into())
            .or_insert_with(HashValue::new);
        entry.upgrade_if_needed(key, false, field.len(), value.len(), &self.config, self.precision_ms);
        entry.set(field, value, keep_field);
    }

    /// Inserts `field` only if it doesn't already exist (after lazy
    /// expiration is applied). Returns whether the field was set.
    pub fn set_if_absent(&mut self, key: &[u8], field: &[u8], value: &[u8], now_ms: i64) -> bool {
        self.lazy_touch_field(key, field, now_ms);
        if self.entries.get(key).is_some_and(|v| v.contains(field)) {
            return false;
        }
        self.set(key, field, value, false);
        true
    }

    /// Removes `field` from `key`'s hash. Deletes the hash entirely (and
    /// propagates a `DEL`) if that was its last field. Returns whether a
    /// live field was removed.
    pub fn delete(&mut self, key: &[u8], field: &[u8], now_ms: i64) -> bool {
        self.lazy_touch_field(key, field, now_ms);
        let Some(value) = self.entries.get_mut(key) else {
            return false;
        };
        let removed = value.remove(field);
        if !removed {
            return false;
        }
        if value.is_empty() {
            self.drop_emptied_hash(key);
        } else {
            self.sync_global_index(key);
        }
        true
    }

    /// Adds `delta` to the integer stored at `field`, creating it (as `0`)
    /// if absent. `spec.md` §4.8.
    pub fn incr_by(&mut self, key: &[u8], field: &[u8], delta: i64, now_ms: i64) -> HkvResult<i64> {
        self.lazy_touch_field(key, field, now_ms);
        let current: i64 = match self.entries.get(key).and_then(|v| v.get(field)) {
            Some((bytes, _)) => parse_int(bytes)?,
            None => 0,
        };
        let updated = current.checked_add(delta).ok_or(HkvError::IncrementOverflow)?;
        self.set(key, field, updated.to_string().as_bytes(), true);
        Ok(updated)
    }

    /// Adds `delta` to the float stored at `field`, creating it (as `0`) if
    /// absent. `spec.md` §4.8.
    pub fn incr_by_float(&mut self, key: &[u8], field: &[u8], delta: f64, now_ms: i64) -> HkvResult<f64> {
        self.lazy_touch_field(key, field, now_ms);
        let current: f64 = match self.entries.get(key).and_then(|v| v.get(field)) {
            Some((bytes, _)) => parse_float(bytes)?,
            None => 0.0,
        };
        let updated = current + delta;
        if !updated.is_finite() {
            return Err(HkvError::NotANumber);
        }
        self.set(key, field, format_float(updated).as_bytes(), true);
        Ok(updated)
    }

    /// Number of fields in `key`'s hash (`spec.md` §4.8
    /// `length(key, subtract_expired?)`). Neither branch mutates the
    /// keyspace: `subtract_expired=true` performs a non-mutating dry-run
    /// count against each field's own expiry state (`spec.md` §8 testable
    /// property 4), excluding fields due to expire at `now_ms` without
    /// sweeping them; `subtract_expired=false` returns the raw field
    /// count, including not-yet-swept expired fields.
    pub fn length(&self, key: &[u8], subtract_expired: bool, now_ms: i64) -> usize {
        let Some(value) = self.entries.get(key) else {
            return 0;
        };
        if subtract_expired {
            value.len() - value.count_due(now_ms)
        } else {
            value.len()
        }
    }

    /// Whether `key`'s hash has no live fields, treating all-expired as
    /// empty (`spec.md` §4.8 `is_empty`) — a non-mutating dry-run check,
    /// like `length(key, subtract_expired=true, now_ms)`.
    pub fn is_empty(&self, key: &[u8], now_ms: i64) -> bool {
        self.length(key, true, now_ms) == 0
    }

    /// Picks random fields from `key`'s hash (`spec.md` §4.8
    /// `random_element(key[, count][, with_values])`), sampling storage
    /// as-is without pre-skipping expired fields (`spec.md` §9 Open
    /// Question: resolved by sampling verbatim, matching `HRANDFIELD`'s
    /// documented behavior of occasionally returning a field whose TTL has
    /// technically elapsed but not yet been swept).
    ///
    /// - `count = None`: at most one field, its value included only when
    ///   `with_values` is set — matching `HRANDFIELD key`'s no-count form,
    ///   which never returns a value even for a hash that has one.
    /// - `count = Some(n)`, `n >= 0`: up to `n` distinct fields (capped at
    ///   the hash's length), via a partial Fisher-Yates shuffle so no
    ///   field repeats.
    /// - `count = Some(n)`, `n < 0`: exactly `-n` fields, independently
    ///   drawn with replacement, so the same field may repeat.
    pub fn random_element(
        &self,
        key: &[u8],
        count: Option<i64>,
        with_values: bool,
    ) -> Vec<(Box<[u8]>, Option<Box<[u8]>>)> {
        let Some(value) = self.entries.get(key) else {
            return Vec::new();
        };
        let len = value.len();
        if len == 0 {
            return Vec::new();
        }

        let fields: Vec<(Box<[u8]>, Box<[u8]>)> = value
            .iter()
            .map(|(f, v, _)| (Box::<[u8]>::from(f), Box::<[u8]>::from(v)))
            .collect();
        let pack = |(f, v): (Box<[u8]>, Box<[u8]>)| (f, with_values.then_some(v));

        let Some(n) = count else {
            let idx = rand::rng().random_range(0..len);
            return vec![pack(fields[idx].clone())];
        };

        if n >= 0 {
            let want = (n as usize).min(len);
            let mut pool = fields;
            let mut picked = Vec::with_capacity(want);
            let mut rng = rand::rng();
            for i in 0..want {
                let j = rng.random_range(i..pool.len());
                pool.swap(i, j);
                picked.push(pool[i].clone());
            }
            picked.into_iter().map(pack).collect()
        } else {
            let want = (-n) as usize;
            let mut rng = rand::rng();
            (0..want)
                .map(|_| {
                    let idx = rng.random_range(0..len);
                    pack(fields[idx].clone())
                })
                .collect()
        }
    }

    /// All `(field, value)` pairs, after lazily expiring due fields.
    pub fn all(&mut self, key: &[u8], now_ms: i64) -> Vec<(Box<[u8]>, Box<[u8]>)> {
        self.lazy_touch_whole(key, now_ms);
        self.entries
            .get(key)
            .map(|v| v.iter().map(|(f, val, _)| (f.into(), val.into())).collect())
            .unwrap_or_default()
    }

    pub fn keys(&mut self, key: &[u8], now_ms: i64) -> Vec<Box<[u8]>> {
        self.lazy_touch_whole(key, now_ms);
        self.entries
            .get(key)
            .map(|v| v.iter().map(|(f, _, _)| f.into()).collect())
            .unwrap_or_default()
    }

    pub fn values(&mut self, key: &[u8], now_ms: i64) -> Vec<Box<[u8]>> {
        self.lazy_touch_whole(key, now_ms);
        self.entries
            .get(key)
            .map(|v| v.iter().map(|(_, val, _)| val.into()).collect())
            .unwrap_or_default()
    }

    /// Iterates `key`'s fields for a cursor-based scan (`HSCAN`) without
    /// applying lazy expiration along the way (`spec.md` §9 Open Question:
    /// resolved by leaving scan pages exempt from lazy expiration, matching
    /// the documented no-side-effects-during-cursor-iteration contract —
    /// a field observed here may already be logically expired and will be
    /// swept on its next direct access or by active expiration).
    pub fn iterate_for_scan(&self, key: &[u8]) -> Vec<(Box<[u8]>, Box<[u8]>)> {
        self.entries
            .get(key)
            .map(|v| v.iter().map(|(f, val, _)| (f.into(), val.into())).collect())
            .unwrap_or_default()
    }

    /// Deep-copies `src`'s hash to `dst`, overwriting any existing value at
    /// `dst`. Returns whether `src` existed.
    pub fn duplicate(&mut self, src: &[u8], dst: &[u8], now_ms: i64) -> bool {
        self.lazy_touch_whole(src, now_ms);
        let Some(source) = self.entries.get(src) else {
            return false;
        };
        let mut copy = HashValue::new();
        for (field, value, expire_at_ms) in source.iter() {
            copy.upgrade_if_needed(
                dst,
                expire_at_ms != 0,
                field.len(),
                value.len(),
                &self.config,
                self.precision_ms,
            );
            copy.set(field, value, false);
            if expire_at_ms != 0 {
                copy.set_expiry(field, expire_at_ms, crate::listpack::ExpireCondition::None);
            }
        }
        self.remove_key(dst);
        let has_expiry = copy.min_expire().is_some();
        self.entries.insert(dst.into(), copy);
        if has_expiry {
            self.sync_global_index(dst);
        }
        true
    }

    /// Moves `src`'s hash to `dst`, updating the owned key copy any HFE
    /// metadata carries (`spec.md`'s borrowed-key-pointer model — this
    /// crate's owned-copy substitute must be resynchronized explicitly on
    /// rename; see `HashValue::rekey`). Returns whether `src` existed.
    pub fn rename_to(&mut self, src: &[u8], dst: &[u8]) -> bool {
        let Some(mut value) = self.remove_key(src) else {
            return false;
        };
        value.rekey(dst);
        self.remove_key(dst);
        self.entries.insert(dst.into(), value);
        self.sync_global_index(dst);
        true
    }

    // ---- spec.md §4.7 active expiration -----------------------------------

    /// Sweeps the process-wide expiration index for up to
    /// `max_fields_to_expire` due field deletions across however many
    /// hashes that takes, propagating one event per field and a `DEL` for
    /// any hash that becomes empty (`spec.md` §4.7). Bounded, re-entrant:
    /// safe to call repeatedly from a timer or idle loop.
    pub fn active_expire(&mut self, now_ms: i64, max_fields_to_expire: usize) -> usize {
        if self.config.lazy_expire_disabled {
            return 0;
        }

        let mut remaining = max_fields_to_expire;
        let Db {
            global,
            entries,
            sink,
            id,
            ..
        } = self;

        global.expire(now_ms, usize::MAX, |hash_key: &Box<[u8]>| {
            if remaining == 0 {
                return ExpireAction::Stop;
            }
            let Some(value) = entries.get_mut(hash_key.as_ref()) else {
                return ExpireAction::Remove;
            };
            let outcome = hash_active_expire(value, hash_key, now_ms, remaining, *id, sink.as_mut());
            remaining -= outcome.fields_expired;

            if outcome.became_empty {
                entries.remove(hash_key.as_ref());
                propagate_del(sink.as_mut(), *id, hash_key);
                return ExpireAction::Remove;
            }
            match outcome.next_expire_ms {
                Some(t) => ExpireAction::UpdateKeyTo(t),
                None => ExpireAction::Remove,
            }
        });

        let expired = max_fields_to_expire - remaining;
        tracing::debug!(db_id = self.id, expired, remaining, "active-expire cycle complete");
        expired
    }

    /// The earliest deadline across every hash still registered in the
    /// process-wide index, used to pace an active-expire timer.
    pub fn next_expire_time(&self) -> Option<i64> {
        self.global.next_expire_time()
    }
}

fn parse_int(bytes: &[u8]) -> HkvResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(HkvError::NotANumber)
}

fn parse_float(bytes: &[u8]) -> HkvResult<f64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(HkvError::NotANumber)
}

fn format_float(value: f64) -> String {
    let mut s = format!("{value:.17}");
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagate::VecSink;

    fn db_with_sink() -> (Db, ()) {
        (Db::with_sink(0, HfeConfig::default(), Box::new(VecSink::new())), ())
    }

    #[test]
    fn set_get_and_exists_roundtrip() {
        let (mut db, _) = db_with_sink();
        db.set(b"k", b"a", b"1", false);
        assert_eq!(db.get(b"k", b"a", 0).as_deref(), Some(&b"1"[..]));
        assert!(db.exists(b"k", b"a", 0));
        assert!(!db.exists(b"k", b"missing", 0));
    }

    #[test]
    fn lazy_expiration_removes_field_on_get() {
        let (mut db, _) = db_with_sink();
        db.set(b"k", b"a", b"1", false);
        if let Some(value) = db.entries.get_mut(&b"k"[..]) {
            value.upgrade_if_needed(b"k", true, 1, 1, &HfeConfig::default(), 64);
            value.set_expiry(b"a", 1_000, crate::listpack::ExpireCondition::None);
        }
        db.sync_global_index(b"k");

        assert_eq!(db.get(b"k", b"a", 2_000), None);
        assert!(db.lookup(b"k").is_none(), "last field expiring deletes the hash");
    }

    #[test]
    fn delete_on_last_field_removes_hash_and_propagates_del() {
        let (mut db, _) = db_with_sink();
        db.set(b"k", b"a", b"1", false);
        assert!(db.delete(b"k", b"a", 0));
        assert!(db.lookup(b"k").is_none());
    }

    #[test]
    fn incr_by_creates_then_accumulates() {
        let (mut db, _) = db_with_sink();
        assert_eq!(db.incr_by(b"k", b"n", 5, 0).unwrap(), 5);
        assert_eq!(db.incr_by(b"k", b"n", -2, 0).unwrap(), 3);
    }

    #[test]
    fn rename_to_moves_hash_and_rekeys_metadata() {
        let (mut db, _) = db_with_sink();
        db.set(b"src", b"a", b"1", false);
        db.entries
            .get_mut(&b"src"[..])
            .unwrap()
            .upgrade_if_needed(b"src", true, 1, 1, &HfeConfig::default(), 64);
        db.entries
            .get_mut(&b"src"[..])
            .unwrap()
            .set_expiry(b"a", 10_000, crate::listpack::ExpireCondition::None);
        db.sync_global_index(b"src");

        assert!(db.rename_to(b"src", b"dst"));
        assert!(db.lookup(b"src").is_none());
        assert_eq!(db.get(b"dst", b"a", 0).as_deref(), Some(&b"1"[..]));
    }

    #[test]
    fn active_expire_respects_budget_across_hashes() {
        let (mut db, _) = db_with_sink();
        for (k, f) in [(&b"k1"[..], &b"a"[..]), (&b"k2"[..], &b"b"[..])] {
            db.set(k, f, b"1", false);
            db.entries
                .get_mut(k)
                .unwrap()
                .upgrade_if_needed(k, true, 1, 1, &HfeConfig::default(), 64);
            db.entries
                .get_mut(k)
                .unwrap()
                .set_expiry(f, 1_000, crate::listpack::ExpireCondition::None);
            db.sync_global_index(k);
        }

        let expired = db.active_expire(5_000, 1);
        assert_eq!(expired, 1);

        let expired_again = db.active_expire(5_000, 10);
        assert_eq!(expired_again, 1);
        assert!(db.lookup(b"k1").is_none());
        assert!(db.lookup(b"k2").is_none());
    }
}
