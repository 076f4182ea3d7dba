//! # Expiration Bucket Index ("ebuckets")
//!
//! A generic priority index that groups items by coarse expiration time.
//! Used twice by this crate: once per hash, to index its own fields (see
//! [`crate::hashtable`]), and once process-wide, to index hashes by their
//! earliest field expiry (see [`crate::keyspace`]).
//!
//! ## Design Principles
//!
//! 1. **Coarse Bucketing**: Time is quantized to a power-of-two millisecond
//!    precision so nearby deadlines share a bucket instead of each earning
//!    its own tree node.
//! 2. **O(1) Removal By Handle**: Callers hold an opaque [`ItemHandle`]
//!    returned from `add`; `remove`/`update` cost is independent of bucket
//!    population.
//! 3. **Slab Storage**: Items live in a slot arena with a free-list, the
//!    same pattern the teacher engine uses for its LRU node arena, so
//!    removal never shifts unrelated handles.
//!
//! Buckets only guarantee ordering to the bucket boundary; callers that
//! need exact ordering within a bucket re-check the item's own
//! `expire_at_ms` (see `expire`'s exact-time filter below).

use std::collections::BTreeMap;

/// Opaque position of an item inside an [`EBuckets`] instance.
///
/// Stored by the owner (a field's inline metadata, or a hash's HFE header)
/// as its `bucket_handle`. `usize::MAX` is reserved as the "detached"
/// sentinel so owners can store this inline without an `Option` wrapper if
/// they prefer; the API itself uses `Option<ItemHandle>` for clarity.
pub type ItemHandle = usize;

/// Outcome requested by the `expire` callback for each visited item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpireAction {
    /// Unlink the item; its handle becomes invalid.
    Remove,
    /// Re-bucket the item under a new absolute deadline, keeping its handle.
    UpdateKeyTo(i64),
    /// Stop the scan; this item and all later ones remain linked.
    Stop,
}

struct Slot<T> {
    item: T,
    expire_at_ms: i64,
    bucket_key: i64,
    pos_in_bucket: usize,
}

/// A priority index over items carrying an absolute `expire_at_ms`.
pub struct EBuckets<T> {
    precision_ms: i64,
    slots: Vec<Option<Slot<T>>>,
    free: Vec<ItemHandle>,
    buckets: BTreeMap<i64, Vec<ItemHandle>>,
    len: usize,
}

impl<T> EBuckets<T> {
    /// Creates an empty index quantizing time to `precision_ms`.
    ///
    /// `precision_ms` is rounded up to the next power of two if it isn't
    /// one already, per the "power of two" contract.
    pub fn new(precision_ms: i64) -> Self {
        let precision_ms = precision_ms.max(1).next_power_of_two();
        EBuckets {
            precision_ms,
            slots: Vec::new(),
            free: Vec::new(),
            buckets: BTreeMap::new(),
            len: 0,
        }
    }

    /// The quantization precision this index was built with.
    pub fn precision_ms(&self) -> i64 {
        self.precision_ms
    }

    /// Number of linked items.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_key(&self, expire_at_ms: i64) -> i64 {
        expire_at_ms - expire_at_ms.rem_euclid(self.precision_ms)
    }

    /// Links `item` under absolute deadline `t`, returning its handle.
    pub fn add(&mut self, item: T, t: i64) -> ItemHandle {
        let bucket_key = self.bucket_key(t);
        let handle = match self.free.pop() {
            Some(h) => h,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        let bucket = self.buckets.entry(bucket_key).or_default();
        let pos_in_bucket = bucket.len();
        bucket.push(handle);

        self.slots[handle] = Some(Slot {
            item,
            expire_at_ms: t,
            bucket_key,
            pos_in_bucket,
        });
        self.len += 1;
        handle
    }

    /// Unlinks the bucket-local slot for `handle`, returning its item.
    ///
    /// Patches the slot of whichever item the swap-remove relocated so
    /// that item's own `pos_in_bucket` stays accurate.
    fn unlink(&mut self, handle: ItemHandle) -> Option<Slot<T>> {
        let slot = self.slots[handle].take()?;
        let bucket_empty = {
            let bucket = self.buckets.get_mut(&slot.bucket_key)?;
            bucket.swap_remove(slot.pos_in_bucket);
            if slot.pos_in_bucket < bucket.len() {
                let moved = bucket[slot.pos_in_bucket];
                if let Some(moved_slot) = self.slots[moved].as_mut() {
                    moved_slot.pos_in_bucket = slot.pos_in_bucket;
                }
            }
            bucket.is_empty()
        };
        if bucket_empty {
            self.buckets.remove(&slot.bucket_key);
        }
        self.len -= 1;
        Some(slot)
    }

    /// Removes `handle`, returning the detached item if it was still linked.
    pub fn remove(&mut self, handle: ItemHandle) -> Option<T> {
        let slot = self.unlink(handle)?;
        self.free.push(handle);
        Some(slot.item)
    }

    /// Re-buckets an already-linked item under a new deadline, keeping its
    /// handle valid. Equivalent to `remove` followed by `add` but avoids
    /// invalidating the caller's `ItemHandle`.
    pub fn update(&mut self, handle: ItemHandle, t: i64) {
        let Some(slot) = self.unlink(handle) else {
            return;
        };
        let bucket_key = self.bucket_key(t);
        let bucket = self.buckets.entry(bucket_key).or_default();
        let pos_in_bucket = bucket.len();
        bucket.push(handle);
        self.slots[handle] = Some(Slot {
            item: slot.item,
            expire_at_ms: t,
            bucket_key,
            pos_in_bucket,
        });
        self.len += 1;
    }

    /// Borrows the item linked at `handle`, if any.
    pub fn get(&self, handle: ItemHandle) -> Option<&T> {
        self.slots.get(handle)?.as_ref().map(|s| &s.item)
    }

    /// The absolute deadline `handle` is currently linked under, if any.
    pub fn expire_at(&self, handle: ItemHandle) -> Option<i64> {
        self.slots.get(handle)?.as_ref().map(|s| s.expire_at_ms)
    }

    /// The earliest bucket lower bound, or `None` if the index is empty.
    /// Coarsened to `precision_ms`; callers needing the exact minimum
    /// `expire_at_ms` (`spec.md` §3/§8 testable property 1) want
    /// [`EBuckets::min_expire`] instead. This accessor exists for pacing an
    /// active-expire sweep, where a coarsened lower bound is acceptable.
    pub fn next_expire_time(&self) -> Option<i64> {
        self.buckets.keys().next().copied()
    }

    /// The exact minimum `expire_at_ms` across every linked item, or `None`
    /// if empty. Earlier bucket keys always bound strictly earlier exact
    /// deadlines than later ones, so the true minimum is always found
    /// within the earliest non-empty bucket.
    pub fn min_expire(&self) -> Option<i64> {
        let (_, handles) = self.buckets.iter().next()?;
        handles
            .iter()
            .filter_map(|&h| self.slots[h].as_ref().map(|s| s.expire_at_ms))
            .min()
    }

    /// Counts items that would expire at `now` without removing them.
    pub fn dry_run_expired(&self, now: i64) -> usize {
        let mut count = 0;
        for (&bucket_key, handles) in &self.buckets {
            if bucket_key > now {
                break;
            }
            for &handle in handles {
                if let Some(slot) = &self.slots[handle] {
                    if slot.expire_at_ms <= now {
                        count += 1;
                    }
                }
            }
        }
        count
    }

    /// Finds the next due handle in `bucket_key`'s bucket, if any.
    fn due_handle_in_bucket(&self, bucket_key: i64, now: i64) -> Option<ItemHandle> {
        let bucket = self.buckets.get(&bucket_key)?;
        bucket.iter().copied().find(|&h| {
            self.slots[h]
                .as_ref()
                .is_some_and(|slot| slot.expire_at_ms <= now)
        })
    }

    /// Result of a call to [`EBuckets::expire`].
    ///
    /// Buckets can hold a mix of due and not-yet-due items (a bucket spans a
    /// whole `precision_ms` window). Once a bucket has no due item left we
    /// must move past its key exactly, not just re-query `..=now` — that
    /// would keep re-selecting the same non-empty-but-dry bucket forever.
    pub fn expire(
        &mut self,
        now: i64,
        max_items: usize,
        mut on_item: impl FnMut(&T) -> ExpireAction,
    ) -> ExpireResult {
        let mut items_expired = 0;
        let mut cursor: Option<i64> = None;

        loop {
            if items_expired >= max_items {
                break;
            }

            let next_bucket = match cursor {
                None => self.buckets.range(..=now).next(),
                Some(c) => self.buckets.range((c + 1)..=now).next(),
            };
            let Some((&bucket_key, _)) = next_bucket else {
                break;
            };

            let Some(handle) = self.due_handle_in_bucket(bucket_key, now) else {
                cursor = Some(bucket_key);
                continue;
            };

            let action = {
                let item = &self.slots[handle].as_ref().unwrap().item;
                on_item(item)
            };

            match action {
                ExpireAction::Remove => {
                    self.remove(handle);
                    items_expired += 1;
                }
                ExpireAction::UpdateKeyTo(t) => {
                    self.update(handle, t);
                    items_expired += 1;
                }
                ExpireAction::Stop => break,
            }
        }

        ExpireResult {
            items_expired,
            next_expire_time: self.next_expire_time(),
        }
    }

    /// Removes and returns up to `max_items` items due at or before `now`,
    /// in bucket order. Unlike `expire`, ownership of each item is handed
    /// back to the caller instead of being dropped — used where the caller
    /// still needs the item's identity after unlinking it (e.g. to also
    /// remove it from an owning field map).
    pub fn take_expired(&mut self, now: i64, max_items: usize) -> Vec<T> {
        let mut out = Vec::new();
        let mut cursor: Option<i64> = None;

        while out.len() < max_items {
            let next_bucket = match cursor {
                None => self.buckets.range(..=now).next(),
                Some(c) => self.buckets.range((c + 1)..=now).next(),
            };
            let Some((&bucket_key, _)) = next_bucket else {
                break;
            };

            let Some(handle) = self.due_handle_in_bucket(bucket_key, now) else {
                cursor = Some(bucket_key);
                continue;
            };

            if let Some(item) = self.remove(handle) {
                out.push(item);
            }
        }

        out
    }
}

/// Outcome of a call to [`EBuckets::expire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpireResult {
    pub items_expired: usize,
    pub next_expire_time: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_next_expire_time_tracks_minimum_bucket() {
        let mut eb = EBuckets::new(1024);
        eb.add("a", 5_000);
        eb.add("b", 1_000);
        eb.add("c", 9_000);
        let next = eb.next_expire_time().unwrap();
        assert!(next <= 1_000);
    }

    #[test]
    fn remove_by_handle_is_isolated() {
        let mut eb = EBuckets::new(1024);
        let ha = eb.add("a", 1_000);
        let hb = eb.add("b", 1_000);
        eb.remove(ha);
        assert_eq!(eb.len(), 1);
        assert_eq!(eb.get(hb), Some(&"b"));
    }

    #[test]
    fn dry_run_counts_without_mutating() {
        let mut eb = EBuckets::new(1024);
        eb.add("a", 1_000);
        eb.add("b", 2_000);
        assert_eq!(eb.dry_run_expired(1_500), 1);
        assert_eq!(eb.len(), 2);
    }

    #[test]
    fn expire_removes_up_to_now_respecting_quota() {
        let mut eb = EBuckets::new(64);
        eb.add("a", 100);
        eb.add("b", 200);
        eb.add("c", 10_000);

        let mut seen = Vec::new();
        let result = eb.expire(5_000, 10, |item| {
            seen.push(*item);
            ExpireAction::Remove
        });

        assert_eq!(result.items_expired, 2);
        assert_eq!(seen, vec!["a", "b"]);
        assert_eq!(eb.len(), 1);
        assert_eq!(eb.next_expire_time(), Some(eb.bucket_key(10_000)));
    }

    #[test]
    fn expire_honors_quota_and_stop() {
        let mut eb = EBuckets::new(8);
        eb.add("a", 10);
        eb.add("b", 20);

        let result = eb.expire(100, 1, |_| ExpireAction::Remove);
        assert_eq!(result.items_expired, 1);
        assert_eq!(eb.len(), 1);
    }

    #[test]
    fn expire_update_key_to_keeps_handle_valid() {
        let mut eb = EBuckets::new(8);
        let h = eb.add("a", 10);

        let result = eb.expire(10, 10, |_| ExpireAction::UpdateKeyTo(10_000));
        assert_eq!(result.items_expired, 1);
        assert_eq!(eb.get(h), Some(&"a"));
        assert_eq!(eb.dry_run_expired(10), 0);
    }

    #[test]
    fn expire_advances_past_a_bucket_with_mixed_due_items() {
        // precision 8 buckets expire_at 10 and 14 into the same bucket key.
        let mut eb = EBuckets::new(8);
        eb.add("a", 10);
        let hb = eb.add("b", 14);

        let result = eb.expire(12, 10, |_| ExpireAction::Remove);

        assert_eq!(result.items_expired, 1);
        assert_eq!(eb.len(), 1);
        assert_eq!(eb.get(hb), Some(&"b"));
    }

    #[test]
    fn min_expire_returns_exact_deadline_not_bucket_key() {
        let mut eb = EBuckets::new(64);
        eb.add("a", 5_000);
        eb.add("b", 5_030);
        // bucket_key(5000, 64) == 4992, but no item's exact deadline is 4992.
        assert_eq!(eb.min_expire(), Some(5_000));
        assert_eq!(eb.next_expire_time(), Some(4_992));
    }

    #[test]
    fn take_expired_hands_back_ownership() {
        let mut eb = EBuckets::new(64);
        eb.add("a".to_string(), 100);
        eb.add("b".to_string(), 200);
        eb.add("c".to_string(), 10_000);

        let taken = eb.take_expired(5_000, 10);
        assert_eq!(taken, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(eb.len(), 1);
    }
}
