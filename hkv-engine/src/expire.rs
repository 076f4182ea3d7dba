//! # Lazy And Active Expiration
//!
//! Two complementary mechanisms keep expired fields from being observed
//! indefinitely (`spec.md` §4.6/§4.7):
//!
//! - **Lazy**: every read/write path that touches a specific field checks
//!   that field's own deadline against the caller's `now` before acting on
//!   it, deleting it (and propagating the deletion) on the way.
//! - **Active**: a background-style sweep pulls due fields out of a hash's
//!   private index (or, at the [`crate::keyspace`] level, out of the
//!   process-wide index across many hashes) under a bounded per-call quota,
//!   so no single call can block for an unbounded hash.
//!
//! Both are expressed here as free functions over a `HashValue` rather than
//! methods, so [`crate::keyspace::Db`] can drive active expiration across
//! hashes while still borrowing its own keyspace map and sink independently
//! (see that module for why this split matters).

use crate::hash::HashValue;
use crate::propagate::{propagate_hdel, PropagationSink};

/// Outcome of checking one field for expiration on a read/write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyCheck {
    /// The field didn't exist, or existed and has no expired TTL.
    Live,
    /// The field existed but had expired; it has been removed and its
    /// deletion propagated.
    Expired,
}

/// Checks `field` in `value` against `now_ms`, deleting and propagating if
/// it has expired. Suppressed entirely by `config.lazy_expire_disabled`
/// (`spec.md` §4.6: snapshot load, replica stream, or an explicit
/// operator override all route through that flag rather than calling
/// this at all).
///
/// Callers are responsible for noticing when `value` becomes empty as a
/// result and removing the hash from the keyspace (see
/// [`crate::keyspace::Db`]).
pub fn lazy_check_field(
    value: &mut HashValue,
    key: &[u8],
    field: &[u8],
    now_ms: i64,
    db_id: usize,
    sink: &mut dyn PropagationSink,
) -> LazyCheck {
    let Some((_, expire_at_ms)) = value.get(field) else {
        return LazyCheck::Live;
    };
    if expire_at_ms == 0 || expire_at_ms > now_ms {
        return LazyCheck::Live;
    }

    value.remove(field);
    propagate_hdel(sink, db_id, key, field);
    tracing::trace!(db_id, key = ?key, field = ?field, "lazily expired field");
    LazyCheck::Expired
}

/// Checks every currently-materialized field of `value` against `now_ms`.
/// Used by whole-hash read paths (`spec.md` §4.8 `all`/`values`/`length`)
/// that must not observe any expired field, not just one named field.
///
/// This walks live fields rather than the expiry index, so it is not
/// bounded by a quota; active expiration exists precisely so this list
/// stays short in steady state.
pub fn lazy_check_all(
    value: &mut HashValue,
    key: &[u8],
    now_ms: i64,
    db_id: usize,
    sink: &mut dyn PropagationSink,
) -> usize {
    let due: Vec<Box<[u8]>> = value
        .iter()
        .filter(|&(_, _, t)| t != 0 && t <= now_ms)
        .map(|(f, _, _)| f.into())
        .collect();
    for field in &due {
        value.remove(field);
        propagate_hdel(sink, db_id, key, field);
        tracing::trace!(db_id, key = ?key, field = ?field, "lazily expired field");
    }
    due.len()
}

/// Outcome of one [`hash_active_expire`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashActiveExpireOutcome {
    pub fields_expired: usize,
    pub became_empty: bool,
    /// The hash's new minimum finite expiry, if it still has one.
    pub next_expire_ms: Option<i64>,
}

/// Drives `value`'s own private expiry index for up to `quota` field
/// deletions at or before `now_ms`, propagating one event per field
/// removed (`spec.md` §4.7). A `LISTPACK` (no TTL ever attached) is
/// always a no-op.
pub fn hash_active_expire(
    value: &mut HashValue,
    key: &[u8],
    now_ms: i64,
    quota: usize,
    db_id: usize,
    sink: &mut dyn PropagationSink,
) -> HashActiveExpireOutcome {
    if quota == 0 {
        return HashActiveExpireOutcome {
            fields_expired: 0,
            became_empty: value.is_empty(),
            next_expire_ms: value.min_expire(),
        };
    }

    let removed: Vec<Box<[u8]>> = match value {
        HashValue::Listpack(_) => Vec::new(),
        HashValue::ListpackEx(lp) => {
            let (removed, _) = lp.expire_up_to(now_ms, quota);
            removed
        }
        HashValue::Ht(ht) => {
            let Some(hfe) = ht.hfe.as_mut() else {
                return HashActiveExpireOutcome {
                    fields_expired: 0,
                    became_empty: ht.is_empty(),
                    next_expire_ms: None,
                };
            };
            let due = hfe.ebuckets.take_expired(now_ms, quota);
            for field in &due {
                ht.fields.remove(field);
            }
            due
        }
    };

    for field in &removed {
        propagate_hdel(sink, db_id, key, field);
    }

    if !removed.is_empty() {
        tracing::debug!(db_id, key = ?key, fields_expired = removed.len(), quota, "active-expired hash fields");
    }

    HashActiveExpireOutcome {
        fields_expired: removed.len(),
        became_empty: value.is_empty(),
        next_expire_ms: value.min_expire(),
    }
}
