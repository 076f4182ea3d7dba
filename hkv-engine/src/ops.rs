//! # Per-Field Expiration Commands
//!
//! The six read/write operations `spec.md` §6 groups under the
//! `FIELDS <count> <field...>` tail: `HEXPIRE`, `HPEXPIRE`, `HEXPIREAT`,
//! `HPEXPIREAT` (write), `HTTL`/`HPTTL`/`HEXPIRETIME`/`HPEXPIRETIME` (read),
//! and `HPERSIST`. Parsing the wire arguments is out of scope (`spec.md`
//! §1's "command dispatch/argument parsing" non-goal) — these methods take
//! already-decoded numeric arguments and field lists, and return one
//! [`FieldOutcome`]/value per field, in field order.
//!
//! Every accepted write is propagated in its replication-rewritten form —
//! `HPEXPIREAT` with the resolved absolute millisecond deadline — per
//! `spec.md` §6's "Replication rewrite".

use crate::keyspace::Db;
use crate::listpack::{ExpireCondition, SetExpiryOutcome};
use hkv_common::{HkvError, HkvResult};

/// One per-field result code (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOutcome {
    NoField = -2,
    NoTtl = -1,
    NoConditionMet = 0,
    Ok = 1,
    Deleted = 2,
}

impl FieldOutcome {
    pub fn code(self) -> i64 {
        self as i64
    }
}

fn seconds_to_ms(seconds: i64) -> HkvResult<i64> {
    seconds.checked_mul(1_000).ok_or(HkvError::ExpireOverflow)
}

impl Db {
    /// `HEXPIRE key seconds [cond] FIELDS count field...`
    pub fn hexpire(
        &mut self,
        key: &[u8],
        fields: &[&[u8]],
        seconds: i64,
        cond: ExpireCondition,
        now_ms: i64,
    ) -> HkvResult<Vec<FieldOutcome>> {
        let at_ms = now_ms
            .checked_add(seconds_to_ms(seconds)?)
            .ok_or(HkvError::ExpireOverflow)?;
        Ok(self.set_expiry_fields(key, fields, at_ms, cond, now_ms))
    }

    /// `HPEXPIRE key millis [cond] FIELDS count field...`
    pub fn hpexpire(
        &mut self,
        key: &[u8],
        fields: &[&[u8]],
        millis: i64,
        cond: ExpireCondition,
        now_ms: i64,
    ) -> HkvResult<Vec<FieldOutcome>> {
        let at_ms = now_ms.checked_add(millis).ok_or(HkvError::ExpireOverflow)?;
        Ok(self.set_expiry_fields(key, fields, at_ms, cond, now_ms))
    }

    /// `HEXPIREAT key unix-time-seconds [cond] FIELDS count field...`
    pub fn hexpireat(
        &mut self,
        key: &[u8],
        fields: &[&[u8]],
        unix_seconds: i64,
        cond: ExpireCondition,
        now_ms: i64,
    ) -> HkvResult<Vec<FieldOutcome>> {
        let at_ms = seconds_to_ms(unix_seconds)?;
        Ok(self.set_expiry_fields(key, fields, at_ms, cond, now_ms))
    }

    /// `HPEXPIREAT key unix-time-milliseconds [cond] FIELDS count field...`
    pub fn hpexpireat(
        &mut self,
        key: &[u8],
        fields: &[&[u8]],
        unix_ms: i64,
        cond: ExpireCondition,
        now_ms: i64,
    ) -> HkvResult<Vec<FieldOutcome>> {
        Ok(self.set_expiry_fields(key, fields, unix_ms, cond, now_ms))
    }

    fn set_expiry_fields(
        &mut self,
        key: &[u8],
        fields: &[&[u8]],
        at_ms: i64,
        cond: ExpireCondition,
        now_ms: i64,
    ) -> Vec<FieldOutcome> {
        fields
            .iter()
            .map(|&field| self.set_one_field_expiry(key, field, at_ms, cond, now_ms))
            .collect()
    }

    /// The set-with-expiry protocol's Init/Apply/Finalize phases
    /// (`spec.md` §4.5) for one field: Init promotes the encoding so it can
    /// carry a TTL; Apply evaluates the condition and writes the deadline;
    /// Finalize republishes the hash in the global index, or — if the
    /// accepted deadline already lies at or before `now_ms` — deletes the
    /// field immediately and reports `DELETED` instead of `OK`.
    fn set_one_field_expiry(
        &mut self,
        key: &[u8],
        field: &[u8],
        at_ms: i64,
        cond: ExpireCondition,
        now_ms: i64,
    ) -> FieldOutcome {
        self.lazy_touch_field(key, field, now_ms);

        let (set_outcome, became_empty) = {
            let Some(value) = self.entries.get_mut(key) else {
                return FieldOutcome::NoField;
            };
            if !value.contains(field) {
                return FieldOutcome::NoField;
            }
            value.ensure_can_carry_expiry(key, self.precision_ms);
            let outcome = value.set_expiry(field, at_ms, cond);
            if matches!(outcome, SetExpiryOutcome::Ok) && at_ms <= now_ms {
                value.remove(field);
            }
            (outcome, value.is_empty())
        };

        match set_outcome {
            SetExpiryOutcome::NoField => FieldOutcome::NoField,
            SetExpiryOutcome::NoConditionMet => FieldOutcome::NoConditionMet,
            SetExpiryOutcome::Deleted => {
                unreachable!("HashValue::set_expiry never produces Deleted on its own")
            }
            SetExpiryOutcome::Ok if at_ms <= now_ms => {
                crate::propagate::propagate_hdel(self.sink.as_mut(), self.id, key, field);
                if became_empty {
                    self.drop_emptied_hash(key);
                } else {
                    self.sync_global_index(key);
                }
                FieldOutcome::Deleted
            }
            SetExpiryOutcome::Ok => {
                crate::propagate::propagate_hpexpireat(self.sink.as_mut(), self.id, key, field, at_ms);
                self.sync_global_index(key);
                FieldOutcome::Ok
            }
        }
    }

    /// `HPTTL key FIELDS count field...` — remaining milliseconds, or a
    /// sentinel from `{NoField, NoTtl}`.
    pub fn hpttl(&mut self, key: &[u8], fields: &[&[u8]], now_ms: i64) -> Vec<i64> {
        fields
            .iter()
            .map(|&field| {
                self.lazy_touch_field(key, field, now_ms);
                match self.entries.get(key).and_then(|v| v.get(field)) {
                    None => FieldOutcome::NoField.code(),
                    Some((_, 0)) => FieldOutcome::NoTtl.code(),
                    Some((_, t)) => (t - now_ms).max(0),
                }
            })
            .collect()
    }

    /// `HTTL key FIELDS count field...` — remaining seconds (rounded up),
    /// or a sentinel from `{NoField, NoTtl}`.
    pub fn httl(&mut self, key: &[u8], fields: &[&[u8]], now_ms: i64) -> Vec<i64> {
        self.hpttl(key, fields, now_ms)
            .into_iter()
            .map(|ms| if ms < 0 { ms } else { (ms + 999) / 1_000 })
            .collect()
    }

    /// `HPEXPIRETIME key FIELDS count field...` — absolute deadline in
    /// epoch milliseconds, or a sentinel from `{NoField, NoTtl}`.
    ///
    /// `spec.md` §9 leaves the exact command-name string the source passes
    /// internally for this and `HEXPIRETIME` as an inconsistency not worth
    /// reproducing; only the returned values are part of this crate's
    /// contract.
    pub fn hpexpiretime(&mut self, key: &[u8], fields: &[&[u8]], now_ms: i64) -> Vec<i64> {
        fields
            .iter()
            .map(|&field| {
                self.lazy_touch_field(key, field, now_ms);
                match self.entries.get(key).and_then(|v| v.get(field)) {
                    None => FieldOutcome::NoField.code(),
                    Some((_, 0)) => FieldOutcome::NoTtl.code(),
                    Some((_, t)) => t,
                }
            })
            .collect()
    }

    /// `HEXPIRETIME key FIELDS count field...` — absolute deadline in unix
    /// seconds, or a sentinel from `{NoField, NoTtl}`.
    pub fn hexpiretime(&mut self, key: &[u8], fields: &[&[u8]], now_ms: i64) -> Vec<i64> {
        self.hpexpiretime(key, fields, now_ms)
            .into_iter()
            .map(|ms| if ms < 0 { ms } else { ms / 1_000 })
            .collect()
    }

    /// `HPERSIST key FIELDS count field...` — clears each field's TTL,
    /// reporting `OK` if one was cleared or `NoTtl`/`NoField` otherwise.
    pub fn hpersist(&mut self, key: &[u8], fields: &[&[u8]], now_ms: i64) -> Vec<FieldOutcome> {
        fields
            .iter()
            .map(|&field| self.hpersist_one(key, field, now_ms))
            .collect()
    }

    fn hpersist_one(&mut self, key: &[u8], field: &[u8], now_ms: i64) -> FieldOutcome {
        self.lazy_touch_field(key, field, now_ms);

        let had_ttl = {
            let Some(value) = self.entries.get_mut(key) else {
                return FieldOutcome::NoField;
            };
            if !value.contains(field) {
                return FieldOutcome::NoField;
            }
            value.persist(field)
        };

        if had_ttl {
            self.sync_global_index(key);
            FieldOutcome::Ok
        } else {
            FieldOutcome::NoTtl
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HfeConfig;
    use crate::propagate::{NullSink, VecSink};

    fn db() -> Db {
        Db::with_sink(0, HfeConfig::default(), Box::new(VecSink::new()))
    }

    #[test]
    fn hexpire_then_httl_is_in_range() {
        let mut db = db();
        db.set(b"k", b"f", b"v", false);
        let outcomes = db.hexpire(b"k", &[b"f"], 10, ExpireCondition::None, 1_000).unwrap();
        assert_eq!(outcomes, vec![FieldOutcome::Ok]);

        let ttl = db.httl(b"k", &[b"f"], 1_000);
        assert_eq!(ttl, vec![10]);
    }

    #[test]
    fn hpersist_then_httl_reports_no_ttl() {
        let mut db = db();
        db.set(b"k", b"f", b"v", false);
        db.hexpire(b"k", &[b"f"], 10, ExpireCondition::None, 0).unwrap();
        assert_eq!(db.hpersist(b"k", &[b"f"], 0), vec![FieldOutcome::Ok]);
        assert_eq!(db.httl(b"k", &[b"f"], 0), vec![FieldOutcome::NoTtl.code()]);
    }

    #[test]
    fn gt_condition_rejects_smaller_deadline() {
        let mut db = db();
        db.set(b"k", b"f", b"v", false);
        db.hpexpireat(b"k", &[b"f"], 2_000, ExpireCondition::None, 0).unwrap();
        let outcomes = db
            .hpexpireat(b"k", &[b"f"], 1_500, ExpireCondition::Gt, 1_000)
            .unwrap();
        assert_eq!(outcomes, vec![FieldOutcome::NoConditionMet]);
    }

    #[test]
    fn past_deadline_deletes_and_reports_deleted() {
        let mut db = db();
        db.set(b"k", b"only", b"v", false);
        let outcomes = db
            .hpexpireat(b"k", &[b"only"], 500, ExpireCondition::None, 1_000)
            .unwrap();
        assert_eq!(outcomes, vec![FieldOutcome::Deleted]);
        assert!(db.lookup(b"k").is_none());
    }

    #[test]
    fn encoding_upgrade_on_overflow_then_hexpire_registers_in_global_index() {
        let config = HfeConfig {
            hash_max_listpack_value: 8,
            ..Default::default()
        };
        let mut db = Db::with_sink(0, config, Box::new(NullSink));
        db.set(b"k", b"f", b"12345678", false);
        db.set(b"k", b"f2", b"123456789", false);
        assert_eq!(db.lookup(b"k").unwrap().encoding(), crate::hash::Encoding::Ht);

        let outcomes = db.hexpire(b"k", &[b"f"], 60, ExpireCondition::None, 0).unwrap();
        assert_eq!(outcomes, vec![FieldOutcome::Ok]);
        assert!(db.next_expire_time().is_some());
    }
}
