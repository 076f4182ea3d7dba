//! # Per-Field Expiry Snapshot Payload
//!
//! The persistence layer's file format is out of scope (`spec.md` §1 Non-
//! goals: "defining the snapshot file format beyond the field-level
//! deletion event"); what this crate does own is the bit-exact shape of
//! one hash's per-field expiry payload, so an embedder's RDB-like writer
//! and loader can delegate the encode/decode step here instead of
//! reaching into [`crate::hash::HashValue`]'s internals (`spec.md` §6).
//!
//! Layout: a `length` (field count) followed by one record per field —
//! `(field_bytes, value_bytes)` for a field with no TTL, or
//! `(expire_at_ms, field_bytes, value_bytes)` for one that has it. All
//! integers are little-endian; this crate's own encoding tag (`LISTPACK` /
//! `LISTPACK_EX` / `HT`) is never written — it's a runtime detail, not
//! part of the stored format (`spec.md` §9, "Dual encoding").

use crate::config::HfeConfig;
use crate::hash::HashValue;
use crate::listpack::ExpireCondition;

const HAS_EXPIRY: u8 = 1;
const NO_EXPIRY: u8 = 0;

/// Logs the offending bytes as a hex dump and aborts the process. Snapshot
/// corruption is a fatal invariant violation, not a recoverable condition —
/// continuing past malformed per-field expiry data risks silently losing
/// or misattributing TTLs on load.
fn corrupted(context: &str, bytes: &[u8]) -> ! {
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ");
    tracing::error!(context, bytes = %hex, "snapshot payload is corrupted");
    panic!("snapshot payload is corrupted: {context}");
}

/// Serializes every field of `value` in iteration order.
pub fn encode(value: &HashValue) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    for (field, val, expire_at_ms) in value.iter() {
        if expire_at_ms != 0 {
            out.push(HAS_EXPIRY);
            out.extend_from_slice(&expire_at_ms.to_le_bytes());
        } else {
            out.push(NO_EXPIRY);
        }
        write_bytes(&mut out, field);
        write_bytes(&mut out, val);
    }
    out
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> &'a [u8] {
        let end = match self.pos.checked_add(n) {
            Some(end) => end,
            None => corrupted("record length overflow", self.bytes),
        };
        let slice = match self.bytes.get(self.pos..end) {
            Some(slice) => slice,
            None => corrupted("truncated record", self.bytes),
        };
        self.pos = end;
        slice
    }

    fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    fn u32(&mut self) -> u32 {
        let bytes: [u8; 4] = self.take(4).try_into().unwrap();
        u32::from_le_bytes(bytes)
    }

    fn i64(&mut self) -> i64 {
        let bytes: [u8; 8] = self.take(8).try_into().unwrap();
        i64::from_le_bytes(bytes)
    }

    fn bytes(&mut self) -> &'a [u8] {
        let len = self.u32() as usize;
        self.take(len)
    }
}

/// Rebuilds a [`HashValue`] from an [`encode`]d payload, choosing whatever
/// runtime encoding (`LISTPACK`/`LISTPACK_EX`/`HT`) `config` and the
/// reconstructed field set would naturally produce — the on-disk format
/// carries no encoding tag of its own to preserve.
///
/// `key` is required up front since any field carrying a TTL needs a
/// hash-owned key copy attached before its expiry can be set (`spec.md`
/// §4.5's Init phase; see `HashValue::ensure_can_carry_expiry`).
///
/// Panics on malformed input after logging a hex dump of the payload —
/// a truncated or ill-formed per-field record means the caller's backing
/// store has already lost data; there is nothing a `Result` here could
/// let the caller recover.
pub fn decode(bytes: &[u8], key: &[u8], config: &HfeConfig, precision_ms: i64) -> HashValue {
    let mut reader = Reader::new(bytes);
    let count = reader.u32();
    let mut value = HashValue::new();

    for _ in 0..count {
        let tag = reader.u8();
        let expire_at_ms = match tag {
            NO_EXPIRY => 0,
            HAS_EXPIRY => reader.i64(),
            _ => corrupted("unknown expiry tag", bytes),
        };
        let field = reader.bytes();
        let val = reader.bytes();

        value.upgrade_if_needed(key, expire_at_ms != 0, field.len(), val.len(), config, precision_ms);
        value.set(field, val, false);
        if expire_at_ms != 0 {
            value.set_expiry(field, expire_at_ms, ExpireCondition::None);
        }
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listpack::ExpireCondition as Cond;

    #[test]
    fn roundtrips_mixed_ttl_and_plain_fields() {
        let mut value = HashValue::new();
        value.set(b"a", b"1", false);
        value.upgrade_if_needed(b"k", true, 1, 1, &HfeConfig::default(), 64);
        value.set_expiry(b"a", 5_000, Cond::None);
        value.set(b"b", b"2", false);

        let encoded = encode(&value);
        let decoded = decode(&encoded, b"k", &HfeConfig::default(), 64);

        assert_eq!(decoded.get(b"a"), Some((&b"1"[..], 5_000)));
        assert_eq!(decoded.get(b"b"), Some((&b"2"[..], 0)));
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    #[should_panic(expected = "snapshot payload is corrupted")]
    fn panics_on_truncated_payload() {
        let mut value = HashValue::new();
        value.set(b"a", b"1", false);
        let mut encoded = encode(&value);
        encoded.truncate(encoded.len() - 1);

        decode(&encoded, b"k", &HfeConfig::default(), 64);
    }
}
