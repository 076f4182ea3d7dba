//! # Deletion Propagation
//!
//! The injectable persistence/replication sink from `spec.md` §4.7.1/§6:
//! every engine-initiated field removal (lazy or active) is turned into a
//! synthetic `HDEL key field` command and handed to this sink so replicas
//! and the append log observe the same deletions the primary made,
//! independent of clock or quantum drift between nodes.
//!
//! Grounded in the "injectable sink, single entry point" design note
//! (`spec.md` §9) — the engine never reaches for a thread-local flag here,
//! only this trait object.

/// A single synthesized command, ready to append/replicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagatedCommand {
    pub db_id: usize,
    pub argv: Vec<Vec<u8>>,
}

/// The persistence/replication collaborator (`spec.md` §6).
///
/// Implementations decide their own batching; the engine only guarantees
/// it calls `propagate` once per deleted field, in occurrence order, and
/// brackets the whole batch of field deletions produced by one engine
/// operation with `enter_execution_unit`/`exit_execution_unit`.
pub trait PropagationSink {
    fn propagate(&mut self, cmd: PropagatedCommand);

    /// Opens a batching/transaction boundary. Default: no-op.
    fn enter_execution_unit(&mut self) {}

    /// Closes the boundary opened by `enter_execution_unit`. Default: no-op.
    fn exit_execution_unit(&mut self) {}
}

/// Emits a synthetic `HDEL key field` for one lazily/actively expired field.
pub fn propagate_hdel(sink: &mut dyn PropagationSink, db_id: usize, key: &[u8], field: &[u8]) {
    sink.propagate(PropagatedCommand {
        db_id,
        argv: vec![b"HDEL".to_vec(), key.to_vec(), field.to_vec()],
    });
}

/// Emits a synthetic `DEL key` for a hash that became empty and was
/// removed from the keyspace as a side effect of expiration.
pub fn propagate_del(sink: &mut dyn PropagationSink, db_id: usize, key: &[u8]) {
    sink.propagate(PropagatedCommand {
        db_id,
        argv: vec![b"DEL".to_vec(), key.to_vec()],
    });
}

/// Emits the replication rewrite of an accepted expiration command: always
/// `HPEXPIREAT key at_ms FIELDS 1 field`, regardless of which of the four
/// `H[P]EXPIRE[AT]` variants the caller originally accepted, so replicas
/// apply the same absolute deadline irrespective of relative timing or
/// clock skew (`spec.md` §6, "Replication rewrite").
pub fn propagate_hpexpireat(sink: &mut dyn PropagationSink, db_id: usize, key: &[u8], field: &[u8], at_ms: i64) {
    sink.propagate(PropagatedCommand {
        db_id,
        argv: vec![
            b"HPEXPIREAT".to_vec(),
            key.to_vec(),
            at_ms.to_string().into_bytes(),
            b"FIELDS".to_vec(),
            b"1".to_vec(),
            field.to_vec(),
        ],
    });
}

/// A sink that discards everything. The default choice for embedders that
/// don't need persistence or replication (e.g. pure caching use).
#[derive(Debug, Default)]
pub struct NullSink;

impl PropagationSink for NullSink {
    fn propagate(&mut self, _cmd: PropagatedCommand) {}
}

/// A sink that records every call, for assertions in tests
/// (`spec.md` §8, testable property 5: "exactly once" propagation).
#[derive(Debug, Default)]
pub struct VecSink {
    pub commands: Vec<PropagatedCommand>,
    in_unit: usize,
}

impl PropagationSink for VecSink {
    fn propagate(&mut self, cmd: PropagatedCommand) {
        self.commands.push(cmd);
    }

    fn enter_execution_unit(&mut self) {
        self.in_unit += 1;
    }

    fn exit_execution_unit(&mut self) {
        self.in_unit = self.in_unit.saturating_sub(1);
    }
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every `enter_execution_unit` call has been matched by an
    /// `exit_execution_unit` call.
    pub fn is_balanced(&self) -> bool {
        self.in_unit == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_sink_records_in_order() {
        let mut sink = VecSink::new();
        sink.enter_execution_unit();
        propagate_hdel(&mut sink, 0, b"k", b"a");
        propagate_hdel(&mut sink, 0, b"k", b"b");
        sink.exit_execution_unit();

        assert_eq!(sink.commands.len(), 2);
        assert_eq!(sink.commands[0].argv[2], b"a");
        assert_eq!(sink.commands[1].argv[2], b"b");
        assert!(sink.is_balanced());
    }
}
