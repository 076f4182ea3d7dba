//! # Hash Field Expiration Engine
//!
//! A per-field TTL engine for hash/dict values: three interchangeable
//! encodings (`LISTPACK`, `LISTPACK_EX`, `HT`), a generic time-bucketed
//! priority index ("ebuckets") used both per-hash and process-wide, lazy
//! expiration on read, and a bounded active-expiration sweep, with every
//! engine-initiated deletion propagated through an injectable sink so a
//! persistence/replication layer observes the same state changes.
//!
//! Command dispatch, network I/O, the RDB file format, scripting, and
//! cluster routing are explicitly out of scope — this crate is the storage
//! core an embedder wires those concerns around.
//!
//! ## Module Map
//!
//! - [`ebuckets`] — generic time-bucketed priority index
//! - [`field`] — a hash field, with inline expiry metadata once attached
//! - [`listpack`] — the `LISTPACK`/`LISTPACK_EX` compact encodings
//! - [`hashtable`] — the `HT` encoding, with its own private `ebuckets`
//! - [`hash`] — the `HashValue` sum type and its encoding transitions
//! - [`config`] — engine tunables
//! - [`expire`] — lazy and per-hash active expiration
//! - [`propagate`] — the deletion-propagation sink
//! - [`keyspace`] — the top-level `Db` and the per-field command surface
//! - [`snapshot`] — bit-exact per-field expiry payload encoding

pub mod config;
pub mod ebuckets;
pub mod expire;
pub mod field;
pub mod hash;
pub mod hashtable;
pub mod keyspace;
pub mod listpack;
pub mod ops;
pub mod propagate;
pub mod snapshot;

pub use config::HfeConfig;
pub use hash::{Encoding, HashValue};
pub use keyspace::{Db, Keyspace};
pub use ops::FieldOutcome;
pub use propagate::{NullSink, PropagatedCommand, PropagationSink, VecSink};
