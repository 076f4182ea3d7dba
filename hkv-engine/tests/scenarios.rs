//! End-to-end scenarios, one per concrete example enumerated in `spec.md`
//! §8 ("Concrete end-to-end scenarios"). Each test drives `Db` purely
//! through its public API, the way an embedder's command layer would.

use std::cell::RefCell;
use std::rc::Rc;

use hkv_engine::listpack::ExpireCondition;
use hkv_engine::propagate::{PropagatedCommand, PropagationSink, VecSink};
use hkv_engine::{Db, FieldOutcome, HfeConfig, Keyspace};

fn db() -> Db {
    Db::with_sink(0, HfeConfig::default(), Box::new(VecSink::new()))
}

/// Records every propagated command into a handle the test keeps, since
/// `Db` owns its sink and doesn't hand it back.
#[derive(Clone, Default)]
struct SharedSink(Rc<RefCell<Vec<PropagatedCommand>>>);

impl PropagationSink for SharedSink {
    fn propagate(&mut self, cmd: PropagatedCommand) {
        self.0.borrow_mut().push(cmd);
    }
}

#[test]
fn scenario_1_basic_expire_then_lazy_get() {
    let sink = SharedSink::default();
    let mut db = Db::with_sink(0, HfeConfig::default(), Box::new(sink.clone()));
    db.set(b"k", b"f1", b"v1", false);

    let outcomes = db
        .hpexpireat(b"k", &[b"f1"], 1500, ExpireCondition::None, 1000)
        .unwrap();
    assert_eq!(outcomes, vec![FieldOutcome::Ok]);

    assert_eq!(db.get(b"k", b"f1", 1499).as_deref(), Some(&b"v1"[..]));
    assert_eq!(db.get(b"k", b"f1", 1500), None);
    assert!(!db.exists(b"k", b"f1", 1500));

    let commands = sink.0.borrow();
    let hdels: Vec<_> = commands.iter().filter(|c| c.argv[0] == b"HDEL").collect();
    assert_eq!(hdels.len(), 1, "HDEL k f1 propagated exactly once");
}

#[test]
fn scenario_2_ordering_on_listpack_ex() {
    let mut db = db();
    db.set(b"k", b"a", b"1", false);
    db.set(b"k", b"b", b"2", false);
    db.set(b"k", b"c", b"3", false);

    db.hpexpireat(b"k", &[b"b"], 3000, ExpireCondition::None, 0).unwrap();
    db.hpexpireat(b"k", &[b"c"], 2000, ExpireCondition::None, 0).unwrap();
    db.hpexpireat(b"k", &[b"a"], 4000, ExpireCondition::None, 0).unwrap();

    let value = db.lookup(b"k").unwrap();
    let order: Vec<_> = value.iter().map(|(f, _, t)| (f.to_vec(), t)).collect();
    assert_eq!(
        order,
        vec![(b"c".to_vec(), 2000), (b"b".to_vec(), 3000), (b"a".to_vec(), 4000)]
    );
    assert_eq!(value.min_expire(), Some(2000));
}

#[test]
fn scenario_3_conditional_expire() {
    let mut db = db();
    db.set(b"k", b"f", b"v", false);

    let outcome = db
        .hpexpireat(b"k", &[b"f"], 2000, ExpireCondition::None, 1000)
        .unwrap();
    assert_eq!(outcome, vec![FieldOutcome::Ok]);

    let not_met = db
        .hpexpireat(b"k", &[b"f"], 1500, ExpireCondition::Gt, 1000)
        .unwrap();
    assert_eq!(not_met, vec![FieldOutcome::NoConditionMet]);

    let met = db
        .hpexpireat(b"k", &[b"f"], 1500, ExpireCondition::Lt, 1000)
        .unwrap();
    assert_eq!(met, vec![FieldOutcome::Ok]);

    let ttl = db.httl(b"k", &[b"f"], 1000);
    assert_eq!(ttl.len(), 1);
    assert!(ttl[0] >= 0 && ttl[0] <= 1);
}

#[test]
fn scenario_4_empty_hash_removal_via_active_expire() {
    let mut db = db();
    db.set(b"k", b"only", b"v", false);

    let outcomes = db
        .hpexpireat(b"k", &[b"only"], 500, ExpireCondition::None, 1000)
        .unwrap();
    assert_eq!(outcomes, vec![FieldOutcome::Deleted]);
    assert!(db.lookup(b"k").is_none());
}

#[test]
fn scenario_5_encoding_upgrade_on_length_overflow() {
    let config = HfeConfig {
        hash_max_listpack_value: 8,
        ..Default::default()
    };
    let mut db = Db::with_sink(0, config, Box::new(VecSink::new()));

    db.set(b"k", b"f", b"12345678", false);
    assert_eq!(db.lookup(b"k").unwrap().encoding(), hkv_engine::Encoding::Listpack);

    db.set(b"k", b"f2", b"123456789", false);
    assert_eq!(db.lookup(b"k").unwrap().encoding(), hkv_engine::Encoding::Ht);

    let outcomes = db.hexpire(b"k", &[b"f"], 60, ExpireCondition::None, 0).unwrap();
    assert_eq!(outcomes, vec![FieldOutcome::Ok]);
    assert!(db.next_expire_time().is_some());
}

#[test]
fn scenario_6_replication_rewrite() {
    let sink = SharedSink::default();
    let mut db = Db::with_sink(0, HfeConfig::default(), Box::new(sink.clone()));
    db.set(b"k", b"f", b"v", false);

    let outcomes = db.hexpire(b"k", &[b"f"], 10, ExpireCondition::None, 1000).unwrap();
    assert_eq!(outcomes, vec![FieldOutcome::Ok]);

    let commands = sink.0.borrow();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].argv[0], b"HPEXPIREAT");
    assert_eq!(commands[0].argv[1], b"k");
    assert_eq!(commands[0].argv[2], b"11000");
}
