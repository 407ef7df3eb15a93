use common::Direction;
use kv_engine::{database::open_db, env::EnvBuilder, ops::put, txn::{Txn, TxnMode}, Cursor};
use range_cursor::{Bound, RangeCursor};

fn seeded_txn(env: &kv_engine::KvEnv) -> Txn {
    let txn = Txn::begin(env, None, TxnMode::ReadWrite).unwrap();
    let dbi = open_db(&txn, Some("t"), true).unwrap();
    for k in ["a", "b", "c", "d", "e"] {
        put(&txn, dbi, k.as_bytes(), b"v").unwrap();
    }
    txn
}

#[test]
fn forward_inclusive_range() {
    let dir = tempfile::tempdir().unwrap();
    let env = EnvBuilder::new(dir.path()).open().unwrap();
    let txn = seeded_txn(&env);
    let dbi = open_db(&txn, Some("t"), false).unwrap();
    let raw = Cursor::open(&txn, dbi).unwrap();

    let mut rc = RangeCursor::new(
        raw,
        Bound::Inclusive(b"b".to_vec()),
        Bound::Inclusive(b"d".to_vec()),
        Direction::Ascending,
    );
    let mut keys = Vec::new();
    while let Some(entry) = rc.advance().unwrap() {
        keys.push(entry.key);
    }
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
}

#[test]
fn reverse_exclusive_upper_bound() {
    let dir = tempfile::tempdir().unwrap();
    let env = EnvBuilder::new(dir.path()).open().unwrap();
    let txn = seeded_txn(&env);
    let dbi = open_db(&txn, Some("t"), false).unwrap();
    let raw = Cursor::open(&txn, dbi).unwrap();

    let mut rc = RangeCursor::new(raw, Bound::Unbounded, Bound::Exclusive(b"d".to_vec()), Direction::Descending);
    let mut keys = Vec::new();
    while let Some(entry) = rc.advance().unwrap() {
        keys.push(entry.key);
    }
    assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
}

#[test]
fn reverse_inclusive_at_exact_key() {
    let dir = tempfile::tempdir().unwrap();
    let env = EnvBuilder::new(dir.path()).open().unwrap();
    let txn = seeded_txn(&env);
    let dbi = open_db(&txn, Some("t"), false).unwrap();
    let raw = Cursor::open(&txn, dbi).unwrap();

    let mut rc = RangeCursor::new(raw, Bound::Unbounded, Bound::Inclusive(b"c".to_vec()), Direction::Descending);
    let mut keys = Vec::new();
    while let Some(entry) = rc.advance().unwrap() {
        keys.push(entry.key);
    }
    assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
}

#[test]
fn close_is_idempotent_and_halts_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let env = EnvBuilder::new(dir.path()).open().unwrap();
    let txn = seeded_txn(&env);
    let dbi = open_db(&txn, Some("t"), false).unwrap();
    let raw = Cursor::open(&txn, dbi).unwrap();

    let mut rc = RangeCursor::new(raw, Bound::Unbounded, Bound::Unbounded, Direction::Ascending);
    assert!(rc.advance().unwrap().is_some());
    rc.close();
    rc.close();
    assert_eq!(rc.advance().unwrap(), None);
}
