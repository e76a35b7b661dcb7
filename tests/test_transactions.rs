use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use lumodb::{
    Database, DbFlags, EnvFlags, Environment, Error, SliceProxy, TxnFlags, TxnState, WriteFlags,
};
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, Environment<SliceProxy>, Database) {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::<SliceProxy>::builder_with_proxy()
        .set_map_size(10 * 1024 * 1024)
        .unwrap()
        .set_max_readers(4)
        .unwrap()
        .open(temp_dir.path(), EnvFlags::empty())
        .unwrap();
    let db = env.open_database(None, DbFlags::empty()).unwrap();
    (temp_dir, env, db)
}

fn read_value(env: &Environment<SliceProxy>, db: &Database, key: &[u8]) -> Option<Vec<u8>> {
    let txn = env.txn_read().unwrap();
    let value = txn.get(db, key).unwrap().map(|v| v.to_vec());
    value
}

#[test]
fn test_finished_transaction_rejects_use() {
    let (_dir, env, db) = setup_test_env();
    let mut txn = env.txn_write().unwrap();
    txn.put(&db, b"k", b"v", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();
    assert_eq!(txn.state(), TxnState::Committed);

    assert!(matches!(txn.get(&db, b"k"), Err(Error::TxnFinished)));
    assert!(matches!(
        txn.put(&db, b"k", b"w", WriteFlags::empty()),
        Err(Error::TxnFinished)
    ));
    assert!(matches!(txn.commit(), Err(Error::TxnFinished)));
    assert!(matches!(txn.open_db(None, DbFlags::empty()), Err(Error::TxnFinished)));

    // abort after a terminal state is a no-op
    txn.abort();
    assert_eq!(txn.state(), TxnState::Committed);
    assert_eq!(read_value(&env, &db, b"k").as_deref(), Some(&b"v"[..]));
}

#[test]
fn test_abort_discards_writes() {
    let (_dir, env, db) = setup_test_env();
    let mut txn = env.txn_write().unwrap();
    txn.put(&db, b"k", b"v", WriteFlags::empty()).unwrap();
    txn.abort();
    assert_eq!(txn.state(), TxnState::Aborted);
    assert!(matches!(txn.get(&db, b"k"), Err(Error::TxnFinished)));
    drop(txn);

    assert_eq!(read_value(&env, &db, b"k"), None);
}

#[test]
fn test_drop_without_commit_aborts() {
    let (_dir, env, db) = setup_test_env();
    {
        let mut txn = env.txn_write().unwrap();
        txn.put(&db, b"k", b"v", WriteFlags::empty()).unwrap();
    }
    assert_eq!(env.active_transactions(), 0);
    assert_eq!(read_value(&env, &db, b"k"), None);

    // The writer slot was released, so another write can start
    let mut txn = env.txn_write().unwrap();
    txn.put(&db, b"k", b"w", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();
    assert_eq!(read_value(&env, &db, b"k").as_deref(), Some(&b"w"[..]));
}

#[test]
fn test_child_commit_merges_into_parent() {
    let (_dir, env, db) = setup_test_env();
    let mut parent = env.txn_write().unwrap();
    parent.put(&db, b"parent", b"p", WriteFlags::empty()).unwrap();

    {
        let mut child = parent.child(TxnFlags::empty()).unwrap();
        assert!(child.is_nested());
        // Child sees the parent's uncommitted write
        assert_eq!(child.get(&db, b"parent").unwrap().unwrap().as_bytes(), b"p");
        child.put(&db, b"child", b"c", WriteFlags::empty()).unwrap();
        child.commit().unwrap();
    }

    assert_eq!(parent.get(&db, b"child").unwrap().unwrap().as_bytes(), b"c");
    parent.commit().unwrap();

    assert_eq!(read_value(&env, &db, b"child").as_deref(), Some(&b"c"[..]));
    assert_eq!(read_value(&env, &db, b"parent").as_deref(), Some(&b"p"[..]));
}

#[test]
fn test_child_abort_keeps_parent_writes() {
    let (_dir, env, db) = setup_test_env();
    let mut parent = env.txn(None, TxnFlags::empty()).unwrap();
    parent.put(&db, b"parent", b"p", WriteFlags::empty()).unwrap();

    {
        let mut child = env.txn(Some(&mut parent), TxnFlags::empty()).unwrap();
        child.put(&db, b"child", b"c", WriteFlags::empty()).unwrap();
        child.abort();
    }

    assert!(parent.get(&db, b"child").unwrap().is_none());
    parent.commit().unwrap();
    assert_eq!(read_value(&env, &db, b"child"), None);
    assert_eq!(read_value(&env, &db, b"parent").as_deref(), Some(&b"p"[..]));
}

#[test]
fn test_parent_reads_after_child_commit() {
    let (_dir, env, db) = setup_test_env();
    let mut parent = env.txn_write().unwrap();
    parent.put(&db, b"k", vec![b'A'; 64], WriteFlags::empty()).unwrap();

    // A view from the parent must end before a child can begin; a nested
    // commit may release the page it pointed at
    let before = parent.get(&db, b"k").unwrap().unwrap().to_vec();
    {
        let mut child = parent.child(TxnFlags::empty()).unwrap();
        child.put(&db, b"k", vec![b'B'; 64], WriteFlags::empty()).unwrap();
        child.commit().unwrap();
    }
    let _churn: Vec<Vec<u8>> = (0..8).map(|_| vec![b'X'; 4096]).collect();

    let after = parent.get(&db, b"k").unwrap().unwrap();
    assert_eq!(before, vec![b'A'; 64]);
    assert_eq!(after.as_bytes(), &[b'B'; 64][..]);
    drop(after);
    parent.commit().unwrap();
}

#[test]
fn test_leaked_child_blocks_parent() {
    let (_dir, env, db) = setup_test_env();
    let mut parent = env.txn_write().unwrap();
    parent.put(&db, b"parent", b"p", WriteFlags::empty()).unwrap();

    let mut child = parent.child(TxnFlags::empty()).unwrap();
    child.put(&db, b"child", b"c", WriteFlags::empty()).unwrap();
    std::mem::forget(child);

    assert!(matches!(parent.get(&db, b"parent"), Err(Error::TxnHasChild)));
    assert!(matches!(
        parent.put(&db, b"k", b"v", WriteFlags::empty()),
        Err(Error::TxnHasChild)
    ));
    assert!(matches!(
        parent.child(TxnFlags::empty()),
        Err(Error::TxnHasChild)
    ));
    assert!(matches!(parent.commit(), Err(Error::TxnHasChild)));
    assert_eq!(parent.state(), TxnState::Active);

    // Aborting the parent discards the child's writes too
    parent.abort();
    drop(parent);
    assert_eq!(read_value(&env, &db, b"child"), None);
    assert_eq!(read_value(&env, &db, b"parent"), None);
}

#[test]
fn test_parent_from_another_environment_is_rejected() {
    let (_dir_a, env_a, _db_a) = setup_test_env();
    let (_dir_b, env_b, _db_b) = setup_test_env();

    let mut parent = env_a.txn_write().unwrap();
    assert!(matches!(
        env_b.txn(Some(&mut parent), TxnFlags::empty()),
        Err(Error::ForeignTransaction)
    ));
    assert_eq!(env_b.active_transactions(), 0);
    parent.commit().unwrap();
}

#[test]
fn test_read_only_transaction_rejects_writes() {
    let (_dir, env, db) = setup_test_env();
    let mut txn = env.txn_read().unwrap();
    assert!(txn.is_read_only());
    assert!(matches!(
        txn.put(&db, b"k", b"v", WriteFlags::empty()),
        Err(Error::TxnReadOnly)
    ));
    assert!(matches!(txn.del(&db, b"k", None), Err(Error::TxnReadOnly)));
    assert!(matches!(txn.clear_db(&db), Err(Error::TxnReadOnly)));
}

#[test]
fn test_reset_and_renew() {
    let (_dir, env, db) = setup_test_env();
    let mut reader = env.txn_read().unwrap();
    assert!(reader.get(&db, b"k").unwrap().is_none());

    reader.reset().unwrap();
    assert_eq!(reader.state(), TxnState::Reset);
    assert!(matches!(reader.get(&db, b"k"), Err(Error::TxnReset)));

    let mut writer = env.txn_write().unwrap();
    writer.put(&db, b"k", b"v", WriteFlags::empty()).unwrap();
    writer.commit().unwrap();

    reader.renew().unwrap();
    assert_eq!(reader.get(&db, b"k").unwrap().unwrap().as_bytes(), b"v");
    assert!(matches!(reader.renew(), Err(Error::TxnNotReset)));
    reader.commit().unwrap();
    assert!(matches!(reader.renew(), Err(Error::TxnFinished)));
}

#[test]
fn test_reset_requires_read_only() {
    let (_dir, env, _db) = setup_test_env();
    let mut txn = env.txn_write().unwrap();
    assert!(matches!(txn.reset(), Err(Error::TxnNotReadOnly)));
    txn.abort();
}

#[test]
fn test_snapshot_is_stable_for_readers() {
    let (_dir, env, db) = setup_test_env();
    let mut txn = env.txn_write().unwrap();
    txn.put(&db, b"k", b"old", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let reader = env.txn_read().unwrap();
    let mut writer = env.txn_write().unwrap();
    writer.put(&db, b"k", b"new", WriteFlags::empty()).unwrap();
    writer.commit().unwrap();

    // The reader keeps the snapshot from its creation
    assert_eq!(reader.get(&db, b"k").unwrap().unwrap().as_bytes(), b"old");
    drop(reader);
    assert_eq!(read_value(&env, &db, b"k").as_deref(), Some(&b"new"[..]));
}

#[test]
fn test_writers_are_serialized_across_threads() {
    let (_dir, env, db) = setup_test_env();
    let (locked_tx, locked_rx) = mpsc::channel();

    thread::scope(|s| {
        let (env, db) = (&env, &db);
        s.spawn(move || {
            let mut txn = env.txn_write().unwrap();
            locked_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            txn.put(db, b"k", b"first", WriteFlags::empty()).unwrap();
            txn.commit().unwrap();
        });

        locked_rx.recv().unwrap();
        s.spawn(move || {
            // Blocks until the first writer commits
            let mut txn = env.txn_write().unwrap();
            let seen = txn.get(db, b"k").unwrap().map(|v| v.to_vec());
            assert_eq!(seen.as_deref(), Some(&b"first"[..]));
            txn.put(db, b"k", b"second", WriteFlags::empty()).unwrap();
            txn.commit().unwrap();
        });
    });

    assert_eq!(read_value(&env, &db, b"k").as_deref(), Some(&b"second"[..]));
}

#[test]
fn test_concurrent_readers() {
    let (_dir, env, db) = setup_test_env();
    let mut txn = env.txn_write().unwrap();
    txn.put(&db, b"shared", b"value", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    thread::scope(|s| {
        for _ in 0..3 {
            s.spawn(|| {
                let txn = env.txn_read().unwrap();
                let value = txn.get(&db, b"shared").unwrap().unwrap();
                assert_eq!(value.as_bytes(), b"value");
            });
        }
    });
}
