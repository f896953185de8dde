//! Property tests for put/delete sequences against both store backends

use cw_store::{BlobStore, FsBlobStore, MemoryBlobStore};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Op {
    Put(String, Vec<u8>),
    Delete(String),
}

fn key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["zelda.gba", "mario.nes", "gba_bios.bin", "metroid.gba"])
        .prop_map(str::to_string)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (key_strategy(), prop::collection::vec(any::<u8>(), 0..64))
            .prop_map(|(k, v)| Op::Put(k, v)),
        key_strategy().prop_map(Op::Delete),
    ]
}

async fn apply_and_check(store: &dyn BlobStore, ops: &[Op]) {
    let mut model: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Put(key, bytes) => {
                store.put(key, bytes).await.unwrap();
                model.insert(key.clone(), bytes.clone());
            }
            Op::Delete(key) => {
                store.delete(key).await.unwrap();
                model.remove(key);
            }
        }
    }

    let listed = store.list().await.unwrap();
    let expected: Vec<String> = model.keys().cloned().collect();
    assert_eq!(listed, expected);

    for key in ["zelda.gba", "mario.nes", "gba_bios.bin", "metroid.gba"] {
        assert_eq!(store.get(key).await.unwrap(), model.get(key).cloned());
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_memory_store_last_write_wins(ops in prop::collection::vec(op_strategy(), 0..24)) {
        let store = MemoryBlobStore::new("prop").unwrap();
        runtime().block_on(apply_and_check(&store, &ops));
    }

    #[test]
    fn test_fs_store_last_write_wins(ops in prop::collection::vec(op_strategy(), 0..24)) {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime();
        rt.block_on(async {
            let store = FsBlobStore::open(dir.path(), "prop").await.unwrap();
            apply_and_check(&store, &ops).await;
        });
    }
}
