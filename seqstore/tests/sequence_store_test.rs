use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use seqstore::{
    Backend, LogStructuredStore, MemoryBackend, SequenceStore, StoreConfig, StoreError, StoreOptions,
    StoreResult,
};
use tempfile::TempDir;

/// Backend whose writes can be switched to fail, to check nothing leaks out of a failed write.
#[derive(Default)]
struct FlakyBackend {
    inner: MemoryBackend,
    fail_writes: AtomicBool,
}

impl Backend for FlakyBackend {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::storage("put", io::Error::new(io::ErrorKind::Other, "disk full")));
        }
        self.inner.put(key, value)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key)
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        self.inner.keys()
    }
}

fn open_log_store(dir: &TempDir) -> SequenceStore<LogStructuredStore> {
    let mut config = StoreConfig::new(dir.path().to_str().unwrap());
    config.max_segment_size = 16 * 1024; // small segments so rolls happen in tests
    SequenceStore::open(&config).unwrap()
}

#[test]
fn missing_key_reads_as_empty() {
    let store = SequenceStore::new(MemoryBackend::new());
    assert_eq!(store.get_sequence("never-set").unwrap(), Vec::<String>::new());
}

#[test]
fn empty_key_is_invalid_everywhere() {
    let backend = Arc::new(MemoryBackend::new());
    let store = SequenceStore::new(backend.clone());

    assert!(matches!(store.set_sequence("", &["a"]), Err(StoreError::InvalidKey(_))));
    assert!(store.get_sequence("").unwrap_err().is_invalid_key());
    assert!(store.append_to_sequence("", "a").unwrap_err().is_invalid_key());
    assert!(store.set_item("", "a").unwrap_err().is_invalid_key());
    assert!(store.remove_item("").unwrap_err().is_invalid_key());
    assert!(backend.is_empty());
}

#[test]
fn set_then_get() {
    let store = SequenceStore::new(MemoryBackend::new());
    let words = ["", "a,b", "line\nbreak", "\"quoted\"", "日本語"];

    store.set_sequence("words", &words).unwrap();
    assert_eq!(store.get_sequence("words").unwrap(), words);

    store.set_sequence::<&str>("words", &[]).unwrap();
    assert_eq!(store.get_sequence("words").unwrap(), Vec::<String>::new());
}

#[test]
fn set_is_idempotent() {
    let backend = Arc::new(MemoryBackend::new());
    let store = SequenceStore::new(backend.clone());

    store.set_sequence("k", &["x", "y"]).unwrap();
    let once = backend.get("k").unwrap();
    store.set_sequence("k", &["x", "y"]).unwrap();

    assert_eq!(backend.get("k").unwrap(), once);
    assert_eq!(store.get_sequence("k").unwrap(), vec!["x", "y"]);
}

#[test]
fn appends_in_order() {
    let store = SequenceStore::new(MemoryBackend::new());

    store.append_to_sequence("k", "a").unwrap();
    store.append_to_sequence("k", "b").unwrap();
    assert_eq!(store.get_sequence("k").unwrap(), vec!["a", "b"]);

    // duplicates and empty strings are ordinary elements
    store.append_to_sequence("k", "a").unwrap();
    store.append_to_sequence("k", "").unwrap();
    assert_eq!(store.get_sequence("k").unwrap(), vec!["a", "b", "a", ""]);
}

#[test]
fn append_after_set_extends_it() {
    let store = SequenceStore::new(MemoryBackend::new());
    store.set_sequence_bulk("k", &["1", "2"]).unwrap();
    store.append_to_sequence("k", "3").unwrap();
    assert_eq!(store.get_sequence("k").unwrap(), vec!["1", "2", "3"]);
}

fn concurrent_appends<B: Backend>(store: &SequenceStore<B>, threads: usize, per_thread: usize) {
    std::thread::scope(|s| {
        for t in 0..threads {
            s.spawn(move || {
                for i in 0..per_thread {
                    store.append_to_sequence("shared", &format!("{}", t * per_thread + i)).unwrap();
                }
            });
        }
    });

    let items = store.get_sequence("shared").unwrap();
    assert_eq!(items.len(), threads * per_thread);

    let distinct: HashSet<&String> = items.iter().collect();
    assert_eq!(distinct.len(), threads * per_thread);
    for n in 0..threads * per_thread {
        assert!(distinct.contains(&n.to_string()), "element {n} was lost");
    }

    // each thread's own appends keep their relative order
    for t in 0..threads {
        let mine: Vec<usize> = items
            .iter()
            .map(|s| s.parse::<usize>().unwrap())
            .filter(|n| n / per_thread == t)
            .collect();
        assert!(mine.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn concurrent_appends_lose_nothing_in_memory() {
    let store = SequenceStore::new(MemoryBackend::new());
    concurrent_appends(&store, 8, 50);
}

#[test]
fn concurrent_appends_lose_nothing_without_cache() {
    let store = SequenceStore::with_options(
        MemoryBackend::new(),
        StoreOptions { lock_stripes: 4, cache_capacity: 0 },
    );
    concurrent_appends(&store, 8, 50);
}

#[test]
fn concurrent_appends_lose_nothing_on_disk() {
    let dir = TempDir::new().unwrap();
    let store = open_log_store(&dir);
    concurrent_appends(&store, 4, 25);

    // the persisted value matches what the cache served
    let expected = store.get_sequence("shared").unwrap();
    drop(store);
    let reopened = open_log_store(&dir);
    assert_eq!(reopened.get_sequence("shared").unwrap(), expected);
}

#[test]
fn concurrent_appends_to_different_keys() {
    let store = SequenceStore::new(MemoryBackend::new());

    std::thread::scope(|s| {
        for t in 0..8 {
            let store = &store;
            s.spawn(move || {
                for i in 0..20 {
                    store.append_to_sequence(&format!("key{t}"), &i.to_string()).unwrap();
                }
            });
        }
    });

    let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    for t in 0..8 {
        assert_eq!(store.get_sequence(&format!("key{t}")).unwrap(), expected);
    }
}

#[test]
fn sets_and_appends_interleave_atomically() {
    let store = SequenceStore::new(MemoryBackend::new());

    std::thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..100 {
                store.set_sequence("k", &["reset"]).unwrap();
            }
        });
        s.spawn(|| {
            for i in 0..100 {
                store.append_to_sequence("k", &i.to_string()).unwrap();
            }
        });
    });

    // whatever won last, the value is a well formed sequence: either a reset
    // followed by appends, or only appends that happened after the final reset
    let items = store.get_sequence("k").unwrap();
    assert!(!items.is_empty());
    let tail = if items[0] == "reset" { &items[1..] } else { &items[..] };
    let nums: Vec<usize> = tail.iter().map(|s| s.parse().unwrap()).collect();
    assert!(nums.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn corrupt_value_fails_decode_and_append_keeps_it() {
    let backend = Arc::new(MemoryBackend::new());
    let store = SequenceStore::new(backend.clone());

    store.set_sequence("k", &["fine"]).unwrap();
    drop(store);

    // foreign bytes written behind the store's back
    let garbage = b"[\"not\",\"ours\"]".to_vec();
    backend.put("k", &garbage).unwrap();

    let store = SequenceStore::new(backend.clone());
    assert!(matches!(store.get_sequence("k"), Err(StoreError::DecodeFailure { .. })));
    assert!(store.append_to_sequence("k", "x").unwrap_err().is_decode_failure());
    assert_eq!(backend.get("k").unwrap(), Some(garbage));
}

#[test]
fn corrupt_value_written_under_a_live_store() {
    let backend = Arc::new(MemoryBackend::new());
    let store = SequenceStore::new(backend.clone());

    store.set_sequence("k", &["fine"]).unwrap();
    assert_eq!(store.get_sequence("k").unwrap(), vec!["fine"]); // now cached

    let garbage = b"[\"not\",\"ours\"]".to_vec();
    backend.put("k", &garbage).unwrap();

    assert!(store.get_sequence("k").unwrap_err().is_decode_failure());
    assert!(store.append_to_sequence("k", "x").unwrap_err().is_decode_failure());
    assert_eq!(backend.get("k").unwrap(), Some(garbage));
}

#[test]
fn corrupt_value_on_disk_under_a_live_store() {
    let dir = TempDir::new().unwrap();
    let store = open_log_store(&dir);
    store.append_to_sequence("k", "a").unwrap();
    assert_eq!(store.get_sequence("k").unwrap(), vec!["a"]);

    let raw = Backend::get(store.backend(), "k").unwrap().unwrap();
    let truncated = raw[..raw.len() - 1].to_vec();
    Backend::put(store.backend(), "k", &truncated).unwrap();

    assert!(store.get_sequence("k").unwrap_err().is_decode_failure());
    assert!(store.append_to_sequence("k", "x").unwrap_err().is_decode_failure());
    assert_eq!(Backend::get(store.backend(), "k").unwrap(), Some(truncated));
}

#[test]
fn corrupt_value_on_disk() {
    let dir = TempDir::new().unwrap();
    let truncated = {
        let store = open_log_store(&dir);
        store.append_to_sequence("k", "a").unwrap();

        let raw = Backend::get(store.backend(), "k").unwrap().unwrap();
        let truncated = raw[..raw.len() - 1].to_vec();
        Backend::put(store.backend(), "k", &truncated).unwrap();
        truncated
    };

    // a fresh store has nothing cached, so it must read the damaged bytes
    let store = open_log_store(&dir);
    assert!(store.get_sequence("k").unwrap_err().is_decode_failure());
    assert!(store.append_to_sequence("k", "x").unwrap_err().is_decode_failure());
    assert_eq!(Backend::get(store.backend(), "k").unwrap(), Some(truncated));
}

#[test]
fn failed_write_leaves_previous_value() {
    let backend = Arc::new(FlakyBackend::default());
    let store = SequenceStore::new(backend.clone());

    store.set_sequence("k", &["a"]).unwrap();
    let before = backend.get("k").unwrap();

    backend.fail_writes.store(true, Ordering::SeqCst);
    assert!(store.set_sequence("k", &["b", "c"]).unwrap_err().is_storage_failure());
    assert!(store.append_to_sequence("k", "d").unwrap_err().is_storage_failure());

    // neither the bytes nor the cached view moved
    assert_eq!(backend.get("k").unwrap(), before);
    assert_eq!(store.get_sequence("k").unwrap(), vec!["a"]);

    backend.fail_writes.store(false, Ordering::SeqCst);
    store.append_to_sequence("k", "d").unwrap();
    assert_eq!(store.get_sequence("k").unwrap(), vec!["a", "d"]);
}

#[test]
fn text_items_share_the_key_space() {
    let store = SequenceStore::new(MemoryBackend::new());

    assert_eq!(store.get_item("greeting").unwrap(), None);
    store.set_item("greeting", "hello").unwrap();
    assert_eq!(store.get_item("greeting").unwrap(), Some("hello".to_string()));

    // reading through the wrong accessor is a decode failure, appending too
    assert!(store.get_sequence("greeting").unwrap_err().is_decode_failure());
    assert!(store.append_to_sequence("greeting", "x").unwrap_err().is_decode_failure());

    store.set_sequence("list", &["a"]).unwrap();
    assert!(store.get_item("list").unwrap_err().is_decode_failure());
}

#[test]
fn remove_and_clear() {
    let store = SequenceStore::new(MemoryBackend::new());
    store.set_sequence("a", &["1"]).unwrap();
    store.set_sequence("b", &["2"]).unwrap();
    store.set_item("c", "3").unwrap();

    store.remove_item("a").unwrap();
    store.remove_item("a").unwrap(); // already gone
    assert_eq!(store.get_sequence("a").unwrap(), Vec::<String>::new());
    assert_eq!(store.keys().unwrap(), vec!["b", "c"]);

    store.clear().unwrap();
    assert!(store.keys().unwrap().is_empty());
    assert_eq!(store.get_sequence("b").unwrap(), Vec::<String>::new());
    assert_eq!(store.get_item("c").unwrap(), None);
}

#[test]
fn survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_log_store(&dir);
        for i in 0..100 {
            store.append_to_sequence("storedWords", &format!("test-{i}")).unwrap();
        }
        store.set_item("title", "words").unwrap();
        store.set_sequence("gone", &["x"]).unwrap();
        store.remove_item("gone").unwrap();
    }

    let store = open_log_store(&dir);
    let words = store.get_sequence("storedWords").unwrap();
    assert_eq!(words.len(), 100);
    assert_eq!(words[0], "test-0");
    assert_eq!(words[99], "test-99");
    assert_eq!(store.get_item("title").unwrap(), Some("words".to_string()));
    assert_eq!(store.get_sequence("gone").unwrap(), Vec::<String>::new());
    assert_eq!(store.keys().unwrap(), vec!["storedWords", "title"]);
}

#[test]
fn compaction_keeps_current_values() {
    let dir = TempDir::new().unwrap();
    let store = open_log_store(&dir);
    for i in 0..200 {
        store.append_to_sequence("storedWords", &format!("test-{i}")).unwrap();
    }
    store.set_item("gone", "x").unwrap();
    store.remove_item("gone").unwrap();

    store.compact().unwrap();
    assert_eq!(store.get_sequence("storedWords").unwrap().len(), 200);
    store.append_to_sequence("storedWords", "after").unwrap();
    drop(store);

    let store = open_log_store(&dir);
    let words = store.get_sequence("storedWords").unwrap();
    assert_eq!(words.len(), 201);
    assert_eq!(words.last().map(String::as_str), Some("after"));
    assert_eq!(store.get_item("gone").unwrap(), None);
}
