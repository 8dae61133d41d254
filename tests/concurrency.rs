use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use vocab_editor::guard;
use vocab_editor::{EditorError, Field, PersistenceGuard, Record, RecordStore};

const HEADER: &str = "word,number,old_definition,translation,definition,example_sentences,part_of_speech,collocations";

fn seed(dir: &Path, rows: &[&str]) -> PathBuf {
    let path = dir.join("words.csv");
    fs::write(&path, format!("{}\n{}\n", HEADER, rows.join("\n"))).unwrap();
    path
}

// Every row of the table written by `writer` carries the writer's tag.
fn tagged_store(writer: usize, rows: usize) -> RecordStore {
    let records = (0..rows)
        .map(|i| {
            let number = i.to_string();
            let tag = format!("writer {writer}");
            Record::new([format!("w{i}"), number, String::new(), tag])
        })
        .collect();
    RecordStore::from_records(Vec::new(), records)
}

#[test]
fn racing_writers_leave_one_complete_table() {
    let dir = TempDir::new().unwrap();
    let path = seed(dir.path(), &["w0,0,,,,,,"]);
    let writers = 8;
    let rows = 500;
    let barrier = Arc::new(Barrier::new(writers + 1));

    let mut handles = Vec::new();
    for writer in 0..writers {
        let path = path.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            let persistence = PersistenceGuard::new(Duration::from_secs(20));
            let store = tagged_store(writer, rows);
            barrier.wait();
            persistence.with_lock(&path, || guard::write(&path, &store)).unwrap();
        }));
    }

    // Read while the writers race; every table seen must come from one writer.
    let reader = {
        let path = path.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            let persistence = PersistenceGuard::new(Duration::from_secs(20));
            barrier.wait();
            for _ in 0..20 {
                let store = persistence.with_lock(&path, || RecordStore::load(&path)).unwrap();
                let tags: Vec<String> = store
                    .flatten()
                    .iter()
                    .map(|r| r.get(Field::Translation).to_string())
                    .collect();
                assert!(tags.windows(2).all(|w| w[0] == w[1]), "mixed table");
            }
        })
    };

    for handle in handles {
        handle.join().unwrap();
    }
    reader.join().unwrap();

    let store = RecordStore::load(&path).unwrap();
    assert_eq!(store.record_count(), rows);
    let first = store.flatten()[0].get(Field::Translation).to_string();
    assert!(first.starts_with("writer "));
    assert!(store
        .flatten()
        .iter()
        .all(|r| r.get(Field::Translation) == first));
}

#[test]
fn concurrent_updates_lose_nothing() {
    let dir = TempDir::new().unwrap();
    let path = seed(dir.path(), &["counter,1,,,0,,,"]);
    let threads = 6;
    let rounds = 10;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                let persistence = PersistenceGuard::new(Duration::from_secs(20));
                for _ in 0..rounds {
                    persistence
                        .update(&path, |store| {
                            let mut group = store.groups()[0].clone();
                            let count: u32 = group.records[0].get(Field::Definition).parse().unwrap();
                            group.records[0].set(Field::Definition, (count + 1).to_string());
                            Ok((store.with_group(0, group), ()))
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let store = RecordStore::load(&path).unwrap();
    let total = (threads * rounds).to_string();
    assert_eq!(store.groups()[0].records[0].get(Field::Definition), total);
}

#[test]
fn busy_file_times_out_with_a_transient_error() {
    let dir = TempDir::new().unwrap();
    let path = seed(dir.path(), &["cat,1,,,,,,"]);
    let holder = PersistenceGuard::default();
    let _held = holder.acquire(&path).unwrap();

    let path_for_thread = path.clone();
    let err = thread::spawn(move || {
        PersistenceGuard::new(Duration::from_millis(150))
            .with_lock(&path_for_thread, || Ok(()))
            .unwrap_err()
    })
    .join()
    .unwrap();

    assert!(matches!(err, EditorError::LockTimeout { .. }));
    assert!(err.is_transient());
}
