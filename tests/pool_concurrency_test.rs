//! Many threads racing for a small pool.

use devhost::config::PortsConfig;
use devhost::port::{JsonPortStore, PortPool, PortRecord};
use devhost::Error;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_parallel_allocations_never_share_a_port() {
    const N: usize = 16;
    let pool = Arc::new(PortPool::in_memory(&PortsConfig::new(7000, 7000 + N as u16 - 1, N)));
    let barrier = Arc::new(Barrier::new(N + 1));

    let handles: Vec<_> = (0..=N)
        .map(|i| {
            let pool = pool.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                pool.allocate(&format!("p{}", i), &PathBuf::from("/srv"))
            })
        })
        .collect();

    let mut ports = BTreeSet::new();
    let mut exhausted = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(port) => assert!(ports.insert(port), "port {} handed out twice", port),
            Err(Error::ResourceExhausted { .. }) => exhausted += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(ports.len(), N);
    assert_eq!(exhausted, 1);
    assert!(pool.snapshot().verify().is_ok());
}

#[test]
fn test_parallel_allocate_and_release() {
    let pool = Arc::new(PortPool::in_memory(&PortsConfig::new(7100, 7103, 4)));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let pool = pool.clone();
            thread::spawn(move || {
                let id = format!("worker-{}", i);
                for _ in 0..50 {
                    if pool.allocate(&id, &PathBuf::from("/srv")).is_ok() {
                        pool.release(&id).unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let state = pool.snapshot();
    assert!(state.verify().is_ok());
    assert_eq!(state.in_use(), 0);
    assert_eq!(pool.free_ports(), vec![7100, 7101, 7102, 7103]);
}

#[test]
fn test_pools_on_one_state_dir_never_share_a_port() {
    const N: usize = 8;
    let dir = tempfile::tempdir().unwrap();
    let state_dir = dir.path().to_path_buf();
    let ports = PortsConfig::new(7200, 7200 + N as u16 - 1, N);
    let barrier = Arc::new(Barrier::new(N));

    // One pool per thread stands in for one devhost process per command
    let handles: Vec<_> = (0..N)
        .map(|i| {
            let state_dir = state_dir.clone();
            let ports = ports.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let store = Arc::new(JsonPortStore::open(&state_dir).unwrap());
                let pool = PortPool::open(&ports, store).unwrap();
                barrier.wait();

                let id = format!("p{}", i);
                let port = pool.allocate(&id, &PathBuf::from("/srv")).unwrap();
                pool.commit(PortRecord {
                    port,
                    pid: std::process::id(),
                    project_id: id,
                    repo_path: PathBuf::from("/srv"),
                    started_at: chrono::Utc::now(),
                })
                .unwrap();
                port
            })
        })
        .collect();

    let ports_taken: BTreeSet<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ports_taken.len(), N);

    let store = Arc::new(JsonPortStore::open(&state_dir).unwrap());
    let reopened = PortPool::open(&ports, store).unwrap();
    assert_eq!(reopened.all().len(), N);
    assert!(reopened.free_ports().is_empty());
    assert!(reopened.snapshot().verify().is_ok());
}
