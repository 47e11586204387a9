use super::*;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

fn squares(n: usize) -> Vec<(usize, u64)> {
    (0..n).map(|i| (i, i as u64)).collect()
}

#[test]
fn test_serial_results_sorted_by_id() {
    let tasks = vec![(3, 3u64), (0, 0), (2, 2), (1, 1)];
    let results = execute(Execution::Serial, tasks, |x| x * 10);
    assert_eq!(results, vec![(0, 0), (1, 10), (2, 20), (3, 30)]);
}

#[test]
fn test_parallel_matches_serial() {
    let serial = execute(Execution::Serial, squares(200), |x| x * x + 1);
    let parallel = execute(
        Execution::Parallel { workers: Some(4) },
        squares(200),
        |x| x * x + 1,
    );
    assert_eq!(serial, parallel);
}

#[test]
fn test_results_reassembled_by_id_not_arrival() {
    // Early ids sleep longest so they complete last.
    let tasks: Vec<(usize, u64)> = (0..8).map(|i| (i, (8 - i) as u64)).collect();
    let arrival = Mutex::new(Vec::new());
    let results = WorkerPool::new(8).run(tasks, |delay| {
        std::thread::sleep(Duration::from_millis(delay * 5));
        arrival.lock().unwrap().push(delay);
        delay
    });

    let ids: Vec<usize> = results.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, (0..8).collect::<Vec<_>>());
    for (id, value) in &results {
        assert_eq!(*value, (8 - id) as u64);
    }
    assert_eq!(arrival.lock().unwrap().len(), 8);
}

#[test]
fn test_more_workers_than_tasks() {
    let results = WorkerPool::new(16).run(squares(3), |x| x + 1);
    assert_eq!(results, vec![(0, 1), (1, 2), (2, 3)]);
}

#[test]
fn test_empty_batch() {
    let results: Vec<(usize, u64)> = WorkerPool::new(4).run(Vec::new(), |x: u64| x);
    assert!(results.is_empty());
}

#[test]
fn test_work_spreads_over_threads() {
    let threads = Mutex::new(HashSet::new());
    WorkerPool::new(4).run(squares(32), |x| {
        threads.lock().unwrap().insert(std::thread::current().id());
        std::thread::sleep(Duration::from_millis(2));
        x
    });
    let used = threads.lock().unwrap().len();
    assert!(used > 1, "expected several worker threads, saw {}", used);
    assert!(used <= 4, "more threads than workers: {}", used);
}

#[test]
fn test_workers_share_borrowed_input() {
    let catalog: Vec<f64> = (0..100).map(|i| i as f64).collect();
    let tasks: Vec<(usize, usize)> = (0..10).map(|i| (i, i * 10)).collect();
    let results = execute(Execution::Parallel { workers: Some(3) }, tasks, |start| {
        catalog[start..start + 10].iter().sum::<f64>()
    });
    let total: f64 = results.iter().map(|(_, s)| s).sum();
    assert!((total - 4950.0).abs() < 1e-9, "total = {}", total);
}

#[test]
#[should_panic(expected = "worker count must be > 0")]
fn test_zero_workers_panics() {
    WorkerPool::new(0);
}

#[test]
#[should_panic(expected = "task failed")]
fn test_worker_panic_propagates() {
    WorkerPool::new(2).run(squares(4), |x| {
        if x == 2 {
            panic!("task failed");
        }
        x
    });
}

#[test]
fn test_worker_count() {
    assert_eq!(Execution::Serial.worker_count(), 1);
    assert_eq!(Execution::Parallel { workers: Some(5) }.worker_count(), 5);
    assert_eq!(Execution::Parallel { workers: Some(0) }.worker_count(), 1);
    assert!(Execution::Parallel { workers: None }.worker_count() >= 1);
    assert!(Execution::default().is_parallel());
}
