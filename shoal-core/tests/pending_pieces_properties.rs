//! Concurrency properties of the shared pending-piece ledger.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use shoal_core::torrent::{PendingPieces, PieceIndex, ReleaseOutcome};

fn worker_address(worker: usize) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7000 + worker as u16))
}

/// Runs `workers` tasks that claim until exhausted. Pieces in `flaky` fail on
/// their first attempt; pieces in `broken` always fail.
fn run_workers(
    piece_count: u32,
    workers: usize,
    flaky: HashSet<u32>,
    broken: HashSet<u32>,
    max_attempts: u32,
) -> (Vec<PieceIndex>, Arc<PendingPieces>) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let pending = Arc::new(PendingPieces::new(
            (0..piece_count).map(PieceIndex::new),
            max_attempts,
        ));
        let written = Arc::new(Mutex::new(Vec::new()));
        let failed_once = Arc::new(Mutex::new(HashSet::new()));
        let flaky = Arc::new(flaky);
        let broken = Arc::new(broken);

        let mut handles = Vec::new();
        for worker in 0..workers {
            let pending = pending.clone();
            let written = written.clone();
            let failed_once = failed_once.clone();
            let flaky = flaky.clone();
            let broken = broken.clone();

            handles.push(tokio::spawn(async move {
                let address = worker_address(worker);
                while let Some(index) = pending.claim(address, |_| true).await {
                    tokio::task::yield_now().await;

                    let raw = index.as_u32();
                    let fails = broken.contains(&raw)
                        || (flaky.contains(&raw) && failed_once.lock().insert(raw));
                    if fails {
                        assert_ne!(pending.release(index, address), ReleaseOutcome::NotHeld);
                    } else {
                        assert!(pending.retire(index, address));
                        written.lock().push(index);
                    }
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let written = written.lock().clone();
        (written, pending)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_piece_written_exactly_once(
        piece_count in 1u32..48,
        workers in 1usize..8,
        flaky in proptest::collection::hash_set(0u32..48, 0..16),
    ) {
        let flaky: HashSet<u32> = flaky.into_iter().filter(|i| *i < piece_count).collect();
        let (written, pending) = run_workers(piece_count, workers, flaky, HashSet::new(), 3);

        let mut sorted: Vec<u32> = written.iter().map(|i| i.as_u32()).collect();
        sorted.sort_unstable();
        prop_assert_eq!(sorted, (0..piece_count).collect::<Vec<_>>());
        prop_assert!(pending.is_complete());
        prop_assert!(pending.outstanding().is_empty());
    }

    #[test]
    fn broken_pieces_are_reported_not_lost(
        piece_count in 1u32..32,
        workers in 1usize..6,
        broken in proptest::collection::hash_set(0u32..32, 1..6),
    ) {
        let broken: HashSet<u32> = broken.into_iter().filter(|i| *i < piece_count).collect();
        let (written, pending) =
            run_workers(piece_count, workers, HashSet::new(), broken.clone(), 2);

        let mut expected_missing: Vec<u32> = broken.iter().copied().collect();
        expected_missing.sort_unstable();
        let missing: Vec<u32> = pending.outstanding().iter().map(|i| i.as_u32()).collect();
        prop_assert_eq!(&missing, &expected_missing);
        prop_assert_eq!(pending.abandoned().len(), broken.len());
        prop_assert_eq!(written.len() + broken.len(), piece_count as usize);

        for index in &missing {
            prop_assert_eq!(pending.attempts(PieceIndex::new(*index)), 2);
        }
    }
}
