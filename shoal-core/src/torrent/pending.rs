//! Shared ledger of piece indices not yet written.
//!
//! Every piece is in exactly one of pending, in flight (held by one peer),
//! written, or abandoned. All transitions happen under one lock, so a
//! scan-and-claim can never hand the same index to two workers, and a
//! released index is visible to every waiting worker as soon as the lock
//! drops.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::PieceIndex;

/// Result of a single non-blocking claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The index now belongs to the caller
    Claimed(PieceIndex),
    /// Nothing claimable right now, but a servable piece is in flight elsewhere
    Wait,
    /// Nothing this peer could ever serve remains
    Exhausted,
}

/// What happened to a piece handed back after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Back in the pending set
    Requeued { attempts: u32 },
    /// Attempt cap reached; the piece will not be handed out again
    Abandoned { attempts: u32 },
    /// The caller did not hold this index
    NotHeld,
}

#[derive(Debug, Default)]
struct PieceLedger {
    pending: BTreeSet<PieceIndex>,
    in_flight: HashMap<PieceIndex, SocketAddr>,
    written: BTreeSet<PieceIndex>,
    abandoned: BTreeSet<PieceIndex>,
    attempts: HashMap<PieceIndex, u32>,
}

/// Retry-safe set of pieces shared by all download workers.
#[derive(Debug)]
pub struct PendingPieces {
    ledger: Mutex<PieceLedger>,
    changed: Notify,
    max_attempts: u32,
}

impl PendingPieces {
    /// Seeds the pending set. `max_attempts` is clamped to at least 1.
    pub fn new(pieces: impl IntoIterator<Item = PieceIndex>, max_attempts: u32) -> Self {
        Self {
            ledger: Mutex::new(PieceLedger {
                pending: pieces.into_iter().collect(),
                ..PieceLedger::default()
            }),
            changed: Notify::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Claims the lowest pending index `available` accepts, without waiting.
    pub fn try_claim(
        &self,
        peer: SocketAddr,
        available: impl Fn(PieceIndex) -> bool,
    ) -> ClaimOutcome {
        let mut ledger = self.ledger.lock();

        let candidate = ledger.pending.iter().copied().find(|index| available(*index));
        if let Some(index) = candidate {
            ledger.pending.remove(&index);
            ledger.in_flight.insert(index, peer);
            return ClaimOutcome::Claimed(index);
        }

        if ledger.in_flight.keys().any(|index| available(*index)) {
            ClaimOutcome::Wait
        } else {
            ClaimOutcome::Exhausted
        }
    }

    /// Claims the lowest servable pending index, waiting while a servable
    /// piece is held by another worker and might come back.
    ///
    /// Returns `None` once nothing this peer could serve remains.
    pub async fn claim(
        &self,
        peer: SocketAddr,
        available: impl Fn(PieceIndex) -> bool,
    ) -> Option<PieceIndex> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and
            // the await still wakes us.
            notified.as_mut().enable();

            match self.try_claim(peer, &available) {
                ClaimOutcome::Claimed(index) => return Some(index),
                ClaimOutcome::Exhausted => return None,
                ClaimOutcome::Wait => notified.await,
            }
        }
    }

    /// Hands a failed piece back, abandoning it once the attempt cap is hit.
    pub fn release(&self, index: PieceIndex, peer: SocketAddr) -> ReleaseOutcome {
        let outcome = {
            let mut ledger = self.ledger.lock();
            if ledger.in_flight.get(&index) != Some(&peer) {
                return ReleaseOutcome::NotHeld;
            }
            ledger.in_flight.remove(&index);

            let attempts = {
                let counter = ledger.attempts.entry(index).or_insert(0);
                *counter += 1;
                *counter
            };

            if attempts >= self.max_attempts {
                ledger.abandoned.insert(index);
                ReleaseOutcome::Abandoned { attempts }
            } else {
                ledger.pending.insert(index);
                ReleaseOutcome::Requeued { attempts }
            }
        };

        self.changed.notify_waiters();
        outcome
    }

    /// Marks a held piece as verified and written. Returns false if the
    /// caller did not hold it.
    pub fn retire(&self, index: PieceIndex, peer: SocketAddr) -> bool {
        let retired = {
            let mut ledger = self.ledger.lock();
            if ledger.in_flight.get(&index) == Some(&peer) {
                ledger.in_flight.remove(&index);
                ledger.written.insert(index);
                true
            } else {
                false
            }
        };

        self.changed.notify_waiters();
        retired
    }

    /// True once every piece has been written.
    pub fn is_complete(&self) -> bool {
        let ledger = self.ledger.lock();
        ledger.pending.is_empty() && ledger.in_flight.is_empty() && ledger.abandoned.is_empty()
    }

    /// Every index not yet written, ascending.
    pub fn outstanding(&self) -> Vec<PieceIndex> {
        let ledger = self.ledger.lock();
        let mut outstanding: Vec<PieceIndex> = ledger
            .pending
            .iter()
            .chain(ledger.abandoned.iter())
            .chain(ledger.in_flight.keys())
            .copied()
            .collect();
        outstanding.sort_unstable();
        outstanding
    }

    /// Indices given up on after reaching the attempt cap, ascending.
    pub fn abandoned(&self) -> Vec<PieceIndex> {
        self.ledger.lock().abandoned.iter().copied().collect()
    }

    /// Number of pieces written so far.
    pub fn written_count(&self) -> usize {
        self.ledger.lock().written.len()
    }

    /// Number of pieces waiting to be claimed.
    pub fn pending_count(&self) -> usize {
        self.ledger.lock().pending.len()
    }

    /// Failed attempts recorded against a piece.
    pub fn attempts(&self, index: PieceIndex) -> u32 {
        self.ledger
            .lock()
            .attempts
            .get(&index)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn pieces(count: u32) -> impl Iterator<Item = PieceIndex> {
        (0..count).map(PieceIndex::new)
    }

    #[test]
    fn test_claims_lowest_available_index() {
        let pending = PendingPieces::new(pieces(4), 3);

        let outcome = pending.try_claim(peer(1), |index| index.as_u32() >= 2);
        assert_eq!(outcome, ClaimOutcome::Claimed(PieceIndex::new(2)));

        let outcome = pending.try_claim(peer(2), |_| true);
        assert_eq!(outcome, ClaimOutcome::Claimed(PieceIndex::new(0)));
        assert_eq!(pending.pending_count(), 2);
    }

    #[test]
    fn test_peer_without_pieces_is_exhausted() {
        let pending = PendingPieces::new(pieces(4), 3);
        assert_eq!(pending.try_claim(peer(1), |_| false), ClaimOutcome::Exhausted);
        assert_eq!(pending.pending_count(), 4);
    }

    #[test]
    fn test_wait_while_servable_piece_in_flight() {
        let pending = PendingPieces::new(pieces(1), 3);
        assert_eq!(
            pending.try_claim(peer(1), |_| true),
            ClaimOutcome::Claimed(PieceIndex::new(0))
        );
        assert_eq!(pending.try_claim(peer(2), |_| true), ClaimOutcome::Wait);

        assert!(pending.retire(PieceIndex::new(0), peer(1)));
        assert_eq!(pending.try_claim(peer(2), |_| true), ClaimOutcome::Exhausted);
        assert!(pending.is_complete());
    }

    #[test]
    fn test_release_requeues_then_abandons() {
        let pending = PendingPieces::new(pieces(1), 2);
        let index = PieceIndex::new(0);

        pending.try_claim(peer(1), |_| true);
        assert_eq!(
            pending.release(index, peer(1)),
            ReleaseOutcome::Requeued { attempts: 1 }
        );

        pending.try_claim(peer(2), |_| true);
        assert_eq!(
            pending.release(index, peer(2)),
            ReleaseOutcome::Abandoned { attempts: 2 }
        );

        assert_eq!(pending.try_claim(peer(3), |_| true), ClaimOutcome::Exhausted);
        assert_eq!(pending.abandoned(), vec![index]);
        assert_eq!(pending.outstanding(), vec![index]);
        assert!(!pending.is_complete());
    }

    #[test]
    fn test_release_by_non_holder_is_ignored() {
        let pending = PendingPieces::new(pieces(1), 3);
        pending.try_claim(peer(1), |_| true);

        assert_eq!(
            pending.release(PieceIndex::new(0), peer(2)),
            ReleaseOutcome::NotHeld
        );
        assert!(!pending.retire(PieceIndex::new(0), peer(2)));
        assert_eq!(pending.attempts(PieceIndex::new(0)), 0);
    }

    #[tokio::test]
    async fn test_waiting_claim_wakes_on_release() {
        let pending = Arc::new(PendingPieces::new(pieces(1), 3));
        pending.try_claim(peer(1), |_| true);

        let waiter = {
            let pending = pending.clone();
            tokio::spawn(async move { pending.claim(peer(2), |_| true).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        pending.release(PieceIndex::new(0), peer(1));

        let claimed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed, Some(PieceIndex::new(0)));
    }

    #[tokio::test]
    async fn test_waiting_claim_ends_when_piece_written() {
        let pending = Arc::new(PendingPieces::new(pieces(1), 3));
        pending.try_claim(peer(1), |_| true);

        let waiter = {
            let pending = pending.clone();
            tokio::spawn(async move { pending.claim(peer(2), |_| true).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        pending.retire(PieceIndex::new(0), peer(1));

        let claimed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed, None);
    }
}
