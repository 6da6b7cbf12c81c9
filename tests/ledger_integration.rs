//! Ledger integration tests against the in-memory store.

#![allow(clippy::panic)]

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use num::{BigInt, BigRational};
use ring_submit_ledger::LedgerError;
use ring_submit_ledger::domain::{
    FeeSelection, FilledOrder, ResultUpdate, SubmissionAttempt, SubmitStatus, UpdateTarget,
};
use ring_submit_ledger::persistence::MemorySubmissionStore;
use ring_submit_ledger::service::SubmissionLedger;

use crate::common::{TestClock, address, attempt, memory_ledger, ring};

fn nonces(list: &[SubmissionAttempt]) -> Vec<u64> {
    list.iter().map(|a| a.tx_nonce).collect()
}

fn resolve(id: i64, status: SubmitStatus) -> ResultUpdate {
    ResultUpdate::new(UpdateTarget::Id(id), status)
}

#[tokio::test]
async fn next_nonce_counts_every_status() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let miner = address(0x11);

    let Ok(n) = ledger.next_nonce(&miner).await else {
        panic!("next_nonce failed");
    };
    assert_eq!(n, 0);

    let statuses = [
        SubmitStatus::Confirmed,
        SubmitStatus::Pending,
        SubmitStatus::Failed,
    ];
    for (nonce, status) in statuses.into_iter().enumerate() {
        let Ok(created) = ledger
            .create_attempt(&attempt(nonce as u8, miner, nonce as u64))
            .await
        else {
            panic!("insert failed");
        };
        if status != SubmitStatus::Pending {
            let _ = ledger.update_result(&resolve(created.id, status)).await;
        }
    }

    assert!(matches!(ledger.next_nonce(&miner).await, Ok(3)));
    assert!(matches!(ledger.next_nonce(&address(0x22)).await, Ok(0)));
}

#[tokio::test]
async fn confirmed_higher_nonce_supersedes_lower_pending() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let miner = address(0x33);

    let _ = ledger.create_attempt(&attempt(3, miner, 3)).await;
    let Ok(five) = ledger.create_attempt(&attempt(5, miner, 5)).await else {
        panic!("insert failed");
    };
    let _ = ledger.create_attempt(&attempt(6, miner, 6)).await;
    assert!(matches!(
        ledger
            .update_result(&resolve(five.id, SubmitStatus::Confirmed))
            .await,
        Ok(1)
    ));

    let cutoff = clock.advance(10);
    let Ok(pending) = ledger.pending_attempts(cutoff).await else {
        panic!("pending query failed");
    };
    assert_eq!(nonces(&pending), vec![6]);
}

#[tokio::test]
async fn gap_scenario_returns_only_the_next_live_nonce() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let miner = address(0xAA);

    let plan = [
        (1u64, SubmitStatus::Failed),
        (2, SubmitStatus::Pending),
        (3, SubmitStatus::Confirmed),
        (4, SubmitStatus::Pending),
    ];
    for (nonce, status) in plan {
        clock.advance(1);
        let Ok(created) = ledger
            .create_attempt(&attempt(nonce as u8, miner, nonce))
            .await
        else {
            panic!("insert failed");
        };
        if status.is_terminal() {
            let _ = ledger.update_result(&resolve(created.id, status)).await;
        }
    }

    let cutoff = clock.advance(60);
    let Ok(pending) = ledger.pending_attempts(cutoff).await else {
        panic!("pending query failed");
    };
    assert_eq!(nonces(&pending), vec![4]);
    assert!(pending.iter().all(|a| a.miner == miner));
}

#[tokio::test]
async fn pending_excludes_attempts_at_or_after_cutoff() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let miner = address(0x44);

    let _ = ledger.create_attempt(&attempt(1, miner, 0)).await;
    let cutoff = clock.advance(5);
    let _ = ledger.create_attempt(&attempt(2, miner, 1)).await;
    clock.advance(5);
    let _ = ledger.create_attempt(&attempt(3, miner, 2)).await;

    let Ok(pending) = ledger.pending_attempts(cutoff).await else {
        panic!("pending query failed");
    };
    assert_eq!(nonces(&pending), vec![0]);
    assert!(pending.iter().all(|a| a.create_time < cutoff));
}

#[tokio::test]
async fn pending_is_ordered_per_account_and_scoped_per_account() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let (a, b) = (address(0x01), address(0x02));

    for (ring_byte, miner, nonce) in [(1, b, 7), (2, a, 2), (3, b, 1), (4, a, 0)] {
        let _ = ledger.create_attempt(&attempt(ring_byte, miner, nonce)).await;
    }
    let Ok(high) = ledger.create_attempt(&attempt(5, a, 9)).await else {
        panic!("insert failed");
    };
    let _ = ledger
        .update_result(&resolve(high.id, SubmitStatus::Failed))
        .await;

    let Ok(pending) = ledger.pending_attempts(clock.advance(1)).await else {
        panic!("pending query failed");
    };
    // a's watermark (9) hides a's nonces 0 and 2 but not b's.
    assert_eq!(nonces(&pending), vec![1, 7]);
    assert!(pending.iter().all(|p| p.miner == b));
}

#[tokio::test]
async fn grace_period_hides_fresh_attempts() {
    let store = Arc::new(MemorySubmissionStore::new());
    let ledger = SubmissionLedger::new(store, chrono::Duration::hours(1));
    let _ = ledger.submit(attempt(1, address(0x55), 0)).await;

    let Ok(pending) = ledger.pending_for_recheck().await else {
        panic!("pending query failed");
    };
    assert!(pending.is_empty());
}

#[tokio::test]
async fn has_resubmitted_needs_a_strictly_later_attempt() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let miner = address(0x66);

    let Ok(first) = ledger.create_attempt(&attempt(1, miner, 4)).await else {
        panic!("insert failed");
    };
    let sent_at = first.create_time;
    assert!(matches!(
        ledger.has_resubmitted(sent_at, &miner, 4).await,
        Ok(false)
    ));

    let _ = ledger
        .update_result(&resolve(first.id, SubmitStatus::Failed))
        .await;
    clock.advance(30);
    let Ok(_) = ledger.create_attempt(&attempt(1, miner, 4)).await else {
        panic!("resend into a failed slot must succeed");
    };

    assert!(matches!(
        ledger.has_resubmitted(sent_at, &miner, 4).await,
        Ok(true)
    ));
    assert!(matches!(
        ledger.has_resubmitted(sent_at, &miner, 5).await,
        Ok(false)
    ));
    assert!(matches!(
        ledger.has_resubmitted(sent_at, &address(0x67), 4).await,
        Ok(false)
    ));
}

#[tokio::test]
async fn repeated_terminal_update_is_a_no_op() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let Ok(created) = ledger.submit(attempt(1, address(0x77), 0)).await else {
        panic!("submit failed");
    };

    let mut update = resolve(created.id, SubmitStatus::Confirmed);
    update.block_number = Some(BigInt::from(5_000_123));
    update.used_gas = Some(BigInt::from(187_000));
    update.ring_index = Some(BigInt::from(42));
    update.tx_hash = Some(ring(0xEE));

    assert!(matches!(ledger.update_result(&update).await, Ok(1)));
    let Ok(after_first) = ledger.attempt_by_id(created.id).await else {
        panic!("attempt vanished");
    };

    assert!(matches!(ledger.update_result(&update).await, Ok(0)));
    let Ok(after_second) = ledger.attempt_by_id(created.id).await else {
        panic!("attempt vanished");
    };
    assert_eq!(after_first, after_second);
    assert_eq!(after_second.status, SubmitStatus::Confirmed);
    assert_eq!(after_second.block_number, Some(BigInt::from(5_000_123)));
}

#[tokio::test]
async fn terminal_attempt_cannot_change_outcome() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let Ok(created) = ledger.submit(attempt(1, address(0x78), 0)).await else {
        panic!("submit failed");
    };
    let _ = ledger
        .update_result(&resolve(created.id, SubmitStatus::Failed))
        .await;

    let result = ledger
        .update_result(&resolve(created.id, SubmitStatus::Confirmed))
        .await;
    assert!(matches!(
        result,
        Err(LedgerError::InvalidTransition {
            from: SubmitStatus::Failed,
            to: SubmitStatus::Confirmed,
            ..
        })
    ));
}

#[tokio::test]
async fn update_by_ring_and_tx_hash_keeps_nonce_unless_positive() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let miner = address(0x79);
    let tx = ring(0xD0);

    let Ok(created) = ledger
        .create_attempt(&attempt(9, miner, 12).with_tx_hash(tx))
        .await
    else {
        panic!("insert failed");
    };

    let mut update = ResultUpdate::new(
        UpdateTarget::resolve(0, ring(9), tx),
        SubmitStatus::Pending,
    );
    update.tx_hash = Some(tx);
    update.error = "underpriced".to_string();
    assert!(matches!(ledger.update_result(&update).await, Ok(1)));
    let Ok(stored) = ledger.attempt_by_id(created.id).await else {
        panic!("attempt vanished");
    };
    assert_eq!(stored.tx_nonce, 12);
    assert_eq!(stored.last_error.as_deref(), Some("underpriced"));

    update.status = SubmitStatus::Confirmed;
    update.tx_nonce = 13;
    update.error = String::new();
    assert!(matches!(ledger.update_result(&update).await, Ok(1)));
    let Ok(stored) = ledger.attempt_by_id(created.id).await else {
        panic!("attempt vanished");
    };
    assert_eq!(stored.tx_nonce, 13);
    assert_eq!(stored.last_error, None);
    assert_eq!(stored.status, SubmitStatus::Confirmed);
}

#[tokio::test]
async fn retried_ring_tx_update_is_a_no_op() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let tx = ring(0xD0);
    let Ok(created) = ledger
        .create_attempt(&attempt(9, address(0x7F), 5).with_tx_hash(tx))
        .await
    else {
        panic!("insert failed");
    };

    let update = ResultUpdate::new(
        UpdateTarget::RingTx {
            ring_hash: ring(9),
            tx_hash: tx,
        },
        SubmitStatus::Confirmed,
    );
    assert!(matches!(ledger.update_result(&update).await, Ok(1)));
    assert!(matches!(ledger.update_result(&update).await, Ok(0)));

    let Ok(stored) = ledger.attempt_by_id(created.id).await else {
        panic!("attempt vanished");
    };
    assert_eq!(stored.tx_hash, Some(tx));
    assert_eq!(stored.status, SubmitStatus::Confirmed);
}

#[tokio::test]
async fn update_with_unknown_ring_tx_pair_is_not_found() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let _ = ledger
        .create_attempt(&attempt(9, address(0x7A), 0).with_tx_hash(ring(0xD1)))
        .await;

    let update = ResultUpdate::new(
        UpdateTarget::RingTx {
            ring_hash: ring(9),
            tx_hash: ring(0xD2),
        },
        SubmitStatus::Failed,
    );
    assert!(matches!(
        ledger.update_result(&update).await,
        Err(LedgerError::NotFound(_))
    ));
}

#[tokio::test]
async fn used_gas_and_tx_hash_lookups() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let tx = ring(0xC0);
    let _ = ledger
        .create_attempt(&attempt(1, address(0x7B), 0).with_tx_hash(tx))
        .await;

    let gas = BigInt::from(210_000);
    assert!(matches!(ledger.update_used_gas(&tx, &gas).await, Ok(1)));

    let Ok(found) = ledger.attempts_by_tx_hash(&tx).await else {
        panic!("lookup failed");
    };
    assert_eq!(found.len(), 1);
    assert_eq!(found.first().and_then(|a| a.used_gas.clone()), Some(gas));
}

#[tokio::test]
async fn ring_lookups_return_earliest_and_all_attempts() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let miner = address(0x7C);

    let Ok(first) = ledger.submit(attempt(1, miner, 0)).await else {
        panic!("submit failed");
    };
    let _ = ledger
        .update_result(&resolve(first.id, SubmitStatus::Failed))
        .await;
    clock.advance(1);
    let _ = ledger.submit(attempt(1, miner, 0)).await;

    let Ok(earliest) = ledger.attempt_by_ring_hash(&ring(1)).await else {
        panic!("lookup failed");
    };
    assert_eq!(earliest.id, first.id);

    let Ok(all) = ledger.attempts_by_ring_hash(&ring(1)).await else {
        panic!("lookup failed");
    };
    assert_eq!(nonces(&all), vec![0, 1]);

    assert!(matches!(
        ledger.attempt_by_ring_hash(&ring(2)).await,
        Err(LedgerError::NotFound(_))
    ));
}

#[tokio::test]
async fn fills_survive_resubmission_churn() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let miner = address(0x7D);
    let Ok(first) = ledger.submit(attempt(4, miner, 0)).await else {
        panic!("submit failed");
    };

    let mut leg = FilledOrder::new(ring(0x40), FeeSelection::MarginSplit);
    leg.fill_amount_s = Some(BigRational::new(BigInt::from(1), BigInt::from(3)));
    leg.lrc_fee = Some(BigRational::from_integer(BigInt::from(0)));
    let other = FilledOrder::new(ring(0x41), FeeSelection::LrcFee);

    let Ok(ids) = ledger
        .save_filled_orders(&ring(4), &[leg.clone(), other.clone()])
        .await
    else {
        panic!("fills rejected");
    };
    assert_eq!(ids.len(), 2);

    let _ = ledger
        .update_result(&resolve(first.id, SubmitStatus::Failed))
        .await;
    let _ = ledger.submit(attempt(4, miner, 0)).await;

    let Ok(fills) = ledger.filled_orders_by_ring_hash(&ring(4)).await else {
        panic!("fill lookup failed");
    };
    assert_eq!(fills.len(), 2);
    let recorded: Vec<FilledOrder> = fills.into_iter().map(|f| f.fill).collect();
    assert_eq!(recorded, vec![leg, other]);
    assert_eq!(recorded.first().and_then(|f| f.lrc_reward.clone()), None);
}

#[tokio::test]
async fn fills_for_unknown_ring_are_rejected() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let leg = FilledOrder::new(ring(0x40), FeeSelection::LrcFee);
    assert!(matches!(
        ledger.save_filled_orders(&ring(0x99), &[leg]).await,
        Err(LedgerError::NotFound(_))
    ));
}

#[tokio::test]
async fn explicit_nonce_collision_is_a_conflict() {
    let clock = TestClock::starting_at(1_700_000_000);
    let ledger = memory_ledger(&clock);
    let miner = address(0x7E);
    let _ = ledger.create_attempt(&attempt(1, miner, 8)).await;

    let Err(err) = ledger.create_attempt(&attempt(2, miner, 8)).await else {
        panic!("second pending attempt at nonce 8 must be refused");
    };
    assert!(matches!(err, LedgerError::Conflict { nonce: 8, .. }));
    assert!(err.is_retryable());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_never_share_a_nonce() {
    let ledger = Arc::new(SubmissionLedger::new(
        Arc::new(MemorySubmissionStore::new()),
        chrono::Duration::zero(),
    ));
    let miner = address(0x88);

    let mut handles = Vec::new();
    for i in 0..16u8 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            ledger.submit(attempt(i, miner, 0)).await
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let Ok(Ok(created)) = handle.await else {
            panic!("submit task failed");
        };
        assert!(seen.insert(created.tx_nonce), "nonce {} reused", created.tx_nonce);
    }
    assert_eq!(seen, (0..16u64).collect::<HashSet<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_ledgers_resolve_races_through_conflicts() {
    let store = Arc::new(MemorySubmissionStore::new());
    let first = Arc::new(SubmissionLedger::new(
        Arc::clone(&store),
        chrono::Duration::zero(),
    ));
    let second = Arc::new(SubmissionLedger::new(
        Arc::clone(&store),
        chrono::Duration::zero(),
    ));
    let miner = address(0x99);

    let mut handles = Vec::new();
    for i in 0..12u8 {
        let ledger = if i % 2 == 0 {
            Arc::clone(&first)
        } else {
            Arc::clone(&second)
        };
        handles.push(tokio::spawn(async move {
            loop {
                match ledger.submit(attempt(i, miner, 0)).await {
                    Err(err) if err.is_retryable() => tokio::task::yield_now().await,
                    other => break other,
                }
            }
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let Ok(Ok(created)) = handle.await else {
            panic!("submit task failed");
        };
        assert!(seen.insert(created.tx_nonce));
    }
    assert_eq!(seen.len(), 12);
    assert_eq!(store.attempt_count().await, 12);
}
