mod support;

use std::sync::Arc;
use std::time::Duration;

use lp_swap::SwapError;
use lp_swap::cancel::Cancellation;
use lp_swap::ledger::{CommitStatus, LedgerEvent};
use lp_swap::swap::escrow::{FromBtc, FromBtcState, ToBtcState, ToBtcSwap};
use lp_swap::swap::{SwapFamily, SwapHandle, SwapState as _, SwapType, WaitOrdering};

use support::fixtures::{from_btc_claim_hash, from_btc_swap, to_btc_claim_hash, to_btc_swap};
use support::{Harness, wait::eventually};

fn claim_event(tx_id: &str) -> LedgerEvent {
    LedgerEvent::Claim {
        claim_hash: to_btc_claim_hash(),
        sequence: 7,
        tx_id: tx_id.into(),
        result: None,
    }
}

async fn reaches<F: SwapFamily>(swap: &Arc<SwapHandle<F>>, state: F::State) {
    let swap = swap.clone();
    eventually(&format!("state {state}"), Duration::from_secs(5), move || {
        let swap = swap.clone();
        async move { (swap.state() == state).then_some(()) }
    })
    .await
}

#[tokio::test]
async fn late_claim_after_refund_is_ignored() {
    let h = Harness::new();
    let wrapper = h.wrapper::<ToBtcSwap>();
    let swap = to_btc_swap(&h, &wrapper, "sig").await;
    swap.commit().await.unwrap();

    h.ledger.set_commit_status(
        &to_btc_claim_hash(),
        CommitStatus::NotCommitted {
            refund_tx_id: Some("0xrefund".into()),
        },
    );
    assert!(ToBtcSwap::sync(&swap).await.unwrap());
    assert_eq!(swap.state(), ToBtcState::Refunded);
    let writes = h.storage.saves(swap.id());

    assert!(!wrapper.dispatch(&claim_event("0xlate")).await.unwrap());
    assert_eq!(swap.state(), ToBtcState::Refunded);
    assert_eq!(h.storage.saves(swap.id()), writes);
    let record = swap.snapshot().await;
    assert_eq!(record.refund_tx_id.as_deref(), Some("0xrefund"));
    assert_eq!(record.claim_tx_id, None);
}

#[tokio::test]
async fn lagging_ledger_does_not_end_a_committed_swap() {
    let h = Harness::new();
    let wrapper = h.wrapper::<ToBtcSwap>();
    let swap = to_btc_swap(&h, &wrapper, "sig").await;
    swap.commit().await.unwrap();
    let writes = h.storage.saves(swap.id());

    // The escrow is missing from the ledger's view but no refund was seen.
    h.ledger.set_commit_status(
        &to_btc_claim_hash(),
        CommitStatus::NotCommitted { refund_tx_id: None },
    );
    assert!(!ToBtcSwap::sync(&swap).await.unwrap());
    assert_eq!(swap.state(), ToBtcState::Committed);
    assert_eq!(h.storage.saves(swap.id()), writes);

    h.ledger.set_commit_status(
        &to_btc_claim_hash(),
        CommitStatus::Paid {
            claim_tx_id: Some("0xclaim".into()),
        },
    );
    assert!(ToBtcSwap::sync(&swap).await.unwrap());
    assert_eq!(swap.state(), ToBtcState::Claimed);
    assert_eq!(swap.snapshot().await.refund_tx_id, None);
}

#[tokio::test]
async fn lagging_ledger_does_not_fail_a_committed_receive() {
    let h = Harness::new();
    let wrapper = h.wrapper::<FromBtc>();
    let swap = from_btc_swap(&h, &wrapper).await;
    swap.commit().await.unwrap();

    h.ledger.set_commit_status(
        &from_btc_claim_hash(),
        CommitStatus::NotCommitted { refund_tx_id: None },
    );
    assert!(!FromBtc::sync(&swap).await.unwrap());
    assert_eq!(swap.state(), FromBtcState::ClaimCommitted);

    h.ledger.set_commit_status(
        &from_btc_claim_hash(),
        CommitStatus::NotCommitted {
            refund_tx_id: Some("0xrefund".into()),
        },
    );
    assert!(FromBtc::sync(&swap).await.unwrap());
    assert_eq!(swap.state(), FromBtcState::Failed);
    assert_eq!(swap.snapshot().await.refund_tx_id.as_deref(), Some("0xrefund"));
}

#[tokio::test]
async fn event_and_sync_commute() {
    async fn settle(event_first: bool) -> (ToBtcState, Option<String>, usize) {
        let h = Harness::new();
        let wrapper = h.wrapper::<ToBtcSwap>();
        let swap = to_btc_swap(&h, &wrapper, "sig").await;
        swap.commit().await.unwrap();

        let paid = CommitStatus::Paid {
            claim_tx_id: Some("0xclaim".into()),
        };
        if event_first {
            assert!(wrapper.dispatch(&claim_event("0xclaim")).await.unwrap());
            h.ledger.set_commit_status(&to_btc_claim_hash(), paid);
            assert!(!ToBtcSwap::sync(&swap).await.unwrap());
        } else {
            h.ledger.set_commit_status(&to_btc_claim_hash(), paid);
            assert!(ToBtcSwap::sync(&swap).await.unwrap());
            assert!(!wrapper.dispatch(&claim_event("0xclaim")).await.unwrap());
        }
        let record = swap.snapshot().await;
        (swap.state(), record.claim_tx_id, h.storage.saves(swap.id()))
    }

    let a = settle(true).await;
    let b = settle(false).await;
    assert_eq!(a, b);
    assert_eq!(a.0, ToBtcState::Claimed);
    assert_eq!(a.1.as_deref(), Some("0xclaim"));
}

#[tokio::test]
async fn reloaded_swap_reconciles_like_the_original() {
    let h = Harness::new();
    let wrapper = h.wrapper::<ToBtcSwap>();
    let original = to_btc_swap(&h, &wrapper, "sig").await;
    original.commit().await.unwrap();

    let restarted = Harness::with_storage(h.storage.clone());
    let reloaded = restarted
        .wrapper::<ToBtcSwap>()
        .load(original.id())
        .await
        .unwrap()
        .expect("stored swap");
    assert_eq!(reloaded.snapshot().await, original.snapshot().await);

    let paid = CommitStatus::Paid {
        claim_tx_id: Some("0xclaim".into()),
    };
    h.ledger.set_commit_status(&to_btc_claim_hash(), paid.clone());
    restarted.ledger.set_commit_status(&to_btc_claim_hash(), paid);
    assert!(ToBtcSwap::sync(&original).await.unwrap());
    assert!(ToBtcSwap::sync(&reloaded).await.unwrap());
    assert_eq!(reloaded.state(), original.state());
    assert_eq!(reloaded.snapshot().await, original.snapshot().await);
}

#[tokio::test]
async fn claim_and_refund_are_never_both_recorded() {
    let h = Harness::new();
    let wrapper = h.wrapper::<ToBtcSwap>();
    let swap = to_btc_swap(&h, &wrapper, "sig").await;
    swap.commit().await.unwrap();
    h.ledger.set_commit_status(
        &to_btc_claim_hash(),
        CommitStatus::NotCommitted {
            refund_tx_id: Some("0xrefund".into()),
        },
    );
    ToBtcSwap::sync(&swap).await.unwrap();
    let writes = h.storage.saves(swap.id());

    let err = swap
        .update(|r| r.claim_tx_id = Some("0xclaim".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, SwapError::Integrity { url: None, .. }), "{err}");
    assert_eq!(swap.snapshot().await.claim_tx_id, None);
    assert_eq!(h.storage.saves(swap.id()), writes);
}

#[tokio::test]
async fn event_for_swap_not_live_is_loaded_from_storage() {
    let h = Harness::new();
    let id = {
        let wrapper = h.wrapper::<ToBtcSwap>();
        let swap = to_btc_swap(&h, &wrapper, "sig").await;
        swap.commit().await.unwrap();
        swap.id().to_owned()
    };

    let restarted = Harness::with_storage(h.storage.clone());
    let wrapper = restarted.wrapper::<ToBtcSwap>();
    assert!(wrapper.get(&id).is_none());

    restarted
        .ledger
        .set_commit_status(&to_btc_claim_hash(), CommitStatus::Committed);
    assert!(wrapper.dispatch(&claim_event("0xclaim")).await.unwrap());
    let swap = wrapper.get(&id).expect("loaded by dispatch");
    assert_eq!(swap.state(), ToBtcState::Claimed);
    let row = restarted.storage.row(&id).await.unwrap();
    assert_eq!(row.state, ToBtcState::Claimed.code());

    // Events for other escrows load nothing.
    let other = LedgerEvent::Refund {
        claim_hash: hex::encode([9u8; 32]),
        sequence: 7,
        tx_id: "0xother".into(),
    };
    assert!(!wrapper.dispatch(&other).await.unwrap());
    assert_eq!(wrapper.live_swaps().len(), 1);
}

#[tokio::test]
async fn background_loops_follow_the_ledger() {
    let h = Harness::new();
    let wrapper = h.wrapper::<ToBtcSwap>();
    let swap = to_btc_swap(&h, &wrapper, "sig").await;
    let mut events = wrapper.subscribe();
    wrapper.start();

    h.ledger
        .set_commit_status(&to_btc_claim_hash(), CommitStatus::Committed);
    h.ledger.emit(LedgerEvent::Initialize {
        claim_hash: to_btc_claim_hash(),
        sequence: 7,
        tx_id: "0xinit".into(),
    });
    reaches(&swap, ToBtcState::Committed).await;

    h.ledger.set_commit_status(
        &to_btc_claim_hash(),
        CommitStatus::Paid {
            claim_tx_id: Some("0xclaim".into()),
        },
    );
    reaches(&swap, ToBtcState::Claimed).await;
    wrapper.stop().await;

    let first = events.recv().await.unwrap();
    assert_eq!(first.id, swap.id());
    assert_eq!(first.swap_type, SwapType::ToBtc);
    assert_eq!(first.previous, ToBtcState::Created.code());
    assert_eq!(first.state, ToBtcState::Committed.code());
    let second = events.recv().await.unwrap();
    assert_eq!(second.state, ToBtcState::Claimed.code());
}

#[tokio::test]
async fn background_tick_soft_expires_quotes() {
    let h = Harness::new();
    let wrapper = h.wrapper::<ToBtcSwap>();
    let swap = to_btc_swap(&h, &wrapper, "sig").await;

    h.clock.advance(Duration::from_secs(301));
    wrapper.start();
    reaches(&swap, ToBtcState::QuoteSoftExpired).await;
    wrapper.stop().await;

    // Nothing moves once the loops are stopped.
    h.ledger
        .set_commit_status(&to_btc_claim_hash(), CommitStatus::Committed);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(swap.state(), ToBtcState::QuoteSoftExpired);
}

#[tokio::test]
async fn wait_returns_when_caller_must_act() {
    let h = Harness::new();
    let wrapper = h.wrapper::<ToBtcSwap>();
    let swap = to_btc_swap(&h, &wrapper, "sig").await;
    swap.commit().await.unwrap();

    h.ledger
        .set_commit_status(&to_btc_claim_hash(), CommitStatus::Expired);
    let reached = tokio::time::timeout(
        Duration::from_secs(5),
        swap.wait_till_state(ToBtcState::Claimed, WaitOrdering::Eq, None),
    )
    .await
    .expect("wait resolves")
    .unwrap();
    assert_eq!(reached, ToBtcState::Refundable);
    assert!(reached.requires_action());
}

#[tokio::test]
async fn cancelled_wait_reports_cancellation() {
    let h = Harness::new();
    let wrapper = h.wrapper::<ToBtcSwap>();
    let swap = to_btc_swap(&h, &wrapper, "sig").await;
    let cancel = Cancellation::new();

    let waiter = {
        let swap = swap.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            swap.wait_till_state(ToBtcState::Claimed, WaitOrdering::Eq, Some(&cancel))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait resolves")
        .expect("join");
    assert!(matches!(result, Err(SwapError::Cancelled)));
    assert_eq!(swap.state(), ToBtcState::Created);
}

#[tokio::test]
async fn cancel_aborts_a_watchdog_pass_in_flight() {
    let h = Harness::new();
    let wrapper = h.wrapper::<ToBtcSwap>();
    let swap = to_btc_swap(&h, &wrapper, "sig").await;
    swap.commit().await.unwrap();
    h.lp.slow_statuses(Duration::from_secs(30));
    let cancel = Cancellation::new();

    let waiter = {
        let swap = swap.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            swap.wait_till_state(ToBtcState::Claimed, WaitOrdering::Eq, Some(&cancel))
                .await
        })
    };
    let lp = h.lp.clone();
    eventually("watchdog asks the intermediary", Duration::from_secs(5), move || {
        let lp = lp.clone();
        async move { (lp.status_calls() > 0).then_some(()) }
    })
    .await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("cancel is not held up by the slow intermediary")
        .expect("join");
    assert!(matches!(result, Err(SwapError::Cancelled)));
    assert_eq!(swap.state(), ToBtcState::Committed);
}
