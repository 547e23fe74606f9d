//! Integration tests for the Store feedback loop
//!
//! Multi-step flows (hold, settle, confirm) are chains of effects whose resulting
//! actions are fed back into the same store. These tests drive such chains end to end.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use rollcall_core::{SmallVec, effect::Effect, reducer::Reducer, smallvec};
use rollcall_runtime::{Store, StoreConfig};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum HoldAction {
    /// Place a hold and start settlement
    Hold { id: u64 },
    /// Settlement finished
    Settled { id: u64, ok: bool },
    /// Terminal reply
    Confirmed { id: u64 },
    /// Terminal reply
    Released { id: u64 },
    /// Scheduled through a Delay effect
    Expire { id: u64 },
    /// Batch of independent notifications
    Broadcast { ids: Vec<u64> },
    Noted { id: u64 },
}

#[derive(Debug, Default)]
struct HoldState {
    held: Vec<u64>,
    confirmed: Vec<u64>,
    expired: Vec<u64>,
    noted: Vec<u64>,
}

#[derive(Clone)]
struct HoldReducer;

impl Reducer for HoldReducer {
    type State = HoldState;
    type Action = HoldAction;
    type Environment = ();

    fn reduce(
        &self,
        state: &mut HoldState,
        action: HoldAction,
        _env: &(),
    ) -> SmallVec<[Effect<HoldAction>; 4]> {
        match action {
            HoldAction::Hold { id } => {
                state.held.push(id);
                smallvec![Effect::Future(Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Some(HoldAction::Settled { id, ok: id % 2 == 0 })
                }))]
            },
            HoldAction::Settled { id, ok } => {
                state.held.retain(|h| *h != id);
                if ok {
                    state.confirmed.push(id);
                    smallvec![Effect::dispatch(HoldAction::Confirmed { id })]
                } else {
                    smallvec![Effect::dispatch(HoldAction::Released { id })]
                }
            },
            HoldAction::Expire { id } => {
                state.expired.push(id);
                smallvec![Effect::None]
            },
            HoldAction::Broadcast { ids } => {
                smallvec![Effect::merge(
                    ids.into_iter()
                        .map(|id| Effect::dispatch(HoldAction::Noted { id }))
                        .collect()
                )]
            },
            HoldAction::Noted { id } => {
                state.noted.push(id);
                smallvec![Effect::None]
            },
            HoldAction::Confirmed { .. } | HoldAction::Released { .. } => smallvec![Effect::None],
        }
    }
}

fn store() -> Store<HoldState, HoldAction, (), HoldReducer> {
    Store::with_config(
        HoldState::default(),
        HoldReducer,
        (),
        StoreConfig::default().with_broadcast_capacity(64),
    )
}

#[tokio::test]
async fn settlement_chain_reaches_terminal_reply() {
    let store = store();

    let confirmed = store
        .send_and_wait_for(
            HoldAction::Hold { id: 2 },
            |a| matches!(a, HoldAction::Confirmed { id: 2 } | HoldAction::Released { id: 2 }),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    assert_eq!(confirmed, HoldAction::Confirmed { id: 2 });

    let released = store
        .send_and_wait_for(
            HoldAction::Hold { id: 3 },
            |a| matches!(a, HoldAction::Confirmed { id: 3 } | HoldAction::Released { id: 3 }),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    assert_eq!(released, HoldAction::Released { id: 3 });

    assert_eq!(store.state(|s| s.confirmed.clone()).await, vec![2]);
    assert!(store.state(|s| s.held.is_empty()).await);
}

#[tokio::test]
async fn observers_see_effect_actions_in_order() {
    let store = store();
    let mut rx = store.subscribe_actions();

    store.send(HoldAction::Hold { id: 4 }).await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), HoldAction::Settled { id: 4, ok: true });
    assert_eq!(rx.recv().await.unwrap(), HoldAction::Confirmed { id: 4 });
}

#[tokio::test(start_paused = true)]
async fn delayed_action_fires_after_duration() {
    let store = Store::new(HoldState::default(), DelayingReducer, ());
    let mut rx = store.subscribe_actions();
    store.send(HoldAction::Hold { id: 7 }).await.unwrap();

    assert_eq!(store.state(|s| s.held.clone()).await, vec![7]);
    tokio::time::advance(Duration::from_secs(3 * 24 * 60 * 60 + 1)).await;

    assert_eq!(rx.recv().await.unwrap(), HoldAction::Expire { id: 7 });
    store.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(store.state(|s| s.expired.clone()).await, vec![7]);
    assert!(store.state(|s| s.held.is_empty()).await);
}

#[derive(Clone)]
struct DelayingReducer;

impl Reducer for DelayingReducer {
    type State = HoldState;
    type Action = HoldAction;
    type Environment = ();

    fn reduce(
        &self,
        state: &mut HoldState,
        action: HoldAction,
        _env: &(),
    ) -> SmallVec<[Effect<HoldAction>; 4]> {
        match action {
            HoldAction::Hold { id } => {
                state.held.push(id);
                smallvec![Effect::Delay {
                    duration: Duration::from_secs(3 * 24 * 60 * 60),
                    action: Box::new(HoldAction::Expire { id }),
                }]
            },
            HoldAction::Expire { id } => {
                state.held.retain(|h| *h != id);
                state.expired.push(id);
                smallvec![Effect::None]
            },
            _ => smallvec![Effect::None],
        }
    }
}

#[tokio::test]
async fn parallel_effects_all_feed_back() {
    let store = store();
    let mut rx = store.subscribe_actions();

    store.send(HoldAction::Broadcast { ids: vec![1, 2, 3] }).await.unwrap();
    for _ in 0..3 {
        assert!(matches!(rx.recv().await.unwrap(), HoldAction::Noted { .. }));
    }

    store.shutdown(Duration::from_secs(1)).await.unwrap();
    let mut noted = store.state(|s| s.noted.clone()).await;
    noted.sort_unstable();
    assert_eq!(noted, vec![1, 2, 3]);
}
