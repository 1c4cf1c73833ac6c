//! Session lifecycle tests: start/cancel/restart semantics, single
//! in-flight enforcement, completion, and sync/rescan mutual exclusion.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use spv_sync::{ChainEvent, EngineError, SyncError, SyncStage, WalletBackend};

#[tokio::test]
async fn test_start_while_syncing_returns_already_syncing() {
    let wallet = MockWalletBackend::new(0, unix_now());
    let (session, engine) = session_with_wallets(test_config(), &[(1, wallet)]);

    session.start().await.unwrap();
    engine.wait_until_running().await;
    assert!(session.is_syncing().await);

    // A second start is rejected and no second run loop appears.
    assert_eq!(session.start().await.unwrap_err(), SyncError::AlreadySyncing);
    assert_eq!(engine.run_count(), 1);

    session.cancel_sync().await;
}

#[tokio::test]
async fn test_start_notifies_listeners_before_stage_events() {
    let wallet = MockWalletBackend::new(0, unix_now());
    let (session, engine) = session_with_wallets(test_config(), &[(1, wallet)]);
    let listener = CollectingListener::new();
    session.add_sync_progress_listener(listener.clone(), "test").await.unwrap();

    session.start().await.unwrap();
    engine.wait_until_running().await;

    engine.emit(ChainEvent::HeadersFetchStarted {
        peer_initial_height: 1000,
    });
    engine.emit(ChainEvent::HeadersFetchProgress {
        last_header_height: 500,
        last_header_timestamp: unix_now() - 500,
    });

    listener.wait_for(|events| events.iter().any(|e| matches!(e, Observed::Headers(_)))).await;

    let events = listener.snapshot();
    let started_at = events.iter().position(|e| matches!(e, Observed::Started { .. })).unwrap();
    let first_stage = events.iter().position(|e| matches!(e, Observed::Headers(_))).unwrap();
    assert!(started_at < first_stage, "sync_started must precede stage notifications");

    session.cancel_sync().await;
}

#[tokio::test]
async fn test_cancel_is_synchronous_and_final() {
    let wallet = MockWalletBackend::new(0, unix_now());
    let (session, engine) = session_with_wallets(test_config(), &[(1, wallet)]);
    let listener = CollectingListener::new();
    session.add_sync_progress_listener(listener.clone(), "test").await.unwrap();

    session.start().await.unwrap();
    engine.wait_until_running().await;

    engine.emit(ChainEvent::HeadersFetchStarted {
        peer_initial_height: 1000,
    });
    engine.emit(ChainEvent::HeadersFetchProgress {
        last_header_height: 100,
        last_header_timestamp: unix_now() - 900,
    });
    listener.wait_for(|events| events.iter().any(|e| matches!(e, Observed::Headers(_)))).await;

    let stale_sender = engine.sender_snapshot().unwrap();
    session.cancel_sync().await;

    // Cancellation has fully completed by the time the call returns.
    assert!(!session.is_syncing().await);
    assert_eq!(session.current_stage().await, SyncStage::Invalid);
    let events = listener.snapshot();
    assert!(events.iter().any(|e| matches!(e, Observed::Canceled { will_restart: false })));

    // The dispatcher is gone: late engine events have nowhere to go.
    assert!(stale_sender
        .send(ChainEvent::HeadersFetchProgress {
            last_header_height: 200,
            last_header_timestamp: unix_now(),
        })
        .is_err());

    // No stage notification ever follows the cancellation.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let events = listener.snapshot();
    let canceled_at =
        events.iter().position(|e| matches!(e, Observed::Canceled { .. })).unwrap();
    assert!(!events[canceled_at..].iter().any(|e| matches!(
        e,
        Observed::Headers(_) | Observed::CFilters(_) | Observed::Discovery(_)
    )));
}

#[tokio::test]
async fn test_cancel_without_active_sync_is_noop() {
    let wallet = MockWalletBackend::new(0, unix_now());
    let (session, _engine) = session_with_wallets(test_config(), &[(1, wallet)]);

    // Must return immediately without blocking.
    session.cancel_sync().await;
    assert!(!session.is_syncing().await);
}

#[tokio::test]
async fn test_cancel_stops_active_account_mixers() {
    let wallet = MockWalletBackend::new(0, unix_now());
    wallet.mixer_active.store(true, Ordering::SeqCst);
    let (session, engine) = session_with_wallets(test_config(), &[(1, wallet.clone())]);

    session.start().await.unwrap();
    engine.wait_until_running().await;
    session.cancel_sync().await;

    assert_eq!(wallet.mixer_stops.load(Ordering::SeqCst), 1);
    assert!(!wallet.is_account_mixer_active());
}

#[tokio::test]
async fn test_restart_flag_carried_exactly_once() {
    let wallet = MockWalletBackend::new(0, unix_now());
    let (session, engine) = session_with_wallets(test_config(), &[(1, wallet)]);
    let listener = CollectingListener::new();
    session.add_sync_progress_listener(listener.clone(), "test").await.unwrap();

    session.start().await.unwrap();
    engine.wait_until_running().await;

    session.restart_sync().await.unwrap();
    engine.wait_until_running().await;

    session.cancel_sync().await;
    session.start().await.unwrap();
    engine.wait_until_running().await;
    session.cancel_sync().await;

    let started: Vec<bool> = listener
        .snapshot()
        .iter()
        .filter_map(|e| match e {
            Observed::Started {
                is_restart,
            } => Some(*is_restart),
            _ => None,
        })
        .collect();
    // Cold start, the restart, then an organic start.
    assert_eq!(started, vec![false, true, false]);

    // Only the cancellation that served the restart reported will_restart.
    let canceled: Vec<bool> = listener
        .snapshot()
        .iter()
        .filter_map(|e| match e {
            Observed::Canceled {
                will_restart,
            } => Some(*will_restart),
            _ => None,
        })
        .collect();
    assert_eq!(canceled, vec![true, false, false]);
}

#[tokio::test]
async fn test_engine_failure_reports_ended_with_error_after_teardown() {
    let wallet = MockWalletBackend::new(0, unix_now());
    let (session, engine) = session_with_wallets(test_config(), &[(1, wallet)]);
    let listener = CollectingListener::new();
    session.add_sync_progress_listener(listener.clone(), "test").await.unwrap();

    session.start().await.unwrap();
    engine.wait_until_running().await;
    engine.finish_with(Err(EngineError::Network("lost all peers".to_string())));

    listener
        .wait_for(|events| events.iter().any(|e| matches!(e, Observed::EndedWithError(_))))
        .await;

    // Teardown happened before the notification was delivered.
    assert!(!session.is_syncing().await);
    assert!(!session.is_synced().await);
    assert!(!session.is_connected_to_network().await);

    // A fresh start is possible after the failed run.
    session.start().await.unwrap();
    engine.wait_until_running().await;
    assert_eq!(engine.run_count(), 2);
    session.cancel_sync().await;
}

#[tokio::test]
async fn test_all_wallets_synced_completes_session() {
    let first = MockWalletBackend::new(0, unix_now());
    let second = MockWalletBackend::new(0, unix_now());
    let (session, engine) =
        session_with_wallets(test_config(), &[(1, first.clone()), (2, second.clone())]);
    let listener = CollectingListener::new();
    session.add_sync_progress_listener(listener.clone(), "test").await.unwrap();

    session.start().await.unwrap();
    engine.wait_until_running().await;

    engine.emit(ChainEvent::WalletSynced {
        wallet_id: 1,
        synced: true,
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    // One of two wallets synced is not completion.
    assert!(session.is_syncing().await);
    assert!(!session.is_synced().await);
    assert!(session.is_wallet_synced(1).await.unwrap());
    assert!(!session.is_wallet_syncing(1).await.unwrap());
    assert!(!session.is_wallet_synced(2).await.unwrap());
    assert!(session.is_wallet_syncing(2).await.unwrap());

    engine.emit(ChainEvent::WalletSynced {
        wallet_id: 2,
        synced: true,
    });
    listener.wait_for(|events| events.iter().any(|e| matches!(e, Observed::Completed))).await;

    assert!(!session.is_syncing().await);
    assert!(session.is_synced().await);
    assert!(session.is_connected_to_network().await);
    // Completion indexed transactions on both wallets.
    assert_eq!(first.index_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.index_calls.load(Ordering::SeqCst), 1);

    // Completion fired exactly once.
    let completions =
        listener.snapshot().iter().filter(|e| matches!(e, Observed::Completed)).count();
    assert_eq!(completions, 1);

    session.cancel_sync().await;
}

#[tokio::test]
async fn test_peer_count_updates_are_published() {
    let wallet = MockWalletBackend::new(0, unix_now());
    let (session, engine) = session_with_wallets(test_config(), &[(1, wallet)]);
    let listener = CollectingListener::new();
    session.add_sync_progress_listener(listener.clone(), "test").await.unwrap();

    session.start().await.unwrap();
    engine.wait_until_running().await;

    engine.emit(ChainEvent::PeerConnected {
        peer_count: 1,
        address: "198.51.100.7:9108".to_string(),
    });
    engine.emit(ChainEvent::PeerConnected {
        peer_count: 2,
        address: "203.0.113.4:9108".to_string(),
    });
    listener
        .wait_for(|events| {
            events.iter().filter(|e| matches!(e, Observed::PeerCount(_))).count() >= 2
        })
        .await;
    assert_eq!(session.connected_peer_count().await, 2);

    engine.emit(ChainEvent::PeerDisconnected {
        peer_count: 1,
        address: "203.0.113.4:9108".to_string(),
    });
    assert!(wait_until(|| {
        listener.snapshot().iter().filter(|e| matches!(e, Observed::PeerCount(1))).count() == 2
    })
    .await);

    session.cancel_sync().await;
}

#[tokio::test]
async fn test_wallets_waiting_for_headers_flags() {
    let behind = MockWalletBackend::new(100, unix_now() - 10_000);
    let ahead = MockWalletBackend::new(800, unix_now() - 100);
    let (session, engine) =
        session_with_wallets(test_config(), &[(1, behind.clone()), (2, ahead.clone())]);

    session.start().await.unwrap();
    engine.wait_until_running().await;

    assert!(session.is_wallet_waiting(1).await.unwrap());
    assert!(session.is_wallet_waiting(2).await.unwrap());

    engine.emit(ChainEvent::HeadersFetchStarted {
        peer_initial_height: 1000,
    });
    // Headers fetched past wallet 1's tip but not wallet 2's.
    engine.emit(ChainEvent::HeadersFetchProgress {
        last_header_height: 500,
        last_header_timestamp: unix_now() - 500,
    });

    let mut flags_settled = false;
    for _ in 0..500 {
        if !session.is_wallet_waiting(1).await.unwrap()
            && session.is_wallet_waiting(2).await.unwrap()
        {
            flags_settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(flags_settled, "wallet 1 should stop waiting once headers pass its tip");

    assert_eq!(session.is_wallet_waiting(99).await.unwrap_err(), SyncError::WalletNotFound(99));

    session.cancel_sync().await;
}

#[tokio::test]
async fn test_invalid_persistent_peer_addresses_rejected() {
    let wallet = MockWalletBackend::new(0, unix_now());
    let mut config = test_config();
    config.persistent_peers = vec!["not an address:xyz".to_string()];
    let (session, engine) = session_with_wallets(config, &[(1, wallet)]);

    assert!(matches!(
        session.start().await.unwrap_err(),
        SyncError::InvalidPeerAddress(_)
    ));
    assert!(!session.is_syncing().await);
    assert_eq!(engine.run_count(), 0);
}

#[tokio::test]
async fn test_valid_persistent_peers_reach_engine() {
    let wallet = MockWalletBackend::new(0, unix_now());
    let mut config = test_config();
    config.persistent_peers = vec!["seed.example.org".to_string(), "bad:port".to_string()];
    config.default_port = 19108;
    let (session, engine) = session_with_wallets(config, &[(1, wallet)]);

    session.start().await.unwrap();
    engine.wait_until_running().await;
    assert_eq!(engine.peers_seen(), vec!["seed.example.org:19108".to_string()]);

    session.cancel_sync().await;
}
