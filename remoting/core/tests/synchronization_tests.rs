// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pmsync_core::application::{
    ActionRegistry, ClientConnector, ServerConnector, ServerSession, ServerSettings, StoreHandle, SyncError,
    SyncSettings, SyncState,
};
use pmsync_core::infrastructure::{DiagnosticsRegistry, InMemorySessionRepository, LocalTransport};
use pmsync_core::{AttributeKey, Command, CommandBatch, ModelId, ModelStore, Side, Value};
use tokio::time::timeout;

struct Pair {
    server: Arc<ServerConnector>,
    session: Arc<ServerSession>,
    transport: Arc<LocalTransport>,
    client: Arc<ClientConnector>,
}

async fn pair_with(server: ServerConnector) -> Pair {
    let server = Arc::new(server);
    let transport = Arc::new(LocalTransport::connect(server.clone()).await.unwrap());
    let session = transport.session().await.unwrap();
    let client = Arc::new(ClientConnector::new(
        StoreHandle::spawn(ModelStore::new(Side::Client)),
        transport.clone(),
        SyncSettings {
            long_poll: false,
            ..SyncSettings::default()
        },
    ));
    Pair {
        server,
        session,
        transport,
        client,
    }
}

fn server_connector() -> ServerConnector {
    ServerConnector::new(
        Arc::new(InMemorySessionRepository::new()),
        Arc::new(ActionRegistry::new()),
        DiagnosticsRegistry::new(true),
        ServerSettings::default(),
    )
}

async fn pair() -> Pair {
    pair_with(server_connector()).await
}

/// Every attribute value of a store, keyed by model id and attribute name.
async fn contents(store: &StoreHandle) -> BTreeMap<(String, String), Value> {
    store
        .run(|store| {
            store
                .models()
                .flat_map(|model| {
                    model.attributes().iter().map(move |attribute| {
                        (
                            (model.id().to_string(), attribute.name().to_string()),
                            attribute.value().clone(),
                        )
                    })
                })
                .collect()
        })
        .await
        .unwrap()
}

async fn value_of(store: &StoreHandle, key: &AttributeKey) -> Option<Value> {
    let key = key.clone();
    store.run(move |store| store.get(&key).cloned()).await.unwrap()
}

async fn count_changes(store: &StoreHandle, key: &AttributeKey) -> Arc<AtomicUsize> {
    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = notifications.clone();
    let key = key.clone();
    store
        .run(move |store| {
            store.on_changed(key, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
        .await
        .unwrap();
    notifications
}

#[tokio::test]
async fn test_client_counter_reaches_server_with_single_notifications() {
    let pair = pair().await;
    let key = AttributeKey::new("M1", "count");

    pair.client
        .store()
        .run(|store| store.builder("Counter").with_id("M1").with_attribute("count", 0).create())
        .await
        .unwrap()
        .unwrap();
    pair.client.synchronize().await.unwrap();
    assert_eq!(value_of(&pair.session.store, &key).await, Some(Value::Integer(0)));

    let client_notifications = count_changes(pair.client.store(), &key).await;
    let server_notifications = count_changes(&pair.session.store, &key).await;

    let set_key = key.clone();
    let changed = pair
        .client
        .store()
        .run(move |store| store.set(&set_key, 5))
        .await
        .unwrap()
        .unwrap();
    assert!(changed);

    let outcome = pair.client.synchronize().await.unwrap();
    assert_eq!(outcome.sent, 1);
    assert_eq!(outcome.received, 0);
    assert_eq!(value_of(&pair.session.store, &key).await, Some(Value::Integer(5)));

    // Remote changes are not tracked, so nothing echoes back.
    assert!(!pair.session.store.has_pending_changes());
    assert!(!pair.client.store().has_pending_changes());

    assert_eq!(client_notifications.load(Ordering::SeqCst), 1);
    assert_eq!(server_notifications.load(Ordering::SeqCst), 1);
    assert_eq!(value_of(pair.client.store(), &key).await, Some(Value::Integer(5)));
}

#[tokio::test]
async fn test_stores_converge_after_one_exchange() {
    let server = server_connector().with_initializer(|store| {
        let _ = store
            .builder("Settings")
            .with_id("settings")
            .with_attribute("theme", "dark")
            .with_attribute("fontSize", 12)
            .create();
    });
    let pair = pair_with(server).await;

    pair.client
        .store()
        .run(|store| {
            store
                .builder("Person")
                .with_attribute("name", "Ada")
                .with_attribute("age", 36)
                .create()
        })
        .await
        .unwrap()
        .unwrap();

    let outcome = pair.client.long_poll().await.unwrap();
    assert_eq!(outcome.received, 1);

    let client = contents(pair.client.store()).await;
    let server = contents(&pair.session.store).await;
    assert_eq!(client.len(), 4);
    assert_eq!(client, server);
    assert!(!pair.client.store().has_pending_changes());
    assert!(!pair.session.store.has_pending_changes());
}

#[test]
fn test_replayed_batch_is_a_no_op() {
    let mut source = ModelStore::new(Side::Client);
    let id = source
        .builder("Person")
        .with_attribute("name", "Ada")
        .create()
        .unwrap();
    source.set(&AttributeKey::new(id.clone(), "name"), "Grace").unwrap();
    let mut commands = source.flush_changes();
    commands.push(Command::DeletePresentationModel {
        model_id: ModelId::new("never-existed"),
    });

    let mut target = ModelStore::new(Side::Server);
    let first = target.apply_remote(commands.clone());
    assert_eq!(first.applied, 1);
    assert!(first.rejected.is_empty());
    let after_first = target.get(&AttributeKey::new(id.clone(), "name")).cloned();

    let second = target.apply_remote(commands);
    assert_eq!(second.applied, 0);
    assert!(second.rejected.is_empty());
    assert_eq!(target.get(&AttributeKey::new(id, "name")).cloned(), after_first);
    assert_eq!(after_first, Some(Value::from("Grace")));
    assert!(!target.has_pending_changes());
}

#[tokio::test]
async fn test_server_delete_fires_client_removal_listeners() {
    let pair = pair().await;
    let id = pair
        .client
        .store()
        .run(|store| {
            store
                .builder("Person")
                .with_attribute("first", "Ada")
                .with_attribute("last", "Lovelace")
                .create()
        })
        .await
        .unwrap()
        .unwrap();
    pair.client.synchronize().await.unwrap();

    let removed = Arc::new(Mutex::new(Vec::new()));
    let seen = removed.clone();
    let listen_id = id.clone();
    pair.client
        .store()
        .run(move |store| {
            for name in ["first", "last"] {
                let seen = seen.clone();
                let model_id = listen_id.clone();
                store.on_removed(AttributeKey::new(listen_id.clone(), name), move |removed, store| {
                    assert!(store.find_model(&model_id).is_none());
                    assert!(store.get(&removed.key).is_none());
                    seen.lock().push((removed.key.name.clone(), removed.last_value.clone()));
                });
            }
        })
        .await
        .unwrap();

    let delete_id = id.clone();
    pair.session
        .store
        .run(move |store| store.delete_model(&delete_id))
        .await
        .unwrap()
        .unwrap();

    let outcome = pair.client.long_poll().await.unwrap();
    assert_eq!(outcome.received, 1);
    assert_eq!(outcome.report.applied, 1);

    let client_has_model = pair.client.store().run(move |store| store.contains(&id)).await.unwrap();
    assert!(!client_has_model);
    assert_eq!(
        *removed.lock(),
        vec![
            ("first".to_string(), Value::from("Ada")),
            ("last".to_string(), Value::from("Lovelace")),
        ]
    );
}

#[tokio::test]
async fn test_server_release_returns_client_to_idle() {
    let pair = pair().await;

    let poller = pair.client.clone();
    let poll = tokio::spawn(async move { poller.long_poll().await });

    timeout(Duration::from_secs(1), async {
        while pair.server.pending_long_polls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(pair.client.state(), SyncState::AwaitingResponse);

    assert!(pair.server.release(pair.transport.session_id()));

    let outcome = timeout(Duration::from_secs(1), poll).await.unwrap().unwrap().unwrap();
    assert!(outcome.released);
    assert_eq!(outcome.received, 0);
    assert_eq!(pair.client.state(), SyncState::Idle);
}

#[tokio::test]
async fn test_release_batch_answers_with_empty_batch() {
    let pair = pair().await;
    let response = pair
        .server
        .handle(pair.transport.session_id(), CommandBatch::new(vec![Command::release()]))
        .await
        .unwrap();
    assert!(response.is_empty());
}

#[tokio::test]
async fn test_lost_response_is_retried_once_in_effect() {
    let pair = pair().await;
    let key = AttributeKey::new("M1", "count");
    pair.client
        .store()
        .run(|store| store.builder("Counter").with_id("M1").with_attribute("count", 0).create())
        .await
        .unwrap()
        .unwrap();
    pair.client.synchronize().await.unwrap();
    let server_notifications = count_changes(&pair.session.store, &key).await;

    let set_key = key.clone();
    pair.client
        .store()
        .run(move |store| store.set(&set_key, 5))
        .await
        .unwrap()
        .unwrap();

    pair.transport.fail_next_responses(1);
    let failed = pair.client.synchronize().await;
    assert!(matches!(failed, Err(SyncError::Transport(_))));
    assert_eq!(value_of(&pair.session.store, &key).await, Some(Value::Integer(5)));
    assert_eq!(pair.client.state(), SyncState::PendingLocalChanges);

    let retried = pair.client.synchronize().await.unwrap();
    assert_eq!(retried.sent, 1);
    assert_eq!(value_of(&pair.session.store, &key).await, Some(Value::Integer(5)));
    assert_eq!(server_notifications.load(Ordering::SeqCst), 1);
    assert_eq!(pair.client.state(), SyncState::Idle);
}

#[tokio::test]
async fn test_failed_request_retry_carries_coalesced_value() {
    let pair = pair().await;
    let key = AttributeKey::new("M1", "count");
    pair.client
        .store()
        .run(|store| store.builder("Counter").with_id("M1").with_attribute("count", 0).create())
        .await
        .unwrap()
        .unwrap();
    pair.client.synchronize().await.unwrap();
    let server_notifications = count_changes(&pair.session.store, &key).await;

    let set_key = key.clone();
    pair.client
        .store()
        .run(move |store| store.set(&set_key, 5))
        .await
        .unwrap()
        .unwrap();
    pair.transport.fail_next_requests(1);
    assert!(pair.client.synchronize().await.is_err());
    assert_eq!(value_of(&pair.session.store, &key).await, Some(Value::Integer(0)));

    let set_key = key.clone();
    pair.client
        .store()
        .run(move |store| store.set(&set_key, 7))
        .await
        .unwrap()
        .unwrap();

    let retried = pair.client.synchronize().await.unwrap();
    assert_eq!(retried.sent, 1);
    assert_eq!(value_of(&pair.session.store, &key).await, Some(Value::Integer(7)));
    assert_eq!(server_notifications.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pending_client_change_wins_over_server_change() {
    let pair = pair().await;
    let key = AttributeKey::new("M1", "count");
    pair.client
        .store()
        .run(|store| store.builder("Counter").with_id("M1").with_attribute("count", 0).create())
        .await
        .unwrap()
        .unwrap();
    pair.client.synchronize().await.unwrap();
    let client_notifications = count_changes(pair.client.store(), &key).await;
    let server_notifications = count_changes(&pair.session.store, &key).await;

    let server_key = key.clone();
    pair.session
        .store
        .run(move |store| store.set(&server_key, 1))
        .await
        .unwrap()
        .unwrap();
    let client_key = key.clone();
    pair.client
        .store()
        .run(move |store| store.set(&client_key, 2))
        .await
        .unwrap()
        .unwrap();

    pair.client.synchronize().await.unwrap();
    pair.client.synchronize().await.unwrap();

    assert_eq!(value_of(pair.client.store(), &key).await, Some(Value::Integer(2)));
    assert_eq!(value_of(&pair.session.store, &key).await, Some(Value::Integer(2)));
    // The client never sees the overridden 1; the server sees its own 1 and then the client's 2.
    assert_eq!(client_notifications.load(Ordering::SeqCst), 1);
    assert_eq!(server_notifications.load(Ordering::SeqCst), 2);
}

async fn counter_pair() -> (Pair, AttributeKey) {
    let pair = pair().await;
    let key = AttributeKey::new("M1", "count");
    pair.client
        .store()
        .run(|store| store.builder("Counter").with_id("M1").with_attribute("count", 0).create())
        .await
        .unwrap()
        .unwrap();
    pair.client.synchronize().await.unwrap();
    (pair, key)
}

#[tokio::test]
async fn test_server_change_survives_lost_response() {
    let (pair, key) = counter_pair().await;
    let client_notifications = count_changes(pair.client.store(), &key).await;

    let server_key = key.clone();
    pair.session
        .store
        .run(move |store| store.set(&server_key, 9))
        .await
        .unwrap()
        .unwrap();

    pair.transport.fail_next_responses(1);
    assert!(matches!(pair.client.pull().await, Err(SyncError::Transport(_))));
    assert_eq!(value_of(pair.client.store(), &key).await, Some(Value::Integer(0)));

    let redelivered = pair.client.pull().await.unwrap();
    assert_eq!(redelivered.received, 1);
    let settled = pair.client.pull().await.unwrap();
    assert_eq!(settled.received, 0);

    assert_eq!(value_of(pair.client.store(), &key).await, Some(Value::Integer(9)));
    assert_eq!(value_of(&pair.session.store, &key).await, Some(Value::Integer(9)));
    assert_eq!(client_notifications.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_client_change_overrides_undelivered_server_change() {
    let (pair, key) = counter_pair().await;

    let server_key = key.clone();
    pair.session
        .store
        .run(move |store| store.set(&server_key, 9))
        .await
        .unwrap()
        .unwrap();
    pair.transport.fail_next_responses(1);
    assert!(pair.client.pull().await.is_err());

    let client_key = key.clone();
    pair.client
        .store()
        .run(move |store| store.set(&client_key, 5))
        .await
        .unwrap()
        .unwrap();
    pair.client.synchronize().await.unwrap();
    pair.client.pull().await.unwrap();

    assert_eq!(value_of(pair.client.store(), &key).await, Some(Value::Integer(5)));
    assert_eq!(value_of(&pair.session.store, &key).await, Some(Value::Integer(5)));
}
