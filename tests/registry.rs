// tests/registry.rs

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{init_logging, mock_adapter, CountingFactory};
use pubsub_registry::{
    // ---
    ConnectionConfig,
    ConnectionRegistry,
    Driver,
    PubSubConfig,
    PubSubError,
};

fn config(value: serde_json::Value) -> PubSubConfig {
    serde_json::from_value(value).expect("valid registry config")
}

fn dev_null_config() -> PubSubConfig {
    config(json!({
        "default": "/dev/null",
        "connections": {
            "/dev/null": { "driver": "/dev/null" },
            "my_connection": { "driver": "my_driver" }
        }
    }))
}

#[tokio::test]
async fn default_connection_is_used_when_no_name_is_given() {
    // ---
    init_logging();

    let factory = Arc::new(CountingFactory::default());
    let registry = ConnectionRegistry::with_factory(factory.clone(), dev_null_config());

    registry.connection(None).await.expect("default connection");

    assert_eq!(factory.calls(), 1);
    let seen = factory.seen.lock().unwrap();
    assert_eq!(seen[0].0, "/dev/null");
    assert_eq!(seen[0].1, ConnectionConfig::new().with("driver", "/dev/null"));
}

#[tokio::test]
async fn named_connection_passes_driver_and_config_to_factory() {
    // ---
    let factory = Arc::new(CountingFactory::default());
    let registry = ConnectionRegistry::with_factory(factory.clone(), dev_null_config());

    registry
        .connection(Some("my_connection"))
        .await
        .expect("named connection");

    let seen = factory.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "my_driver");
    assert_eq!(seen[0].1.driver(), Some("my_driver"));
}

#[tokio::test]
async fn resolved_connection_is_cached_under_its_name() {
    // ---
    let factory = Arc::new(CountingFactory::default());
    let registry = ConnectionRegistry::with_factory(factory, dev_null_config());

    assert!(registry.cached_names().is_empty());

    registry.connection(Some("/dev/null")).await.unwrap();

    assert_eq!(registry.cached_names(), vec!["/dev/null".to_string()]);
    assert!(registry.is_cached("/dev/null"));
    assert!(!registry.is_cached("my_connection"));
}

#[tokio::test]
async fn unknown_name_is_not_configured_and_not_cached() {
    // ---
    let factory = Arc::new(CountingFactory::default());
    let registry = ConnectionRegistry::with_factory(factory.clone(), dev_null_config());

    let err = registry.connection(Some("missing")).await.err().unwrap();

    assert!(matches!(&err, PubSubError::NotConfigured(name) if name == "missing"));
    assert!(err.is_configuration());
    assert_eq!(
        err.to_string(),
        "The pub-sub connection [missing] is not configured."
    );
    assert!(!registry.is_cached("missing"));
    assert_eq!(factory.calls(), 0);
}

#[tokio::test]
async fn config_without_driver_is_a_distinct_configuration_error() {
    // ---
    let factory = Arc::new(CountingFactory::default());
    let registry = ConnectionRegistry::with_factory(
        factory.clone(),
        config(json!({
            "default": "/dev/null",
            "connections": { "/dev/null": {} }
        })),
    );

    let err = registry.connection(Some("/dev/null")).await.err().unwrap();

    assert!(matches!(&err, PubSubError::MissingDriver(name) if name == "/dev/null"));
    assert!(err.is_configuration());
    assert_eq!(
        err.to_string(),
        "The pub-sub connection [/dev/null] is missing a \"driver\" config var."
    );
    assert_eq!(factory.calls(), 0);
    assert!(!registry.is_cached("/dev/null"));
}

#[tokio::test]
async fn non_string_driver_is_unsupported() {
    // ---
    let registry = ConnectionRegistry::new(config(json!({
        "default": "odd",
        "connections": { "odd": { "driver": 42 } }
    })));

    let err = registry.connection(None).await.err().unwrap();
    assert!(matches!(err, PubSubError::UnsupportedDriver(d) if d == "42"));
}

#[tokio::test]
async fn unsupported_driver_through_registry_names_the_driver() {
    // ---
    let registry = ConnectionRegistry::new(dev_null_config());

    let err = registry.connection(Some("my_connection")).await.err().unwrap();

    assert!(matches!(&err, PubSubError::UnsupportedDriver(d) if d == "my_driver"));
    assert!(!err.is_configuration());
    assert!(!registry.is_cached("my_connection"));
}

#[tokio::test]
async fn repeated_lookups_return_the_same_instance() {
    // ---
    let factory = Arc::new(CountingFactory::default());
    let registry = ConnectionRegistry::with_factory(factory.clone(), dev_null_config());

    let first = registry.connection(None).await.unwrap();
    let second = registry.connection(None).await.unwrap();
    let by_name = registry.connection(Some("/dev/null")).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &by_name));
    assert_eq!(factory.calls(), 1);
}

#[tokio::test]
async fn null_connection_resolves_to_a_dev_null_adapter_once() {
    // ---
    let registry = ConnectionRegistry::new(config(json!({
        "default": "null",
        "connections": { "null": { "driver": "nodriver" } }
    })));

    let first = registry.connection(None).await.unwrap();
    let second = registry.connection(None).await.unwrap();

    assert_eq!(first.driver(), Some(Driver::DevNull));
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn override_resolver_preempts_the_factory() {
    // ---
    let factory = Arc::new(CountingFactory::default());
    let registry = ConnectionRegistry::with_factory(
        factory.clone(),
        config(json!({
            "default": "/dev/null",
            "connections": {
                "/dev/null": { "driver": "/dev/null" },
                "custom": { "anything": true }
            }
        })),
    );

    let mock = mock_adapter();
    let resolver_calls = Arc::new(AtomicUsize::new(0));
    let seen_config = Arc::new(std::sync::Mutex::new(None));

    {
        let mock = mock.clone();
        let resolver_calls = resolver_calls.clone();
        let seen_config = seen_config.clone();
        registry.extend("custom", move |cfg: ConnectionConfig| {
            resolver_calls.fetch_add(1, Ordering::SeqCst);
            *seen_config.lock().unwrap() = Some(cfg);
            let mock = mock.clone();
            async move { Ok(mock) }
        });
    }
    assert!(registry.has_extension("custom"));

    for _ in 0..3 {
        let adapter = registry.connection(Some("custom")).await.unwrap();
        assert!(Arc::ptr_eq(&adapter, &mock));
    }

    assert_eq!(resolver_calls.load(Ordering::SeqCst), 1);
    assert_eq!(factory.calls(), 0);
    assert_eq!(
        seen_config.lock().unwrap().clone(),
        Some(ConnectionConfig::new().with("anything", true))
    );
}

#[tokio::test]
async fn override_still_requires_a_configured_name() {
    // ---
    let registry = ConnectionRegistry::new(dev_null_config());
    registry.extend("ghost", |_cfg| async { Ok(mock_adapter()) });

    let err = registry.connection(Some("ghost")).await.err().unwrap();
    assert!(matches!(err, PubSubError::NotConfigured(_)));
}

#[tokio::test]
async fn extend_after_caching_keeps_the_cached_adapter() {
    // ---
    let factory = Arc::new(CountingFactory::default());
    let registry = ConnectionRegistry::with_factory(factory.clone(), dev_null_config());

    let before = registry.connection(None).await.unwrap();

    let replacement = mock_adapter();
    let r = replacement.clone();
    registry.extend("/dev/null", move |_cfg| {
        let r = r.clone();
        async move { Ok(r) }
    });

    let after = registry.connection(None).await.unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert!(!Arc::ptr_eq(&after, &replacement));
    assert_eq!(factory.calls(), 1);
}

#[tokio::test]
async fn default_connection_can_be_read_and_changed() {
    // ---
    let factory = Arc::new(CountingFactory::default());
    let registry = ConnectionRegistry::with_factory(factory.clone(), dev_null_config());

    assert_eq!(registry.default_connection(), "/dev/null");
    let old_default = registry.connection(None).await.unwrap();

    registry.set_default_connection("my_connection");
    assert_eq!(registry.default_connection(), "my_connection");

    let new_default = registry.connection(None).await.unwrap();
    let explicit = registry.connection(Some("my_connection")).await.unwrap();

    assert!(Arc::ptr_eq(&new_default, &explicit));
    assert!(!Arc::ptr_eq(&new_default, &old_default));
    assert!(registry.is_cached("/dev/null"));
    assert_eq!(factory.seen.lock().unwrap()[1].0, "my_driver");
}

#[tokio::test]
async fn set_default_does_not_validate_the_name() {
    // ---
    let registry = ConnectionRegistry::new(dev_null_config());

    registry.set_default_connection("gcloud");
    assert_eq!(registry.default_connection(), "gcloud");

    let err = registry.connection(None).await.err().unwrap();
    assert!(matches!(err, PubSubError::NotConfigured(name) if name == "gcloud"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_lookups_construct_once() {
    // ---
    init_logging();

    let factory = Arc::new(CountingFactory::slow(Duration::from_millis(50)));
    let registry = Arc::new(ConnectionRegistry::with_factory(
        factory.clone(),
        dev_null_config(),
    ));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.connection(None).await })
        })
        .collect();

    let mut adapters = Vec::new();
    for handle in handles {
        adapters.push(handle.await.expect("task panicked").expect("connection"));
    }

    assert_eq!(factory.calls(), 1);
    assert!(adapters.iter().all(|a| Arc::ptr_eq(a, &adapters[0])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_lookups_share_one_failed_construction() {
    // ---
    init_logging();

    let registry = Arc::new(ConnectionRegistry::new(config(json!({
        "default": "unreachable",
        "connections": { "unreachable": {} }
    }))));

    let attempts = Arc::new(AtomicUsize::new(0));
    let a = attempts.clone();
    registry.extend("unreachable", move |_cfg| {
        a.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err(PubSubError::Backend("connection timed out".into()))
        }
    });

    let started = std::time::Instant::now();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.connection(None).await })
        })
        .collect();

    let mut errors = Vec::new();
    for handle in handles {
        errors.push(handle.await.expect("task panicked").err().expect("construction fails"));
    }

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_millis(500), "callers retried in turn");
    for err in &errors {
        assert!(matches!(err.root(), PubSubError::Backend(msg) if msg == "connection timed out"));
        assert_eq!(err.to_string(), "backend error: connection timed out");
    }
    assert!(registry.cached_names().is_empty());

    // Only a later lookup starts a new attempt.
    registry.connection(None).await.err().unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn abandoned_construction_lets_the_next_caller_build() {
    // ---
    let registry = ConnectionRegistry::new(config(json!({
        "default": "slow",
        "connections": { "slow": {} }
    })));

    let attempts = Arc::new(AtomicUsize::new(0));
    let a = attempts.clone();
    registry.extend("slow", move |_cfg| {
        let attempt = a.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(mock_adapter())
        }
    });

    let abandoned = tokio::time::timeout(Duration::from_millis(20), registry.connection(None)).await;
    assert!(abandoned.is_err());
    assert!(!registry.is_cached("slow"));

    tokio::time::timeout(Duration::from_secs(1), registry.connection(None))
        .await
        .expect("lookup waited on an abandoned construction")
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(registry.is_cached("slow"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_construction_does_not_block_cached_names() {
    // ---
    let registry = Arc::new(ConnectionRegistry::new(config(json!({
        "default": "fast",
        "connections": {
            "fast": { "driver": "local" },
            "slow": {}
        }
    }))));

    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
    registry.extend("slow", move |_cfg| {
        let release_rx = release_rx.clone();
        async move {
            if let Some(rx) = release_rx.lock().await.take() {
                let _ = rx.await;
            }
            Ok(mock_adapter())
        }
    });

    let fast = registry.connection(Some("fast")).await.unwrap();

    let slow = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.connection(Some("slow")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let again = tokio::time::timeout(Duration::from_millis(200), registry.connection(Some("fast")))
        .await
        .expect("cached lookup blocked by an unrelated construction")
        .unwrap();
    assert!(Arc::ptr_eq(&fast, &again));
    assert!(!registry.is_cached("slow"));

    release_tx.send(()).unwrap();
    slow.await.unwrap().unwrap();
    assert!(registry.is_cached("slow"));
}

#[tokio::test]
async fn failed_construction_is_not_cached_and_can_be_retried() {
    // ---
    let registry = ConnectionRegistry::new(config(json!({
        "default": "flaky",
        "connections": { "flaky": {} }
    })));

    let attempts = Arc::new(AtomicUsize::new(0));
    let a = attempts.clone();
    registry.extend("flaky", move |_cfg| {
        let attempt = a.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                Err(PubSubError::Backend("connection refused".into()))
            } else {
                Ok(mock_adapter())
            }
        }
    });

    let err = registry.connection(None).await.err().unwrap();
    assert!(matches!(err, PubSubError::Backend(msg) if msg == "connection refused"));
    assert!(!registry.is_cached("flaky"));

    registry.connection(None).await.expect("second attempt succeeds");
    assert!(registry.is_cached("flaky"));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn close_all_closes_cached_adapters_without_evicting() {
    // ---
    let registry = ConnectionRegistry::new(config(json!({
        "default": "local",
        "connections": { "local": { "driver": "local" } }
    })));

    let local = registry.connection(None).await.unwrap();
    let mut handle = local.subscribe("events".into()).await.unwrap();

    registry.close_all().await.unwrap();

    assert!(handle.inbox.recv().await.is_none());
    assert!(Arc::ptr_eq(&local, &registry.connection(None).await.unwrap()));
}
