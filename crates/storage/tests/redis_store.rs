//! Integration tests against a real Redis.
//!
//! Ignored by default. Point `REDIS_HOST`/`REDIS_PORT` at a disposable
//! instance (database 15 is used) and run with `cargo test -p counter_storage -- --ignored`.

use std::{
    net::{SocketAddr, TcpListener},
    thread,
    time::{Duration, Instant},
};

use counter_domain::config::StoreConfig;
use counter_domain::storage::{CounterStore, WindowCounter};
use counter_storage::RedisCounterStore;

fn test_config() -> StoreConfig {
    let host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("REDIS_PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(6379);
    StoreConfig::new(host, port, 15)
}

async fn connect() -> Option<RedisCounterStore> {
    match RedisCounterStore::connect(&test_config()).await {
        Ok(store) => Some(store),
        Err(err) => {
            eprintln!("Skipping test: Redis not available ({err})");
            None
        }
    }
}

#[tokio::test]
#[ignore] // Requires Redis
async fn increments_are_atomic_across_tasks() {
    let Some(store) = connect().await else {
        return;
    };

    let start = store.get_counter().await.unwrap();
    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..25 {
                store.increment_counter().await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.get_counter().await.unwrap(), start + 16 * 25);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn window_hits_count_up_per_key() {
    let Some(store) = connect().await else {
        return;
    };

    let key = format!("LIMITER/it-{}/10/1/0", std::process::id());
    assert_eq!(store.hit(&key, Duration::from_secs(1)).await.unwrap(), 1);
    assert_eq!(store.hit(&key, Duration::from_secs(1)).await.unwrap(), 2);
}

#[tokio::test]
async fn unreachable_host_is_a_connectivity_error() {
    // Port 1 on localhost refuses connections on any sane test machine.
    let config = StoreConfig::new("127.0.0.1", 1, 0);
    let err = RedisCounterStore::connect(&config).await.unwrap_err();
    assert!(err.is_connectivity(), "unexpected error: {err}");
}

/// Accepts connections and never answers, like a host that is up but wedged.
fn silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming().flatten() {
            held.push(stream);
        }
    });
    addr
}

#[tokio::test]
async fn silent_server_hits_the_configured_timeout() {
    let addr = silent_server();
    let config = StoreConfig::new(addr.ip().to_string(), addr.port(), 15)
        .with_timeouts(Duration::from_millis(300), Duration::from_millis(300));

    let started = Instant::now();
    let err = RedisCounterStore::connect(&config).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_connectivity(), "unexpected error: {err}");
    assert!(err.to_string().contains("timed out"), "unexpected error: {err}");
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
}

#[tokio::test]
async fn silent_server_gives_up_after_five_seconds_by_default() {
    let addr = silent_server();
    let config = StoreConfig::new(addr.ip().to_string(), addr.port(), 15);

    let started = Instant::now();
    let err = RedisCounterStore::connect(&config).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_connectivity(), "unexpected error: {err}");
    assert!(elapsed >= Duration::from_millis(4_500), "took {elapsed:?}");
    assert!(elapsed < Duration::from_secs(11), "took {elapsed:?}");
}
