use std::{fmt, future::Future, time::Duration};

use async_trait::async_trait;
use counter_domain::{
    config::StoreConfig,
    model::COUNTER_KEY,
    storage::{CounterStore, StoreError, StoreResult, WindowCounter},
};
use metrics::{counter, histogram};
use redis::{
    aio::ConnectionManager, AsyncCommands, Client, ConnectionAddr, ConnectionInfo,
    RedisConnectionInfo, RedisResult,
};
use tokio::time::{timeout, Instant};
use tracing::{debug, info_span, Instrument};

use crate::errors::classify;

/// Counter store backed by a single Redis instance. Clones share one
/// multiplexed connection.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    key: String,
    operation_timeout: Duration,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("key", &self.key)
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connects and pings, so a bad password or unreachable host fails here
    /// rather than on the first request.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(config.host().to_string(), config.port()),
            redis: RedisConnectionInfo {
                db: config.db(),
                password: config.credential_chain().resolve(),
                ..Default::default()
            },
        };
        let client = Client::open(info).map_err(classify)?;

        let connection = timeout(config.connect_timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                StoreError::connectivity(format!(
                    "connect to {}:{} timed out after {:?}",
                    config.host(),
                    config.port(),
                    config.connect_timeout()
                ))
            })?
            .map_err(classify)?;

        let store = Self {
            connection,
            key: COUNTER_KEY.to_string(),
            operation_timeout: config.operation_timeout(),
        };
        store.ping().await?;
        debug!(host = config.host(), port = config.port(), db = config.db(), "redis connected");
        Ok(store)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Runs one command under the operation timeout and records its
    /// metrics and span.
    async fn run<T, F>(&self, operation: &'static str, key: &str, command: F) -> StoreResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        let span = info_span!(
            "redis_command",
            otel.name = %format!("redis_{operation}"),
            redis.operation = operation,
            redis.key = %key,
        );

        let started = Instant::now();
        let result = match timeout(self.operation_timeout, command.instrument(span)).await {
            Ok(outcome) => outcome.map_err(classify),
            Err(_) => Err(StoreError::connectivity(format!(
                "redis {operation} timed out after {:?}",
                self.operation_timeout
            ))),
        };

        let status = if result.is_ok() { "success" } else { "error" };
        counter!("redis_operations_total", "operation" => operation, "status" => status)
            .increment(1);
        histogram!("redis_operation_duration_seconds", "operation" => operation)
            .record(started.elapsed().as_secs_f64());

        result
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get_counter(&self) -> StoreResult<i64> {
        let mut conn = self.connection.clone();
        let value: Option<i64> = self.run("get", &self.key, conn.get(&self.key)).await?;
        Ok(value.unwrap_or(0))
    }

    async fn increment_counter(&self) -> StoreResult<i64> {
        let mut conn = self.connection.clone();
        self.run("incr", &self.key, conn.incr(&self.key, 1_i64)).await
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let _pong: String = self
            .run("ping", &self.key, redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl WindowCounter for RedisCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> StoreResult<u64> {
        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(window.as_secs().max(1))
            .ignore();
        let (hits,): (u64,) = self.run("hit", key, pipe.query_async(&mut conn)).await?;
        Ok(hits)
    }
}
