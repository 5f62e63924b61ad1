use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use counter_domain::clock::SystemClock;
use counter_domain::config::{ApiConfig, ConfigError, StoreBackend};
use counter_domain::model::ConnectivityState;
use counter_domain::rate_limit::RateLimiter;
use counter_domain::services::telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
use counter_domain::storage::{CounterStore, WindowCounter};
use counter_storage::{MemoryCounterStore, RedisCounterStore};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    handlers::{
        get_counter_handler, health_handler, increment_counter_handler, method_not_allowed_handler,
        metrics_handler, not_found_handler,
    },
    state::AppState,
};

pub async fn run() -> Result<(), BootstrapError> {
    // 1. 加载配置
    let config = ApiConfig::load_from_env()?;

    // 2. 初始化遥测
    let telemetry = init_telemetry(&TelemetryConfig::from_env())?;

    // 3. 连接存储：失败不致命，进程照常启动并以 503 响应
    let (store, shared_counter) = connect_store(&config).await;
    let connectivity = ConnectivityState::new(store.is_some());

    // 4. 构建限流器
    let mut limiter = RateLimiter::new(config.rate_limit_policy().clone(), Arc::new(SystemClock))
        .with_local_capacity(config.rate_limit_capacity());
    match (config.rate_limit_storage(), shared_counter) {
        (StoreBackend::Redis, Some(counter)) => {
            limiter = limiter.with_shared_backend(counter, connectivity.clone());
        }
        (StoreBackend::Redis, None) => {
            warn!("rate limit storage is redis but redis is unavailable, counting in memory");
        }
        (StoreBackend::Memory, _) => {}
    }

    // 5. 构建应用状态
    let state = AppState::new(
        store,
        connectivity,
        limiter,
        telemetry,
        config.trusted_proxies().clone(),
    );

    info!(
        address = %config.bind_address(),
        workers = config.workers(),
        shared_rate_limit = state.limiter().is_shared(),
        "starting counter service"
    );

    // 6. 启动 HTTP 服务器
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .configure(configure_routes)
            .default_service(web::to(not_found_handler))
    })
    .workers(config.workers())
    .backlog(config.backlog())
    .keep_alive(config.keep_alive())
    .client_request_timeout(config.request_timeout())
    .bind(config.bind_address())?
    .run()
    .await?;

    Ok(())
}

/// Every known path; wrong methods on them answer 405.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/")
            .route(web::get().to(get_counter_handler))
            .route(web::post().to(increment_counter_handler))
            .default_service(web::to(method_not_allowed_handler)),
    )
    .service(
        web::resource("/health")
            .route(web::get().to(health_handler))
            .default_service(web::to(method_not_allowed_handler)),
    )
    .service(
        web::resource("/metrics")
            .route(web::get().to(metrics_handler))
            .default_service(web::to(method_not_allowed_handler)),
    );
}

type StoreHandles = (Option<Arc<dyn CounterStore>>, Option<Arc<dyn WindowCounter>>);

async fn connect_store(config: &ApiConfig) -> StoreHandles {
    match config.store_backend() {
        StoreBackend::Memory => {
            info!("using in-memory counter store");
            let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
            (Some(store), None)
        }
        StoreBackend::Redis => match RedisCounterStore::connect(config.store()).await {
            Ok(redis) => {
                info!(
                    host = config.store().host(),
                    port = config.store().port(),
                    "Connected to Redis"
                );
                let redis = Arc::new(redis);
                let store: Arc<dyn CounterStore> = redis.clone();
                let counter: Arc<dyn WindowCounter> = redis;
                (Some(store), Some(counter))
            }
            Err(err) => {
                error!(
                    host = config.store().host(),
                    port = config.store().port(),
                    error = %err,
                    "Failed to connect to Redis"
                );
                (None, None)
            }
        },
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
