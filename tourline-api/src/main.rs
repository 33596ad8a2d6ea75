use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tourline_api::state::{AppState, AuthConfig, RateLimit};
use tourline_api::{app, worker};
use tourline_booking::{BookingServices, JobRunner};
use tourline_core::SystemClock;
use tourline_store::app_config::Config;
use tourline_store::{
    DbClient, EventProducer, HttpPaymentProcessor, KafkaConfirmationMailer, KafkaEventSink, PgBlackoutRegistry,
    PgBookingRepository, PgCartRepository, PgCustomerDirectory, PgPackageCatalog, PgSlotRepository, RedisClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tourline_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("failed to load config")?;
    let settings = config.booking_settings()?;
    tracing::info!("Starting Tourline API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to Postgres")?;
    db.migrate().await.context("failed to run migrations")?;

    let producer = EventProducer::new(&config.kafka.brokers).context("failed to create Kafka producer")?;
    let processor = HttpPaymentProcessor::new(&config.payment_processor.base_url, &config.payment_processor.api_key)
        .context("failed to build payment processor client")?;

    let rate_limit = match &config.redis {
        Some(redis) => Some(RateLimit {
            redis: Arc::new(RedisClient::new(&redis.url).context("invalid Redis url")?),
            per_minute: redis.rate_limit_per_minute,
        }),
        None => {
            tracing::warn!("Redis not configured, public rate limiting disabled");
            None
        }
    };

    let pool = db.pool.clone();
    let services = BookingServices {
        slots: Arc::new(PgSlotRepository::new(pool.clone())),
        bookings: Arc::new(PgBookingRepository::new(pool.clone())),
        catalog: Arc::new(PgPackageCatalog::new(pool.clone())),
        blackouts: Arc::new(PgBlackoutRegistry::new(pool.clone())),
        customers: Arc::new(PgCustomerDirectory::new(pool.clone())),
        carts: Arc::new(PgCartRepository::new(pool)),
        processor: Arc::new(processor),
        mailer: Arc::new(KafkaConfirmationMailer::new(producer.clone())),
        events: Arc::new(KafkaEventSink::new(producer)),
        clock: Arc::new(SystemClock),
        settings,
    };

    if config.scheduler.enabled {
        tokio::spawn(worker::start_job_worker(
            JobRunner::new(services.clone()),
            config.scheduler.clone(),
        ));
    } else {
        tracing::info!("Scheduler disabled, jobs run only through admin triggers");
    }

    let app_state = AppState {
        services,
        rate_limit,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app(app_state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
