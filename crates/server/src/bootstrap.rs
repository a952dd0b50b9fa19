use std::sync::Arc;
use std::time::Duration;

use bookworm_agent::{
    DialogueOrchestrator, DialogueSettings, FraudHandler, GoogleBooksCatalog, HandlerRegistry,
    IntentClassifier, LlmClient, OpenAiCompatibleClient, OrderHandler, OrderLookup,
    OrderQueryHandler, OrderSaga, RecommendationHandler, RegistryError, RetryPolicy,
};
use bookworm_core::config::{AppConfig, ConfigError};
use bookworm_db::{
    connect_with_settings, migrations, DbPool, OrderRepository, SessionStore, SqlOrderRepository,
    SqlSessionStore,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<DialogueOrchestrator>,
    pub saga: Arc<OrderSaga>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client setup failed: {0}")]
    HttpClient(#[source] anyhow::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm: Arc<dyn LlmClient> = Arc::new(
        OpenAiCompatibleClient::from_config(&config.llm).map_err(BootstrapError::HttpClient)?,
    );
    let catalog = Arc::new(
        GoogleBooksCatalog::from_config(&config.catalog).map_err(BootstrapError::HttpClient)?,
    );
    let orders: Arc<dyn OrderRepository> = Arc::new(SqlOrderRepository::new(db_pool.clone()));
    let sessions: Arc<dyn SessionStore> = Arc::new(SqlSessionStore::new(db_pool.clone()));
    let retry = RetryPolicy::from_config(&config.llm);

    let saga = Arc::new(OrderSaga::new(
        orders.clone(),
        config.orders.delivery_lead_days,
        Duration::from_secs(config.database.timeout_secs),
    ));
    let lookup = Arc::new(OrderLookup::new(orders, config.orders.history_limit));
    let registry = HandlerRegistry::builder()
        .register(Arc::new(RecommendationHandler::new(
            llm.clone(),
            catalog,
            retry,
            config.dialogue.greeting_message.clone(),
            config.dialogue.history_window,
        )))
        .register(Arc::new(OrderHandler::new(saga.clone(), lookup.clone())))
        .register(Arc::new(OrderQueryHandler::new(lookup)))
        .register(Arc::new(FraudHandler::new(llm.clone(), retry)))
        .build()?;

    let orchestrator = Arc::new(DialogueOrchestrator::new(
        sessions,
        IntentClassifier::from_config(llm, &config.llm, &config.dialogue),
        registry,
        DialogueSettings::from_config(&config.dialogue),
    ));
    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        llm_model = %config.llm.model,
        "dialogue engine assembled"
    );

    Ok(Application { config, db_pool, orchestrator, saga })
}
