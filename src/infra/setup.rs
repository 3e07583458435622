use crate::{
    adapters::http::app_state::AppState,
    application::{ports::entitlement_store::EntitlementStore, use_cases::reconciler::EntitlementReconciler},
    infra::{config::AppConfig, db::run_migrations, error::InfraError, postgres_persistence},
};
use std::fs::File;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub async fn init_app_state(config: AppConfig) -> Result<AppState, InfraError> {
    let postgres_arc =
        Arc::new(postgres_persistence(&config.database_url, config.db_max_connections).await?);

    if config.run_migrations {
        run_migrations(postgres_arc.pool()).await?;
    }

    let reconciler = EntitlementReconciler::new(postgres_arc as Arc<dyn EntitlementStore>);

    Ok(AppState {
        config: Arc::new(config),
        reconciler: Arc::new(reconciler),
    })
}

pub fn init_tracing(log_file: Option<&str>) -> Result<(), InfraError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "entitlement_sync=debug,tower_http=debug".into());

    // Console (pretty logs)
    let console_layer = fmt::layer()
        .with_target(false) // don't show target (module path)
        .with_level(true)
        .pretty();

    // File (structured JSON logs), only when configured
    let json_layer = match log_file {
        Some(path) => {
            let file = File::create(path).map_err(|source| InfraError::LogFile {
                path: path.to_string(),
                source,
            })?;
            Some(
                fmt::layer()
                    .json()
                    .with_writer(file)
                    .with_current_span(true)
                    .with_span_list(true),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .try_init()
        .ok();

    Ok(())
}
