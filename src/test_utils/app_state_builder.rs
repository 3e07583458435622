use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::{
    adapters::http::app_state::AppState,
    application::{
        ports::entitlement_store::EntitlementStore, use_cases::reconciler::EntitlementReconciler,
    },
    infra::config::AppConfig,
    test_utils::InMemoryEntitlementStore,
};

pub fn create_test_config() -> AppConfig {
    AppConfig {
        database_url: SecretString::new("postgres://test@localhost/test".into()),
        bind_addr: "127.0.0.1:3001".parse::<SocketAddr>().unwrap(),
        db_max_connections: 1,
        webhook_timeout: Duration::from_secs(5),
        run_migrations: false,
        log_file: None,
    }
}

/// App state wired to the given in-memory store, so tests can seed and inspect it.
pub fn create_test_app_state(store: Arc<InMemoryEntitlementStore>) -> AppState {
    let reconciler = EntitlementReconciler::new(store as Arc<dyn EntitlementStore>);
    AppState {
        config: Arc::new(create_test_config()),
        reconciler: Arc::new(reconciler),
    }
}
