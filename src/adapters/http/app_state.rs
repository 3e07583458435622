use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    application::use_cases::reconciler::EntitlementReconciler, infra::config::AppConfig,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub reconciler: Arc<EntitlementReconciler>,
}

impl FromRef<AppState> for Arc<EntitlementReconciler> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.reconciler.clone()
    }
}
