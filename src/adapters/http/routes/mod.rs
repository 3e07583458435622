pub mod health;
pub mod webhooks;

use axum::Router;

use crate::adapters::http::app_state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/webhooks", webhooks::router())
        .nest("/health", health::router())
}
