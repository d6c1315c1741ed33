//! 路由配置

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use super::handlers::{self, AppState};
use crate::app::App;

/// 创建全部应用路由：诊断端点 + 兜底代理入口
pub fn create_routes(app: Arc<App>) -> Router {
    Router::new()
        .route("/.reskin/ping", get(handlers::ping))
        .route("/.reskin/rules.json", get(handlers::rules_json))
        .fallback(handlers::proxy_entry)
        .with_state(Arc::new(AppState { app }))
}
