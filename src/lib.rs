//! reskin - 主题化反向代理
//!
//! 把请求转发给后端，再按声明式规则把后端页面的片段嫁接进
//! 一个单独抓取的主题页面里，整页返回给客户端。
//! 核心在 `core`（规则引擎、选择器、代理调度、链接改写），
//! `web` 是 axum 入口，`app` 把两边装配起来。

pub mod app;
pub mod cli;
pub mod core;
pub mod web;

use std::error::Error;
use std::sync::Arc;

use crate::app::App;
use crate::core::config::AppConfig;
use crate::web::routes::create_routes;
use crate::web::server::Server;

/// 用一套配置把服务器跑起来
pub async fn serve(config: AppConfig) -> Result<(), Box<dyn Error>> {
    let host = config.settings.host();
    let port = config.settings.port();
    // 阻塞 HTTP 客户端不能在异步上下文里构建
    let app: Arc<App> = tokio::task::spawn_blocking(move || App::shared(config)).await??;
    let router = create_routes(app);
    Server::new(&host, port, router)?.run().await?;
    Ok(())
}
