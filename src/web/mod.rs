//! Web 层：axum 服务器与请求入口

pub mod handlers;
pub mod routes;
pub mod server;
