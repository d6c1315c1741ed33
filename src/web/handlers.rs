//! 请求处理器
//!
//! 入口处理器把 axum 请求折成引擎的 ProxyRequest，丢进阻塞
//! 线程池跑完整条管线，再把 ProxyResponse 装回 axum 响应。
//! `/.reskin/` 下是保留的诊断端点，不会遮住后端路径。

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{boxed, Bytes, Full};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::app::App;
use crate::core::log::TraceLog;
use crate::core::proxy::ProxyDest;
use crate::core::request::ProxyRequest;
use crate::core::response::ProxyResponse;

/// 共享状态
pub struct AppState {
    pub app: Arc<App>,
}

/// 心跳检测
pub async fn ping() -> &'static str {
    "pong"
}

/// 代理摘要
#[derive(serde::Serialize)]
struct ProxySummary {
    dest: String,
    location: String,
    request_modifications: usize,
    response_modifications: usize,
    strip_script_name: bool,
    keep_host: bool,
}

/// 规则摘要
#[derive(serde::Serialize)]
struct RuleSummary {
    classes: Vec<String>,
    actions: Vec<String>,
    theme: Option<String>,
    suppress_standard: bool,
}

/// 配置概览
#[derive(serde::Serialize)]
struct ConfigSummary {
    proxies: Vec<ProxySummary>,
    rules: Vec<RuleSummary>,
    default_theme: Option<String>,
}

/// 配置概览：代理和规则的 JSON 摘要，给运维看的
pub async fn rules_json(State(state): State<Arc<AppState>>) -> Response {
    let proxy_set = &state.app.config.proxy_set;
    let proxies = proxy_set
        .proxies
        .iter()
        .map(|proxy| ProxySummary {
            dest: match &proxy.dest {
                ProxyDest::Href { template, .. } => template.clone(),
                ProxyDest::Pyref(pyref) => format!("pyref:{pyref}"),
                ProxyDest::Next => "next".to_string(),
            },
            location: proxy.location.clone(),
            request_modifications: proxy.request_mods.len(),
            response_modifications: proxy.response_mods.len(),
            strip_script_name: proxy.strip_script_name,
            keep_host: proxy.keep_host,
        })
        .collect();
    let rules = proxy_set
        .ruleset
        .rules
        .iter()
        .map(|rule| RuleSummary {
            classes: rule.classes.clone(),
            actions: rule.actions.iter().map(ToString::to_string).collect(),
            theme: rule.theme.clone(),
            suppress_standard: rule.suppress_standard,
        })
        .collect();
    Json(ConfigSummary {
        proxies,
        rules,
        default_theme: proxy_set.ruleset.default_theme.clone(),
    })
    .into_response()
}

/// 兜底入口：所有没被诊断端点认领的请求都走代理管线
pub async fn proxy_entry(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = build_proxy_request(&method, &uri, &headers, body.to_vec(), addr, &state.app);
    let app = state.app.clone();
    let handled = tokio::task::spawn_blocking(move || {
        let log = TraceLog::new(format!("{} {}", request.method, request.path()));
        app.handle(&request, &log)
    })
    .await;
    match handled {
        Ok(response) => into_axum_response(response),
        Err(err) => {
            log::error!("request pipeline panicked: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

/// axum 请求折成引擎内部表示
fn build_proxy_request(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Vec<u8>,
    addr: SocketAddr,
    app: &App,
) -> ProxyRequest {
    let mut request = ProxyRequest::get("", uri.path());
    request.method = method.as_str().to_string();
    request.query_string = uri.query().unwrap_or("").to_string();
    request.body = body;
    request.remote_addr = addr.ip().to_string();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            request.set_header(name.as_str(), value);
        }
    }
    request.host = request
        .header("host")
        .map(str::to_string)
        .unwrap_or_else(|| app.config.settings.server_host.clone());
    request
}

/// 引擎响应装回 axum
fn into_axum_response(response: ProxyResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(boxed(Full::new(Bytes::from(response.body))))
        .unwrap_or_else(|_| (StatusCode::BAD_GATEWAY, "bad upstream response").into_response())
}
