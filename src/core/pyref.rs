//! 宿主回调模块
//!
//! 配置里的 `pyref="module:callable"` 是对嵌入方注册的回调的
//! 引用。每个调用点是一个独立的能力签名，启动时按
//! "module:symbol" 注册进全局注册表。是否允许执行由
//! `<execute-pyref>` 安全开关把关，不允许时记 error 并跳过。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;

use crate::core::error::{Error, Result};
use crate::core::log::TraceLog;
use crate::core::request::ProxyRequest;
use crate::core::response::ProxyResponse;

/// `<dest pyref>`：算出转发目标 URL，也可用 AbortProxy 让位
pub type DestFn = Box<dyn Fn(&ProxyRequest, &TraceLog) -> Result<String> + Send + Sync>;
/// `<request pyref>`：改写（或换掉）请求
pub type RequestModFn = Box<dyn Fn(ProxyRequest, &TraceLog) -> Result<ProxyRequest> + Send + Sync>;
/// `<response pyref>`：改写（或换掉）响应
pub type ResponseModFn = Box<
    dyn Fn(&ProxyRequest, ProxyResponse, &str, &str, &str, &TraceLog) -> Result<ProxyResponse>
        + Send
        + Sync,
>;
/// `<pyref>` 匹配谓词
pub type MatchFn = Box<dyn Fn(&ProxyRequest, &TraceLog) -> bool + Send + Sync>;

/// 对注册回调的引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyRef {
    pub module: String,
    pub symbol: String,
}

impl PyRef {
    /// 解析 "module:callable" 形式的引用
    pub fn parse(text: &str, location: &str) -> Result<Self> {
        let (module, symbol) = text.split_once(':').ok_or_else(|| {
            Error::syntax(
                format!("pyref {text:?} should look like \"module:callable\""),
                location,
            )
        })?;
        if module.is_empty() || symbol.is_empty() {
            return Err(Error::syntax(
                format!("pyref {text:?} should look like \"module:callable\""),
                location,
            ));
        }
        Ok(Self {
            module: module.to_string(),
            symbol: symbol.to_string(),
        })
    }

    fn key(&self) -> String {
        format!("{}:{}", self.module, self.symbol)
    }
}

impl fmt::Display for PyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.symbol)
    }
}

/// 全局回调注册表
#[derive(Default)]
pub struct CallbackRegistry {
    dests: HashMap<String, DestFn>,
    request_mods: HashMap<String, RequestModFn>,
    response_mods: HashMap<String, ResponseModFn>,
    matchers: HashMap<String, MatchFn>,
}

lazy_static! {
    /// 全局注册表实例
    static ref REGISTRY: Arc<RwLock<CallbackRegistry>> =
        Arc::new(RwLock::new(CallbackRegistry::default()));
}

/// 注册 dest 回调
pub fn register_dest<F>(name: &str, callback: F)
where
    F: Fn(&ProxyRequest, &TraceLog) -> Result<String> + Send + Sync + 'static,
{
    if let Ok(mut registry) = REGISTRY.write() {
        registry.dests.insert(name.to_string(), Box::new(callback));
    }
}

/// 注册请求修饰回调
pub fn register_request_modifier<F>(name: &str, callback: F)
where
    F: Fn(ProxyRequest, &TraceLog) -> Result<ProxyRequest> + Send + Sync + 'static,
{
    if let Ok(mut registry) = REGISTRY.write() {
        registry.request_mods.insert(name.to_string(), Box::new(callback));
    }
}

/// 注册响应修饰回调
pub fn register_response_modifier<F>(name: &str, callback: F)
where
    F: Fn(&ProxyRequest, ProxyResponse, &str, &str, &str, &TraceLog) -> Result<ProxyResponse>
        + Send
        + Sync
        + 'static,
{
    if let Ok(mut registry) = REGISTRY.write() {
        registry.response_mods.insert(name.to_string(), Box::new(callback));
    }
}

/// 注册匹配谓词回调
pub fn register_matcher<F>(name: &str, callback: F)
where
    F: Fn(&ProxyRequest, &TraceLog) -> bool + Send + Sync + 'static,
{
    if let Ok(mut registry) = REGISTRY.write() {
        registry.matchers.insert(name.to_string(), Box::new(callback));
    }
}

/// 安全闸门：不允许执行时记 error
pub fn allowed(execute_pyref: bool, pyref: &PyRef, log: &TraceLog) -> bool {
    if !execute_pyref {
        log.error("<pyref>", format!("security disallows executing pyref {pyref}"));
    }
    execute_pyref
}

/// 调 dest 回调；没注册算转发错误
pub fn invoke_dest(pyref: &PyRef, request: &ProxyRequest, log: &TraceLog) -> Result<String> {
    let registry = REGISTRY
        .read()
        .map_err(|_| Error::Proxy("callback registry poisoned".to_string()))?;
    match registry.dests.get(&pyref.key()) {
        Some(callback) => callback(request, log),
        None => Err(Error::Proxy(format!("no dest callback registered for {pyref}"))),
    }
}

/// 调请求修饰回调；没注册记 error 后原样放行
pub fn invoke_request_modifier(
    pyref: &PyRef,
    request: ProxyRequest,
    log: &TraceLog,
) -> Result<ProxyRequest> {
    let registry = REGISTRY
        .read()
        .map_err(|_| Error::Proxy("callback registry poisoned".to_string()))?;
    match registry.request_mods.get(&pyref.key()) {
        Some(callback) => callback(request, log),
        None => {
            log.error("<request>", format!("no request callback registered for {pyref}"));
            Ok(request)
        }
    }
}

/// 调响应修饰回调；没注册记 error 后原样放行
#[allow(clippy::too_many_arguments)]
pub fn invoke_response_modifier(
    pyref: &PyRef,
    request: &ProxyRequest,
    response: ProxyResponse,
    orig_base: &str,
    proxied_base: &str,
    proxied_url: &str,
    log: &TraceLog,
) -> Result<ProxyResponse> {
    let registry = REGISTRY
        .read()
        .map_err(|_| Error::Proxy("callback registry poisoned".to_string()))?;
    match registry.response_mods.get(&pyref.key()) {
        Some(callback) => callback(request, response, orig_base, proxied_base, proxied_url, log),
        None => {
            log.error("<response>", format!("no response callback registered for {pyref}"));
            Ok(response)
        }
    }
}

/// 调匹配谓词；没注册按不匹配算
pub fn invoke_matcher(pyref: &PyRef, request: &ProxyRequest, log: &TraceLog) -> bool {
    let Ok(registry) = REGISTRY.read() else { return false };
    match registry.matchers.get(&pyref.key()) {
        Some(callback) => callback(request, log),
        None => {
            log.error("<pyref>", format!("no match callback registered for {pyref}"));
            false
        }
    }
}
