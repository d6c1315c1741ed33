//! 代理请求模块
//!
//! 引擎内部的请求表示：方法、公开侧的 script_name/path_info
//! 拆分、查询串、头和请求体。头按小写名字存放，读写都不分大小写。

use std::collections::HashMap;

/// 一次进入代理的 HTTP 请求
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// HTTP 方法（大写）
    pub method: String,
    /// 对外协议，http 或 https
    pub scheme: String,
    /// 对外的 Host（可带端口）
    pub host: String,
    /// 已经认领的挂载前缀
    pub script_name: String,
    /// 剩下的路径，转发和匹配都看它
    pub path_info: String,
    /// 查询串（不带 ?）
    pub query_string: String,
    /// 请求头，键为小写
    pub headers: HashMap<String, String>,
    /// 请求体
    pub body: Vec<u8>,
    /// 客户端地址
    pub remote_addr: String,
}

impl ProxyRequest {
    /// 造一个空的 GET 请求（内部子请求和测试用）
    pub fn get(host: &str, path_info: &str) -> Self {
        Self {
            method: "GET".to_string(),
            scheme: "http".to_string(),
            host: host.to_string(),
            script_name: String::new(),
            path_info: path_info.to_string(),
            query_string: String::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            remote_addr: "127.0.0.1".to_string(),
        }
    }

    /// 完整请求路径：script_name + path_info
    pub fn path(&self) -> String {
        format!("{}{}", self.script_name, self.path_info)
    }

    /// 应用挂载点的公开 URL（不含本次请求的 path_info）
    pub fn application_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.script_name)
    }

    /// 本次请求的完整公开 URL
    pub fn url(&self) -> String {
        let mut url = format!("{}://{}{}", self.scheme, self.host, self.path());
        if !self.query_string.is_empty() {
            url.push('?');
            url.push_str(&self.query_string);
        }
        url
    }

    /// 不带端口的主机名，小写
    pub fn host_name(&self) -> String {
        self.host.split(':').next().unwrap_or("").to_ascii_lowercase()
    }

    /// 读请求头，名字不分大小写
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// 写请求头
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// URI 模板用的请求环境视图（WSGI 风格的键）
    pub fn environ(&self) -> HashMap<String, String> {
        let mut environ = HashMap::new();
        environ.insert("REQUEST_METHOD".to_string(), self.method.clone());
        environ.insert("SCRIPT_NAME".to_string(), self.script_name.clone());
        environ.insert("PATH_INFO".to_string(), self.path_info.clone());
        environ.insert("QUERY_STRING".to_string(), self.query_string.clone());
        environ.insert("REMOTE_ADDR".to_string(), self.remote_addr.clone());
        environ.insert("HTTP_HOST".to_string(), self.host.clone());
        let mut parts = self.host.splitn(2, ':');
        environ.insert(
            "SERVER_NAME".to_string(),
            parts.next().unwrap_or("").to_string(),
        );
        let default_port = if self.scheme == "https" { "443" } else { "80" };
        environ.insert(
            "SERVER_PORT".to_string(),
            parts.next().unwrap_or(default_port).to_string(),
        );
        environ.insert("wsgi.url_scheme".to_string(), self.scheme.clone());
        environ
    }

    /// URI 模板的变量查找：环境键优先，然后是头名，再是 here
    pub fn template_var(&self, name: &str, here: &str) -> Option<String> {
        if name == "here" {
            return Some(here.to_string());
        }
        if let Some(value) = self.environ().get(name) {
            return Some(value.clone());
        }
        self.header(name).map(str::to_string)
    }
}
