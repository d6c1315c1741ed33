//! 代理响应模块
//!
//! 后端响应的内部表示，头按小写名字存放。也负责把 reqwest
//! 的响应收进来，以及合成 404/503 这类诊断响应。

use std::collections::HashMap;

use crate::core::error::Result;

/// 一次后端（或合成）的 HTTP 响应
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    /// 状态码
    pub status: u16,
    /// 响应头，键为小写
    pub headers: HashMap<String, String>,
    /// 响应体
    pub body: Vec<u8>,
}

impl ProxyResponse {
    /// 从 reqwest 阻塞响应收取
    pub fn from_reqwest(response: reqwest::blocking::Response) -> Result<Self> {
        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                let key = name.as_str().to_ascii_lowercase();
                // 逐跳头不往回带，长度回头按实际体积重算
                if ["connection", "transfer-encoding", "content-length"].contains(&key.as_str()) {
                    continue;
                }
                headers.insert(key, value.to_string());
            }
        }
        let body = response.bytes()?.to_vec();
        let mut resp = Self { status, headers, body };
        resp.update_content_length();
        Ok(resp)
    }

    /// 合成一个带 HTML 诊断体的响应
    pub fn synthetic(status: u16, title: &str, message: &str) -> Self {
        let body = format!(
            "<html><head><title>{status} {title}</title></head>\
             <body><h1>{status} {title}</h1><p>{message}</p></body></html>"
        );
        let mut resp = Self {
            status,
            headers: HashMap::new(),
            body: body.into_bytes(),
        };
        resp.set_header("content-type", "text/html; charset=utf-8");
        resp.update_content_length();
        resp
    }

    /// 404：没有代理认领这个请求
    pub fn not_found(message: &str) -> Self {
        Self::synthetic(404, "Not Found", message)
    }

    /// 503：后端够不着
    pub fn service_unavailable(message: &str) -> Self {
        Self::synthetic(503, "Service Unavailable", message)
    }

    /// 读响应头，名字不分大小写
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// 写响应头
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// 摘掉响应头
    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(&name.to_ascii_lowercase())
    }

    /// 媒体类型（去掉 charset 等参数，小写）
    pub fn content_type(&self) -> String {
        self.header("content-type")
            .unwrap_or("")
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase()
    }

    /// 是否为 HTML 响应
    pub fn is_html(&self) -> bool {
        self.content_type() == "text/html"
    }

    /// 响应体按 UTF-8 读出来（宽松）
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 换掉响应体并同步 Content-Length
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
        self.update_content_length();
    }

    fn update_content_length(&mut self) {
        self.set_header("content-length", self.body.len().to_string());
    }
}
