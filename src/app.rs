//! 应用装配模块
//!
//! 把配置、HTTP 客户端、调度和主题化串成一条请求处理管线。
//! DOM 类型不能跨线程，整条管线在一个阻塞任务里跑完。

use std::sync::Arc;
use std::time::Duration;

use crate::core::config::AppConfig;
use crate::core::error::{Error, Result};
use crate::core::log::TraceLog;
use crate::core::proxy::ForwardEnv;
use crate::core::request::ProxyRequest;
use crate::core::response::ProxyResponse;
use crate::core::rewrite;
use crate::core::theme;

/// 装配好的应用
pub struct App {
    pub config: AppConfig,
    client: reqwest::blocking::Client,
}

impl App {
    /// 按配置构建（HTTP 客户端带上超时，且不跟随重定向——
    /// 重定向要原样带回给客户端再做链接改写）
    pub fn new(config: AppConfig) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(config.settings.connect_timeout))
            .redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = config.settings.timeout {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        let client = builder.build()?;
        Ok(Self { config, client })
    }

    pub fn shared(config: AppConfig) -> Result<Arc<Self>> {
        Ok(Arc::new(Self::new(config)?))
    }

    /// 处理一个请求：调度转发，然后按需主题化
    pub fn handle(&self, request: &ProxyRequest, log: &TraceLog) -> ProxyResponse {
        let env = ForwardEnv {
            settings: &self.config.settings,
            client: &self.client,
        };
        let response = self.config.proxy_set.dispatch(request, &env, log);
        let fetch = |url: &str| self.fetch_text(url, request, log);
        theme::theme_response(response, request, &self.config.proxy_set.ruleset, &fetch, log)
    }

    /// 取回主题页或 href 内容页
    ///
    /// 落在公开 URL 空间里的走内部子请求（不再主题化，免得
    /// 绕圈），其余的直接对外抓取。
    fn fetch_text(&self, url: &str, request: &ProxyRequest, log: &TraceLog) -> Result<String> {
        let public_base = rewrite::with_trailing_slash(&request.application_url());
        if let Some(rest) = url.strip_prefix(&public_base) {
            let (path, query) = match rest.split_once('?') {
                Some((path, query)) => (path, query.to_string()),
                None => (rest, String::new()),
            };
            let mut subrequest = ProxyRequest::get(&request.host, &format!("/{path}"));
            subrequest.scheme = request.scheme.clone();
            subrequest.script_name = request.script_name.clone();
            subrequest.query_string = query;
            subrequest.remote_addr = request.remote_addr.clone();
            subrequest.set_header("host", request.host.clone());
            let env = ForwardEnv {
                settings: &self.config.settings,
                client: &self.client,
            };
            let response = self.config.proxy_set.dispatch(&subrequest, &env, log);
            if response.status != 200 {
                return Err(Error::Proxy(format!(
                    "fetching {url} through the proxy returned {}",
                    response.status
                )));
            }
            return Ok(response.text());
        }
        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(Error::Proxy(format!(
                "fetching {url} returned {}",
                response.status()
            )));
        }
        Ok(response.text()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("reskin-app-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_handle_serves_and_themes_from_file_backend() {
        let dir = scratch_dir("pipeline");
        fs::write(
            dir.join("index.html"),
            "<html><body><p>content!</p></body></html>",
        )
        .unwrap();
        fs::write(
            dir.join("theme.html"),
            "<html><body><div id=\"frame\"></div></body></html>",
        )
        .unwrap();
        let xml = format!(
            r#"<reskin>
                <theme href="/theme.html"/>
                <proxy><dest href="file://{}"/></proxy>
                <rule>
                    <append content="children:body" theme="children:#frame"/>
                </rule>
            </reskin>"#,
            dir.display()
        );
        let config = AppConfig::parse(&xml, "conf.xml").unwrap();
        let app = App::new(config).unwrap();
        let log = TraceLog::capturing("t");
        let response = app.handle(&ProxyRequest::get("public.example", "/"), &log);
        assert_eq!(response.status, 200);
        let body = response.text();
        assert!(body.contains("<div id=\"frame\"><p>content!</p></div>"), "got: {body}");
    }

    #[test]
    fn test_handle_404_without_proxies() {
        let config = AppConfig::parse("<reskin></reskin>", "conf.xml").unwrap();
        let app = App::new(config).unwrap();
        let log = TraceLog::capturing("t");
        let response = app.handle(&ProxyRequest::get("public.example", "/x"), &log);
        assert_eq!(response.status, 404);
    }
}
