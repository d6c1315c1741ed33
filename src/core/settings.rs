//! 服务设置模块
//!
//! `<server-settings>` 一节的模型：监听地址、pyref 安全开关、
//! 开发者登录的白名单/黑名单/口令，以及后端 I/O 超时。
//! 开发者认证的执行体在外面，这里只管把配置读对。

use std::collections::HashMap;

use crate::core::config::{asbool, node_location};
use crate::core::error::{Error, Result};

/// 缺省连接超时（秒）
const DEFAULT_CONNECT_TIMEOUT: u64 = 15;

/// 服务设置
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// 监听的 host:port
    pub server_host: String,
    /// 是否允许执行 pyref 回调
    pub execute_pyref: bool,
    /// 出错页里是否允许展示本地文件
    pub display_local_files: bool,
    /// 开发者登录放行的 IP 段
    pub dev_allow: Vec<String>,
    /// 开发者登录拒绝的 IP 段
    pub dev_deny: Vec<String>,
    /// htpasswd 文件路径（与 dev_users 互斥）
    pub dev_htpasswd: Option<String>,
    /// 开发者会话有效期（秒）
    pub dev_expiration: u64,
    /// 内联的开发者账号
    pub dev_users: HashMap<String, String>,
    /// 后端连接超时（秒）
    pub connect_timeout: u64,
    /// 后端整体超时（秒），不设就不限制
    pub timeout: Option<u64>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            server_host: "localhost:8080".to_string(),
            execute_pyref: true,
            display_local_files: true,
            dev_allow: Vec::new(),
            dev_deny: Vec::new(),
            dev_htpasswd: None,
            dev_expiration: 60,
            dev_users: HashMap::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            timeout: None,
        }
    }
}

impl ProxySettings {
    /// 从 `<server-settings>` 元素解析
    pub fn parse_xml(el: roxmltree::Node<'_, '_>, file: &str) -> Result<Self> {
        let mut settings = Self::default();
        for child in el.children().filter(roxmltree::Node::is_element) {
            let location = node_location(file, &child);
            let text = child.text().unwrap_or("").trim();
            match child.tag_name().name() {
                "server" => settings.server_host = text.to_string(),
                "execute-pyref" => settings.execute_pyref = asbool(text, &location)?,
                "display-local-files" => settings.display_local_files = asbool(text, &location)?,
                "dev-allow" => settings
                    .dev_allow
                    .extend(text.split_whitespace().map(str::to_string)),
                "dev-deny" => settings
                    .dev_deny
                    .extend(text.split_whitespace().map(str::to_string)),
                "dev-htpasswd" => settings.dev_htpasswd = Some(text.to_string()),
                "dev-expiration" => {
                    if !text.is_empty() {
                        settings.dev_expiration = text.parse().map_err(|_| {
                            Error::syntax(
                                format!("<dev-expiration> should be an integer, not {text:?}"),
                                &location,
                            )
                        })?;
                    }
                }
                "dev-user" => {
                    let username = child.attribute("username").unwrap_or("");
                    let password = child.attribute("password").unwrap_or("");
                    if username.is_empty() || password.is_empty() {
                        return Err(Error::syntax(
                            "<dev-user> must have both a username and password attribute",
                            &location,
                        ));
                    }
                    if settings
                        .dev_users
                        .insert(username.to_string(), password.to_string())
                        .is_some()
                    {
                        return Err(Error::syntax(
                            format!("<dev-user username=\"{username}\"> appears more than once"),
                            &location,
                        ));
                    }
                }
                "connect-timeout" => {
                    settings.connect_timeout = text.parse().map_err(|_| {
                        Error::syntax(
                            format!("<connect-timeout> should be an integer, not {text:?}"),
                            &location,
                        )
                    })?;
                }
                "timeout" => {
                    settings.timeout = Some(text.parse().map_err(|_| {
                        Error::syntax(
                            format!("<timeout> should be an integer, not {text:?}"),
                            &location,
                        )
                    })?);
                }
                other => {
                    return Err(Error::syntax(
                        format!("unknown element in <server-settings>: <{other}>"),
                        &location,
                    ))
                }
            }
        }
        if !settings.dev_users.is_empty() && settings.dev_htpasswd.is_some() {
            return Err(Error::syntax(
                "you can use <dev-htpasswd> or <dev-user>, but not both",
                node_location(file, &el),
            ));
        }
        Ok(settings)
    }

    /// 设置监听主机
    pub fn with_host(mut self, host: &str) -> Self {
        let port = self.port();
        self.server_host = format!("{host}:{port}");
        self
    }

    /// 设置监听端口
    pub fn with_port(mut self, port: u16) -> Self {
        let host = self.host();
        self.server_host = format!("{host}:{port}");
        self
    }

    /// 监听主机名
    pub fn host(&self) -> String {
        self.server_host
            .split(':')
            .next()
            .unwrap_or("localhost")
            .to_string()
    }

    /// 监听端口，缺省 80
    pub fn port(&self) -> u16 {
        self.server_host
            .split(':')
            .nth(1)
            .and_then(|p| p.parse().ok())
            .unwrap_or(80)
    }

    /// 对外的基准 URL
    pub fn base_url(&self) -> String {
        let mut host = self.host();
        if host == "0.0.0.0" || host.is_empty() {
            host = "127.0.0.1".to_string();
        }
        if self.port() != 80 {
            host = format!("{host}:{}", self.port());
        }
        format!("http://{host}")
    }

    /// 校验开发者口令
    pub fn check_password(&self, username: &str, password: &str) -> bool {
        self.dev_users.get(username).map(String::as_str) == Some(password)
    }
}
