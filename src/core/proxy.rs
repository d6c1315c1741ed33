//! 代理转发模块
//!
//! `<proxy>` 的模型与转发路径：按配置顺序找第一个命中的代理，
//! 跑请求修饰器、解析 dest、把请求原样递给后端（http/https）
//! 或本地文件（file），再按声明顺序跑响应修饰器。
//! dest 为 next 的代理会把请求让给下一个代理。

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::core::config::{asbool, node_location};
use crate::core::error::{Error, Result};
use crate::core::log::TraceLog;
use crate::core::pagematch::ProxyMatch;
use crate::core::pyref::{self, PyRef};
use crate::core::request::ProxyRequest;
use crate::core::response::ProxyResponse;
use crate::core::rewrite;
use crate::core::rule::RuleSet;
use crate::core::settings::ProxySettings;
use crate::core::uritemplate;

/// 转发要用的共享资源
pub struct ForwardEnv<'a> {
    pub settings: &'a ProxySettings,
    pub client: &'a reqwest::blocking::Client,
}

/// `<dest>` 的三种形态
#[derive(Debug, Clone)]
pub enum ProxyDest {
    /// URI 模板
    Href { template: String, here: String },
    /// 宿主回调给出目标
    Pyref(PyRef),
    /// 让给下一个代理
    Next,
}

impl ProxyDest {
    /// 从 `<dest>` 元素解析；href/pyref/next 三选一
    pub fn parse_xml(el: roxmltree::Node<'_, '_>, file: &str, here: &str) -> Result<Self> {
        let location = node_location(file, &el);
        let href = el.attribute("href");
        let pyref = el.attribute("pyref");
        let next = match el.attribute("next") {
            Some(value) => asbool(value, &location)?,
            None => false,
        };
        let given = usize::from(href.is_some()) + usize::from(pyref.is_some()) + usize::from(next);
        if given != 1 {
            return Err(Error::syntax(
                "<dest> needs exactly one of href=\"...\", pyref=\"...\" or next=\"1\"",
                location,
            ));
        }
        if let Some(href) = href {
            return Ok(ProxyDest::Href {
                template: href.to_string(),
                here: here.to_string(),
            });
        }
        if let Some(pyref) = pyref {
            return Ok(ProxyDest::Pyref(PyRef::parse(pyref, &location)?));
        }
        Ok(ProxyDest::Next)
    }

    /// 算出转发目标 URL
    pub fn resolve(
        &self,
        request: &ProxyRequest,
        env: &ForwardEnv<'_>,
        log: &TraceLog,
    ) -> Result<String> {
        match self {
            ProxyDest::Next => Err(Error::AbortProxy("<dest next=\"1\"/>".to_string())),
            ProxyDest::Pyref(pyref) => {
                if !pyref::allowed(env.settings.execute_pyref, pyref, log) {
                    return Err(Error::Proxy(format!("pyref {pyref} was not allowed to run")));
                }
                pyref::invoke_dest(pyref, request, log)
            }
            ProxyDest::Href { template, here } => {
                uritemplate::substitute(template, &|name| request.template_var(name, here))
            }
        }
    }
}

/// `<request>` 修饰器
#[derive(Debug, Clone)]
pub struct RequestModifier {
    pub pyref: Option<PyRef>,
    pub header: Option<(String, String)>,
}

impl RequestModifier {
    pub fn parse_xml(el: roxmltree::Node<'_, '_>, file: &str) -> Result<Self> {
        let location = node_location(file, &el);
        let header = parse_header_content(el, &location)?;
        let pyref = el
            .attribute("pyref")
            .map(|text| PyRef::parse(text, &location))
            .transpose()?;
        Ok(Self { pyref, header })
    }

    /// 按声明跑一遍：pyref 可以换掉请求，header/content 直接赋值
    pub fn modify(
        &self,
        mut request: ProxyRequest,
        env: &ForwardEnv<'_>,
        log: &TraceLog,
    ) -> Result<ProxyRequest> {
        if let Some(pyref) = &self.pyref {
            if pyref::allowed(env.settings.execute_pyref, pyref, log) {
                request = pyref::invoke_request_modifier(pyref, request, log)?;
            }
        }
        if let Some((name, content)) = &self.header {
            request.set_header(name, content.clone());
        }
        Ok(request)
    }
}

/// `<response>` 修饰器
#[derive(Debug, Clone)]
pub struct ResponseModifier {
    pub pyref: Option<PyRef>,
    pub header: Option<(String, String)>,
    pub rewrite_links: bool,
}

impl ResponseModifier {
    pub fn parse_xml(el: roxmltree::Node<'_, '_>, file: &str) -> Result<Self> {
        let location = node_location(file, &el);
        let header = parse_header_content(el, &location)?;
        let pyref = el
            .attribute("pyref")
            .map(|text| PyRef::parse(text, &location))
            .transpose()?;
        let rewrite_links = match el.attribute("rewrite-links") {
            Some(value) => asbool(value, &location)?,
            None => false,
        };
        Ok(Self {
            pyref,
            header,
            rewrite_links,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn modify(
        &self,
        request: &ProxyRequest,
        mut response: ProxyResponse,
        orig_base: &str,
        proxied_base: &str,
        proxied_url: &str,
        env: &ForwardEnv<'_>,
        log: &TraceLog,
    ) -> Result<ProxyResponse> {
        let orig_base = rewrite::with_trailing_slash(orig_base);
        let proxied_base = rewrite::with_trailing_slash(proxied_base);
        if let Some(pyref) = &self.pyref {
            if pyref::allowed(env.settings.execute_pyref, pyref, log) {
                response = pyref::invoke_response_modifier(
                    pyref,
                    request,
                    response,
                    &orig_base,
                    &proxied_base,
                    proxied_url,
                    log,
                )?;
            }
        }
        if let Some((name, content)) = &self.header {
            response.set_header(name, content.clone());
        }
        if self.rewrite_links {
            rewrite::rewrite_response_links(
                &mut response,
                request,
                &orig_base,
                &proxied_base,
                proxied_url,
                log,
            );
        }
        Ok(response)
    }
}

/// header 与 content 属性要么都给要么都不给
fn parse_header_content(
    el: roxmltree::Node<'_, '_>,
    location: &str,
) -> Result<Option<(String, String)>> {
    let header = el.attribute("header");
    let content = el.attribute("content");
    match (header, content) {
        (Some(header), Some(content)) => Ok(Some((header.to_string(), content.to_string()))),
        (None, None) => Ok(None),
        _ => Err(Error::syntax(
            "if you provide a header attribute you must provide a content attribute, and vice versa",
            location,
        )),
    }
}

/// 一条 `<proxy>` 配置
#[derive(Debug, Clone)]
pub struct Proxy {
    pub matcher: ProxyMatch,
    pub dest: ProxyDest,
    pub request_mods: Vec<RequestModifier>,
    pub response_mods: Vec<ResponseModifier>,
    pub strip_script_name: bool,
    pub keep_host: bool,
    pub location: String,
}

impl Proxy {
    /// 从 `<proxy>` 元素解析
    pub fn parse_xml(el: roxmltree::Node<'_, '_>, file: &str, here: &str) -> Result<Self> {
        let location = node_location(file, &el);
        let mut strip_script_name = false;
        let mut keep_host = false;
        for attr in el.attributes() {
            match attr.name() {
                "strip-script-name" => strip_script_name = asbool(attr.value(), &location)?,
                "keep-host" => keep_host = asbool(attr.value(), &location)?,
                other => {
                    return Err(Error::syntax(
                        format!("unknown attribute {other}=\"{}\" on <proxy>", attr.value()),
                        location,
                    ))
                }
            }
        }
        let matcher = ProxyMatch::parse_xml(el, &location)?;
        let mut dest = None;
        let mut request_mods = Vec::new();
        let mut response_mods = Vec::new();
        for child in el.children().filter(roxmltree::Node::is_element) {
            let child_location = node_location(file, &child);
            match child.tag_name().name() {
                "dest" => {
                    if dest.is_some() {
                        return Err(Error::syntax(
                            "you cannot have more than one <dest> tag",
                            child_location,
                        ));
                    }
                    dest = Some(ProxyDest::parse_xml(child, file, here)?);
                }
                "transform" => {
                    for attr in child.attributes() {
                        match attr.name() {
                            "strip-script-name" => {
                                strip_script_name = asbool(attr.value(), &child_location)?
                            }
                            "keep-host" => keep_host = asbool(attr.value(), &child_location)?,
                            other => {
                                return Err(Error::syntax(
                                    format!("unknown attribute {other} on <transform>"),
                                    child_location,
                                ))
                            }
                        }
                    }
                }
                "request" => request_mods.push(RequestModifier::parse_xml(child, file)?),
                "response" => response_mods.push(ResponseModifier::parse_xml(child, file)?),
                // 匹配谓词已经由 ProxyMatch 收走
                "path" | "domain" | "header" | "request-header" | "pyref" => {}
                other => {
                    return Err(Error::syntax(
                        format!("unknown tag in <proxy>: <{other}>"),
                        child_location,
                    ))
                }
            }
        }
        let dest = dest.ok_or_else(|| Error::syntax("<proxy> needs a <dest>", &location))?;
        Ok(Self {
            matcher,
            dest,
            request_mods,
            response_mods,
            strip_script_name,
            keep_host,
            location,
        })
    }

    /// 转发一次请求；dest 为 next 时返回 AbortProxy
    pub fn forward(
        &self,
        request: &ProxyRequest,
        env: &ForwardEnv<'_>,
        log: &TraceLog,
    ) -> Result<ProxyResponse> {
        let mut request = request.clone();
        if let Some(prefix) = self.matcher.strip_prefix() {
            let prefix = prefix.trim_end_matches('/').to_string();
            if !prefix.is_empty() {
                let path_info = request.path_info.clone();
                if let Some(rest) = path_info.strip_prefix(&format!("{prefix}/")) {
                    request.script_name.push_str(&prefix);
                    request.path_info = format!("/{rest}");
                } else {
                    log.warn(
                        &self.location,
                        format!(
                            "the match would strip the prefix {prefix:?} from the request path \
                             ({path_info:?}), but they do not match"
                        ),
                    );
                }
            }
        }
        // next 在请求修饰器之前就让位，修饰不会泄漏给下一个代理
        if matches!(self.dest, ProxyDest::Next) {
            return Err(Error::AbortProxy("<dest next=\"1\"/>".to_string()));
        }
        for modifier in &self.request_mods {
            request = modifier.modify(request, env, log)?;
        }
        let dest = self.dest.resolve(&request, env, log)?;
        log.debug(&self.location, format!("<proxy> matched; forwarding request to {dest}"));
        let dest_url = Url::parse(&dest)?;
        let (response, orig_base, proxied_base, proxied_url) = match dest_url.scheme() {
            "http" | "https" => self.proxy_to_http(&request, &dest_url, env, log)?,
            "file" => self.proxy_to_file(&request, &dest_url)?,
            other => {
                return Err(Error::Proxy(format!(
                    "bad scheme {other:?} in dest {dest:?}; expected http, https or file"
                )))
            }
        };
        let mut response = response;
        for modifier in &self.response_mods {
            response = modifier.modify(
                &request,
                response,
                &orig_base,
                &proxied_base,
                &proxied_url,
                env,
                log,
            )?;
        }
        Ok(response)
    }

    /// 转发到 http/https 后端
    fn proxy_to_http(
        &self,
        request: &ProxyRequest,
        dest: &Url,
        env: &ForwardEnv<'_>,
        log: &TraceLog,
    ) -> Result<(ProxyResponse, String, String, String)> {
        let orig_base = request.application_url();
        let prepared = prepare_http_request(request, dest, self.strip_script_name, self.keep_host)?;
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| Error::Proxy(format!("bad method {:?}", request.method)))?;
        let mut upstream = env.client.request(method, &prepared.url);
        for (name, value) in &prepared.headers {
            if ["content-length", "connection", "transfer-encoding"].contains(&name.as_str()) {
                continue;
            }
            upstream = upstream.header(name.as_str(), value.as_str());
        }
        let response = match upstream.body(request.body.clone()).send() {
            Ok(response) => ProxyResponse::from_reqwest(response)?,
            Err(err) => {
                log.warn(&self.location, format!("transport failure: {err}"));
                ProxyResponse::service_unavailable(&format!(
                    "Could not proxy the request to {} : {err}",
                    prepared.netloc
                ))
            }
        };
        Ok((response, orig_base, prepared.base, prepared.proxied_url))
    }

    /// file:// 的 dest：按 path_info 服务本地静态文件
    fn proxy_to_file(
        &self,
        request: &ProxyRequest,
        dest: &Url,
    ) -> Result<(ProxyResponse, String, String, String)> {
        let orig_base = request.application_url();
        let root = dest
            .to_file_path()
            .map_err(|()| Error::Proxy(format!("cannot use {dest} as a local path")))?;
        // .. 段直接丢弃，路径不可能逃出 dest 指向的目录
        let mut relative = PathBuf::new();
        for component in Path::new(&request.path_info).components() {
            if let Component::Normal(segment) = component {
                relative.push(segment);
            }
        }
        let mut full = root.join(&relative);
        if request.path_info.ends_with('/') || full.is_dir() {
            full.push("index.html");
        }
        let proxied_base = dest.to_string();
        let proxied_url = format!(
            "{}/{}",
            proxied_base.trim_end_matches('/'),
            relative.to_string_lossy()
        );
        let response = match fs::read(&full) {
            Ok(body) => {
                let mut response = ProxyResponse {
                    status: 200,
                    headers: HashMap::new(),
                    body: Vec::new(),
                };
                response.set_header("content-type", content_type_for(&full));
                response.set_body(body);
                response
            }
            Err(_) => ProxyResponse::not_found(&format!(
                "File not found: {}",
                request.path_info
            )),
        };
        Ok((response, orig_base, proxied_base, proxied_url))
    }
}

/// 组装好的上游请求参数
#[derive(Debug)]
pub struct PreparedRequest {
    /// 完整的上游 URL
    pub url: String,
    /// 上游请求头
    pub headers: HashMap<String, String>,
    /// 诊断用的 host:port
    pub netloc: String,
    /// 链接改写的 proxied_base（dest 去掉查询串）
    pub base: String,
    /// 实际抓取的完整 URL
    pub proxied_url: String,
}

/// 把公开请求改写成上游请求
///
/// 路径 = script_name + dest 路径 + path_info；查询串把 dest 的
/// 拼在请求自己的后面；X-Forwarded-* 记录原始请求；
/// strip-script-name 把挂载前缀挪进 X-Forwarded-Path；
/// 不 keep-host 时 Host 改成目标的 netloc。
pub fn prepare_http_request(
    request: &ProxyRequest,
    dest: &Url,
    strip_script_name: bool,
    keep_host: bool,
) -> Result<PreparedRequest> {
    let scheme = dest.scheme();
    let host = dest
        .host_str()
        .ok_or_else(|| Error::Proxy(format!("dest {dest} has no host")))?;
    let netloc = match dest.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let mut headers = request.headers.clone();
    headers.insert("x-forwarded-for".to_string(), request.remote_addr.clone());
    headers.insert("x-forwarded-scheme".to_string(), request.scheme.clone());
    headers.insert("x-forwarded-server".to_string(), request.host.clone());
    let mut script_name = request.script_name.clone();
    if strip_script_name {
        headers.insert("x-forwarded-path".to_string(), script_name.clone());
        script_name.clear();
    }
    if !keep_host {
        headers.insert("host".to_string(), netloc.clone());
    }
    let dest_path = dest.path().trim_end_matches('/');
    let path = format!("{script_name}{dest_path}{}", request.path_info);
    let mut query = request.query_string.clone();
    if let Some(dest_query) = dest.query() {
        if !dest_query.is_empty() {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(dest_query);
        }
    }
    let mut url = format!("{scheme}://{netloc}{path}");
    let proxied_url = if query.is_empty() {
        url.clone()
    } else {
        url.push('?');
        url.push_str(&query);
        url.clone()
    };
    let base = format!("{scheme}://{netloc}{dest_path}");
    Ok(PreparedRequest {
        url,
        headers,
        netloc,
        base,
        proxied_url,
    })
}

/// 按扩展名猜个 Content-Type
fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
        .as_str()
    {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// 全部代理加主题规则集
#[derive(Debug, Clone, Default)]
pub struct ProxySet {
    pub proxies: Vec<Proxy>,
    pub ruleset: RuleSet,
}

impl ProxySet {
    pub fn new(proxies: Vec<Proxy>, ruleset: RuleSet) -> Self {
        Self { proxies, ruleset }
    }

    /// 按配置顺序找第一个命中的代理并转发
    pub fn dispatch(
        &self,
        request: &ProxyRequest,
        env: &ForwardEnv<'_>,
        log: &TraceLog,
    ) -> ProxyResponse {
        self.dispatch_from(0, request, env, log)
    }

    /// 从第 start 个代理开始调度（AbortProxy 的续点）
    pub fn dispatch_from(
        &self,
        start: usize,
        request: &ProxyRequest,
        env: &ForwardEnv<'_>,
        log: &TraceLog,
    ) -> ProxyResponse {
        for proxy in self.proxies.iter().skip(start) {
            if !proxy.matcher.matches(request, env.settings.execute_pyref, log) {
                continue;
            }
            match proxy.forward(request, env, log) {
                Ok(response) => return response,
                Err(Error::AbortProxy(reason)) => {
                    log.debug(&proxy.location, format!("<proxy> aborted ({reason}), trying next proxy"));
                    continue;
                }
                Err(err) => {
                    log.error(&proxy.location, format!("forwarding failed: {err}"));
                    return ProxyResponse::synthetic(
                        500,
                        "Internal Server Error",
                        &format!("Forwarding failed: {err}"),
                    );
                }
            }
        }
        log.error("<proxies>", "no proxy matched the request; aborting with a 404 Not Found error");
        ProxyResponse::not_found("No proxy matched the request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env_with<'a>(
        settings: &'a ProxySettings,
        client: &'a reqwest::blocking::Client,
    ) -> ForwardEnv<'a> {
        ForwardEnv { settings, client }
    }

    fn proxy_from(xml: &str) -> Result<Proxy> {
        let doc = roxmltree::Document::parse(xml).unwrap();
        Proxy::parse_xml(doc.root_element(), "conf.xml", "/etc/reskin")
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("reskin-test-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_file(dir: &Path, name: &str, body: &str) {
        let mut file = fs::File::create(dir.join(name)).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    fn file_proxy(dir: &Path, extra: &str) -> Proxy {
        proxy_from(&format!(
            "<proxy>{extra}<dest href=\"file://{}\"/></proxy>",
            dir.display()
        ))
        .unwrap()
    }

    #[test]
    fn test_parse_proxy_requires_dest() {
        assert!(proxy_from("<proxy><path>/x</path></proxy>").is_err());
        assert!(proxy_from(
            r#"<proxy><dest href="http://a/"/><dest href="http://b/"/></proxy>"#
        )
        .is_err());
    }

    #[test]
    fn test_parse_transform_flags() {
        let proxy = proxy_from(
            r#"<proxy><transform strip-script-name="1" keep-host="1"/><dest href="http://b/"/></proxy>"#,
        )
        .unwrap();
        assert!(proxy.strip_script_name);
        assert!(proxy.keep_host);
        let proxy = proxy_from(
            r#"<proxy strip-script-name="1"><dest href="http://b/"/></proxy>"#,
        )
        .unwrap();
        assert!(proxy.strip_script_name);
    }

    #[test]
    fn test_parse_modifier_pairing() {
        assert!(proxy_from(
            r#"<proxy><dest href="http://b/"/><request header="X-A"/></proxy>"#
        )
        .is_err());
        let proxy = proxy_from(
            r#"<proxy><dest href="http://b/"/><request header="X-A" content="1"/><response rewrite-links="1"/></proxy>"#,
        )
        .unwrap();
        assert_eq!(proxy.request_mods.len(), 1);
        assert!(proxy.response_mods[0].rewrite_links);
    }

    #[test]
    fn test_dest_exclusivity() {
        assert!(proxy_from(
            r#"<proxy><dest href="http://b/" next="1"/></proxy>"#
        )
        .is_err());
        assert!(proxy_from(r#"<proxy><dest/></proxy>"#).is_err());
    }

    #[test]
    fn test_dest_template_resolution() {
        let settings = ProxySettings::default();
        let client = reqwest::blocking::Client::new();
        let env = env_with(&settings, &client);
        let log = TraceLog::capturing("t");
        let dest = ProxyDest::Href {
            template: "http://backend{PATH_INFO}?from={SERVER_NAME}&c={here}".to_string(),
            here: "/etc/reskin".to_string(),
        };
        let request = ProxyRequest::get("public.example", "/post");
        let resolved = dest.resolve(&request, &env, &log).unwrap();
        assert_eq!(resolved, "http://backend/post?from=public.example&c=/etc/reskin");
    }

    #[test]
    fn test_dest_template_undefined_variable() {
        let settings = ProxySettings::default();
        let client = reqwest::blocking::Client::new();
        let env = env_with(&settings, &client);
        let log = TraceLog::capturing("t");
        let dest = ProxyDest::Href {
            template: "http://{NOT_A_VAR}/".to_string(),
            here: "/".to_string(),
        };
        let request = ProxyRequest::get("h", "/");
        assert!(matches!(
            dest.resolve(&request, &env, &log),
            Err(Error::Template(_))
        ));
    }

    #[test]
    fn test_prepare_http_request_shapes() {
        let mut request = ProxyRequest::get("public.example", "/post");
        request.script_name = "/blog".to_string();
        request.query_string = "page=2".to_string();
        request.remote_addr = "10.1.2.3".to_string();
        let dest = Url::parse("http://backend:8080/app?token=x").unwrap();
        let prepared = prepare_http_request(&request, &dest, false, false).unwrap();
        assert_eq!(prepared.url, "http://backend:8080/blog/app/post?page=2&token=x");
        assert_eq!(prepared.proxied_url, prepared.url);
        assert_eq!(prepared.base, "http://backend:8080/app");
        assert_eq!(prepared.netloc, "backend:8080");
        assert_eq!(prepared.headers.get("x-forwarded-for").unwrap(), "10.1.2.3");
        assert_eq!(prepared.headers.get("x-forwarded-scheme").unwrap(), "http");
        assert_eq!(prepared.headers.get("x-forwarded-server").unwrap(), "public.example");
        assert_eq!(prepared.headers.get("host").unwrap(), "backend:8080");
    }

    #[test]
    fn test_prepare_http_request_strip_script_and_keep_host() {
        let mut request = ProxyRequest::get("public.example", "/post");
        request.script_name = "/blog".to_string();
        request.set_header("Host", "public.example");
        let dest = Url::parse("http://backend/").unwrap();
        let prepared = prepare_http_request(&request, &dest, true, true).unwrap();
        assert_eq!(prepared.url, "http://backend/post");
        assert_eq!(prepared.headers.get("x-forwarded-path").unwrap(), "/blog");
        // keep-host：Host 保持原样
        assert_eq!(prepared.headers.get("host").unwrap(), "public.example");
    }

    #[test]
    fn test_file_dest_serves_and_404s() {
        let dir = scratch_dir("files");
        write_file(&dir, "page.html", "<html><body>file!</body></html>");
        write_file(&dir, "index.html", "<html><body>home</body></html>");
        let proxy = file_proxy(&dir, "");
        let settings = ProxySettings::default();
        let client = reqwest::blocking::Client::new();
        let env = env_with(&settings, &client);
        let log = TraceLog::capturing("t");

        let response = proxy.forward(&ProxyRequest::get("h", "/page.html"), &env, &log).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type(), "text/html");
        assert!(response.text().contains("file!"));

        // 目录请求落到 index.html
        let response = proxy.forward(&ProxyRequest::get("h", "/"), &env, &log).unwrap();
        assert!(response.text().contains("home"));

        // .. 段被丢掉，出不了根目录
        let response = proxy
            .forward(&ProxyRequest::get("h", "/../../etc/passwd"), &env, &log)
            .unwrap();
        assert_eq!(response.status, 404);

        let response = proxy.forward(&ProxyRequest::get("h", "/nope.html"), &env, &log).unwrap();
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_strip_prefix_rebases_path() {
        let dir = scratch_dir("strip");
        write_file(&dir, "page.html", "stripped");
        let proxy = file_proxy(&dir, "<path>/app</path>");
        let settings = ProxySettings::default();
        let client = reqwest::blocking::Client::new();
        let env = env_with(&settings, &client);
        let log = TraceLog::capturing("t");
        let response = proxy
            .forward(&ProxyRequest::get("h", "/app/page.html"), &env, &log)
            .unwrap();
        assert_eq!(response.status, 200);
        assert!(response.text().contains("stripped"));
    }

    #[test]
    fn test_next_aborts_and_dispatch_falls_through() {
        let dir = scratch_dir("next");
        write_file(&dir, "index.html", "second proxy");
        let first = proxy_from(
            r#"<proxy><dest next="1"/><request header="X-Leak" content="1"/></proxy>"#,
        )
        .unwrap();
        let second = file_proxy(&dir, "");
        let set = ProxySet::new(vec![first, second.clone()], RuleSet::default());
        let settings = ProxySettings::default();
        let client = reqwest::blocking::Client::new();
        let env = env_with(&settings, &client);
        let log = TraceLog::capturing("t");
        let request = ProxyRequest::get("h", "/");

        let full = set.dispatch(&request, &env, &log);
        let tail = ProxySet::new(vec![second], RuleSet::default()).dispatch(&request, &env, &log);
        assert_eq!(full.status, 200);
        assert_eq!(full.text(), tail.text());
    }

    #[test]
    fn test_no_proxy_matches_is_404() {
        let set = ProxySet::new(Vec::new(), RuleSet::default());
        let settings = ProxySettings::default();
        let client = reqwest::blocking::Client::new();
        let env = env_with(&settings, &client);
        let log = TraceLog::capturing("t");
        let response = set.dispatch(&ProxyRequest::get("h", "/"), &env, &log);
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_transport_failure_is_503() {
        // 拿一个必然连不上的端口
        let proxy = proxy_from(r#"<proxy><dest href="http://127.0.0.1:1/"/></proxy>"#).unwrap();
        let settings = ProxySettings::default();
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(std::time::Duration::from_millis(300))
            .build()
            .unwrap();
        let env = env_with(&settings, &client);
        let log = TraceLog::capturing("t");
        let response = proxy.forward(&ProxyRequest::get("h", "/"), &env, &log).unwrap();
        assert_eq!(response.status, 503);
        assert!(response.text().contains("127.0.0.1:1"));
    }
}
