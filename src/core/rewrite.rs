//! 链接改写模块
//!
//! 把代理过的响应从后端的 URL 空间改写回公开 URL 空间：
//! HTML 体里的链接属性、重定向的 Location 头、Set-Cookie 的
//! Domain。体内链接先按实际抓取的 URL 绝对化，再做前缀映射；
//! 命中 proxied_base 前缀的换成 orig_base，其余保持绝对化结果。

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use url::Url;

use crate::core::dom;
use crate::core::log::TraceLog;
use crate::core::request::ProxyRequest;
use crate::core::response::ProxyResponse;

/// 单值链接属性（lxml 的 href/src/action 一族）
const URL_ATTRIBUTES: &[&str] = &[
    "href", "src", "action", "formaction", "poster", "data", "background", "cite", "longdesc",
    "usemap", "ping",
];

lazy_static! {
    static ref COOKIE_DOMAIN_RE: Regex =
        Regex::new(r#"(?i)(domain="?)([a-z0-9._-]*)("?)"#).unwrap();
}

/// 给基准 URL 补上末尾斜杠
pub fn with_trailing_slash(base: &str) -> String {
    if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    }
}

/// 对响应做完整的链接改写
///
/// `orig_base` 是公开应用 URL，`proxied_base` 是后端 URL，
/// `proxied_url` 是实际抓取的完整 URL；前两者这里会补斜杠。
pub fn rewrite_response_links(
    response: &mut ProxyResponse,
    request: &ProxyRequest,
    orig_base: &str,
    proxied_base: &str,
    proxied_url: &str,
    log: &TraceLog,
) {
    let orig_base = with_trailing_slash(orig_base);
    let proxied_base = with_trailing_slash(proxied_base);
    if response.content_type() == "text/html" {
        rewrite_body(response, &orig_base, &proxied_base, proxied_url);
    } else {
        log.debug(
            "<response rewrite-links=\"1\">",
            format!(
                "not rewriting links in the body from {proxied_url}, because Content-Type is {}",
                response.content_type()
            ),
        );
    }
    rewrite_location(response, &orig_base, &proxied_base, proxied_url, log);
    rewrite_cookie_domain(response, request, proxied_url);
}

fn rewrite_body(response: &mut ProxyResponse, orig_base: &str, proxied_base: &str, proxied_url: &str) {
    let Ok(base) = Url::parse(proxied_url) else { return };
    let doc = dom::parse_document(&response.text());
    for node in doc.inclusive_descendants() {
        let Some(el) = node.as_element() else { continue };
        let mut attrs = el.attributes.borrow_mut();
        for name in URL_ATTRIBUTES {
            let Some(value) = attrs.get(*name).map(str::to_string) else { continue };
            if let Some(rewritten) = rewrite_link(&value, &base, orig_base, proxied_base) {
                if let Some(slot) = attrs.get_mut(*name) {
                    *slot = rewritten;
                }
            }
        }
        if let Some(srcset) = attrs.get("srcset").map(str::to_string) {
            let rewritten = rewrite_srcset(&srcset, &base, orig_base, proxied_base);
            if let Some(slot) = attrs.get_mut("srcset") {
                *slot = rewritten;
            }
        }
    }
    response.set_body(dom::serialize(&doc).into_bytes());
}

/// 改写单个链接；None 表示不碰（碎片、data: 这类）
fn rewrite_link(value: &str, base: &Url, orig_base: &str, proxied_base: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with("data:")
        || trimmed.starts_with("javascript:")
        || trimmed.starts_with("mailto:")
    {
        return None;
    }
    let absolute = base.join(trimmed).ok()?.to_string();
    if let Some(rest) = absolute.strip_prefix(proxied_base) {
        Some(format!("{orig_base}{rest}"))
    } else {
        // 外部链接不映射，但保留绝对化的结果
        Some(absolute)
    }
}

/// srcset 是 "url 描述符, url 描述符" 的列表，逐项改写
fn rewrite_srcset(srcset: &str, base: &Url, orig_base: &str, proxied_base: &str) -> String {
    srcset
        .split(',')
        .map(|entry| {
            let entry = entry.trim();
            let mut parts = entry.splitn(2, char::is_whitespace);
            let url = parts.next().unwrap_or("");
            let rewritten = rewrite_link(url, base, orig_base, proxied_base)
                .unwrap_or_else(|| url.to_string());
            match parts.next() {
                Some(descriptor) => format!("{rewritten} {}", descriptor.trim()),
                None => rewritten,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn rewrite_location(
    response: &mut ProxyResponse,
    orig_base: &str,
    proxied_base: &str,
    proxied_url: &str,
    log: &TraceLog,
) {
    let Some(location) = response.header("location").map(str::to_string) else { return };
    let Ok(base) = Url::parse(proxied_url) else { return };
    let Ok(absolute) = base.join(&location) else { return };
    let absolute = absolute.to_string();
    match absolute.strip_prefix(proxied_base) {
        Some(rest) => response.set_header("location", format!("{orig_base}{rest}")),
        None => {
            // 后端跳去了别的地方（比如换了域名），不改写但留个痕迹
            log.debug(
                "<response rewrite-links=\"1\">",
                format!("Location {absolute} is outside {proxied_base}, leaving it alone"),
            );
            response.set_header("location", absolute);
        }
    }
}

/// Set-Cookie 的 Domain 等于后端主机时换成公开主机
///
/// 带通配点的写法（.example.com）不动，是已知的局限。
fn rewrite_cookie_domain(response: &mut ProxyResponse, request: &ProxyRequest, proxied_url: &str) {
    let Some(cookie) = response.header("set-cookie").map(str::to_string) else { return };
    let Ok(proxied) = Url::parse(proxied_url) else { return };
    let old_domain = proxied.host_str().unwrap_or("").to_ascii_lowercase();
    let new_domain = request.host_name();
    if old_domain.is_empty() || new_domain.is_empty() {
        return;
    }
    let rewritten = COOKIE_DOMAIN_RE.replace_all(&cookie, |caps: &Captures<'_>| {
        if caps[2].to_ascii_lowercase() == old_domain {
            format!("{}{}{}", &caps[1], new_domain, &caps[3])
        } else {
            caps[0].to_string()
        }
    });
    response.set_header("set-cookie", rewritten.into_owned());
}
