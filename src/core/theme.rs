//! 主题化驱动模块
//!
//! 转发拿到 HTML 响应之后的最后一步：解析内容页、取回并解析
//! 主题页、跑规则集、把改好的主题序列化回响应体。
//! abort 策略触发时回退到原始主题；其余任何失败都放过内容页，
//! 客户端总能看到点什么。

use std::collections::HashSet;

use kuchikiki::NodeRef;
use url::Url;

use crate::core::dom;
use crate::core::error::{Error, Result};
use crate::core::log::TraceLog;
use crate::core::request::ProxyRequest;
use crate::core::response::ProxyResponse;
use crate::core::rewrite;
use crate::core::rule::{RuleSet, DEFAULT_CLASS};

/// 后端可用这个响应头为页面点名规则 class（空格分隔）
pub const PAGE_CLASS_HEADER: &str = "x-reskin-page-class";

/// 按需抓取文本资源（主题页、href 内容页）的回调
pub type TextFetcher<'a> = &'a dyn Fn(&str) -> Result<String>;

/// 算出本次请求的规则 class 集合，并把点名头消费掉
pub fn request_classes(response: &mut ProxyResponse) -> HashSet<String> {
    let mut classes: HashSet<String> = [DEFAULT_CLASS.to_string()].into_iter().collect();
    if let Some(raw) = response.remove_header(PAGE_CLASS_HEADER) {
        classes.extend(raw.split_whitespace().map(str::to_string));
    }
    classes
}

/// 该响应要不要走主题化
pub fn should_theme(response: &ProxyResponse) -> bool {
    response.status == 200 && response.content_type() == "text/html"
}

/// 对一个后端响应做主题化
///
/// 不满足条件（非 200、非 HTML、没配主题）时原样返回。
pub fn theme_response(
    mut response: ProxyResponse,
    request: &ProxyRequest,
    ruleset: &RuleSet,
    fetch_text: TextFetcher<'_>,
    log: &TraceLog,
) -> ProxyResponse {
    if !should_theme(&response) {
        return response;
    }
    if ruleset.rules.is_empty() && ruleset.default_theme.is_none() {
        return response;
    }
    let classes = request_classes(&mut response);
    let active = ruleset.active_classes(&classes);
    let Some(theme_href) = ruleset.theme_url(&active, log) else {
        log.warn("<ruleset>", "no theme URL configured; returning the response unthemed");
        return response;
    };
    let base = rewrite::with_trailing_slash(&request.application_url());
    let theme_url = match resolve_url(&base, &theme_href) {
        Ok(url) => url,
        Err(err) => {
            log.error("<ruleset>", format!("bad theme URL {theme_href:?}: {err}"));
            return response;
        }
    };
    let theme_html = match fetch_text(&theme_url) {
        Ok(html) => html,
        Err(err) => {
            log.error("<ruleset>", format!("could not fetch the theme {theme_url}: {err}"));
            return response;
        }
    };
    let content_doc = dom::parse_document(&response.text());
    let theme_doc = dom::parse_document(&theme_html);
    let fetcher = |href: &str| -> Result<NodeRef> {
        let absolute = resolve_url(&base, href)?;
        fetch_text(&absolute).map(|html| dom::parse_document(&html))
    };
    match ruleset.apply(&content_doc, &theme_doc, &fetcher, log, &classes) {
        Ok(()) => response.set_body(dom::serialize(&theme_doc).into_bytes()),
        Err(Error::AbortTheme(reason)) => {
            log.warn(
                "<ruleset>",
                format!("theme processing aborted ({reason}); returning the original theme"),
            );
            let pristine = dom::parse_document(&theme_html);
            response.set_body(dom::serialize(&pristine).into_bytes());
        }
        Err(err) => {
            log.error("<ruleset>", format!("theme processing failed: {err}"));
        }
    }
    response
}

/// 相对 URL 解析到公开基准上
fn resolve_url(base: &str, href: &str) -> Result<String> {
    Ok(Url::parse(base)?.join(href)?.to_string())
}
