//! 请求匹配模块
//!
//! `<proxy>` 下的匹配谓词：`<path>`、`<domain>`、`<header>`、
//! `<request-header>`、`<pyref>`，全部按 AND 组合。
//! path 的 prefix 形式还兼任前缀剥离的依据。

use regex::Regex;

use crate::core::error::{Error, Result};
use crate::core::log::TraceLog;
use crate::core::pyref::{self, PyRef};
use crate::core::request::ProxyRequest;

/// `<path>` 的三种写法
#[derive(Debug, Clone)]
pub enum PathPattern {
    /// `prefix:/blog`（不写前缀时的缺省），匹配 /blog 与 /blog/...
    Prefix(String),
    /// `exact:/blog/index.html`
    Exact(String),
    /// `regex:^/blog/\d+$`
    Regex(Regex),
}

impl PathPattern {
    pub fn parse(text: &str, location: &str) -> Result<Self> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix("exact:") {
            return Ok(PathPattern::Exact(rest.to_string()));
        }
        if let Some(rest) = text.strip_prefix("regex:") {
            let regex = Regex::new(rest).map_err(|err| {
                Error::syntax(format!("bad path regex {rest:?}: {err}"), location)
            })?;
            return Ok(PathPattern::Regex(regex));
        }
        let rest = text.strip_prefix("prefix:").unwrap_or(text);
        if rest.is_empty() {
            return Err(Error::syntax("empty <path> pattern", location));
        }
        Ok(PathPattern::Prefix(rest.to_string()))
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Prefix(prefix) => {
                let prefix = prefix.trim_end_matches('/');
                prefix.is_empty() || path == prefix || path.starts_with(&format!("{prefix}/"))
            }
            PathPattern::Exact(exact) => path == exact,
            PathPattern::Regex(regex) => regex.is_match(path),
        }
    }
}

/// 单个匹配谓词
#[derive(Debug, Clone)]
pub enum MatchPredicate {
    Path(PathPattern),
    Domain(String),
    Header { name: String, pattern: String },
    RequestHeader { name: String, pattern: String },
    Pyref(PyRef),
}

impl MatchPredicate {
    fn matches(&self, request: &ProxyRequest, execute_pyref: bool, log: &TraceLog) -> bool {
        match self {
            MatchPredicate::Path(pattern) => pattern.matches(&request.path_info),
            MatchPredicate::Domain(pattern) => domain_matches(pattern, request),
            MatchPredicate::Header { name, pattern }
            | MatchPredicate::RequestHeader { name, pattern } => request
                .header(name)
                .map_or(false, |value| glob_matches(pattern, value)),
            MatchPredicate::Pyref(pyref) => {
                if !pyref::allowed(execute_pyref, pyref, log) {
                    return false;
                }
                pyref::invoke_matcher(pyref, request, log)
            }
        }
    }
}

/// `<proxy>` 的完整匹配条件（空条件就是兜底代理）
#[derive(Debug, Clone, Default)]
pub struct ProxyMatch {
    pub predicates: Vec<MatchPredicate>,
}

impl ProxyMatch {
    /// 从 `<proxy>` 的子元素收集谓词；不认识的子元素留给调用方
    pub fn parse_xml(el: roxmltree::Node<'_, '_>, location: &str) -> Result<Self> {
        let mut predicates = Vec::new();
        for child in el.children().filter(roxmltree::Node::is_element) {
            let text = child.text().unwrap_or("").trim();
            match child.tag_name().name() {
                "path" => predicates.push(MatchPredicate::Path(PathPattern::parse(text, location)?)),
                "domain" => {
                    if text.is_empty() {
                        return Err(Error::syntax("empty <domain> pattern", location));
                    }
                    predicates.push(MatchPredicate::Domain(text.to_ascii_lowercase()));
                }
                "header" | "request-header" => {
                    let name = child.attribute("name").ok_or_else(|| {
                        Error::syntax(
                            format!("<{}> needs a name attribute", child.tag_name().name()),
                            location,
                        )
                    })?;
                    let predicate = if child.tag_name().name() == "header" {
                        MatchPredicate::Header {
                            name: name.to_string(),
                            pattern: text.to_string(),
                        }
                    } else {
                        MatchPredicate::RequestHeader {
                            name: name.to_string(),
                            pattern: text.to_string(),
                        }
                    };
                    predicates.push(predicate);
                }
                "pyref" => predicates.push(MatchPredicate::Pyref(PyRef::parse(text, location)?)),
                _ => {}
            }
        }
        Ok(Self { predicates })
    }

    /// 全部谓词为真才算命中
    pub fn matches(&self, request: &ProxyRequest, execute_pyref: bool, log: &TraceLog) -> bool {
        self.predicates
            .iter()
            .all(|predicate| predicate.matches(request, execute_pyref, log))
    }

    /// 供转发路径重定位用的前缀（取第一个 prefix 形式的 path）
    pub fn strip_prefix(&self) -> Option<String> {
        self.predicates.iter().find_map(|predicate| match predicate {
            MatchPredicate::Path(PathPattern::Prefix(prefix)) => Some(prefix.clone()),
            _ => None,
        })
    }
}

/// 域名匹配：不带端口小写比对，`*.example.com` 连子域一起算
fn domain_matches(pattern: &str, request: &ProxyRequest) -> bool {
    if pattern.contains(':') {
        return request.host.to_ascii_lowercase() == *pattern;
    }
    let host = request.host_name();
    match pattern.strip_prefix("*.") {
        Some(base) => host == base || host.ends_with(&format!(".{base}")),
        None => host == pattern,
    }
}

/// 头值匹配：`*` 通配，空模式只查存在性
fn glob_matches(pattern: &str, value: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    let mut regex = String::from("^");
    for ch in pattern.chars() {
        if ch == '*' {
            regex.push_str(".*");
        } else {
            regex.push_str(&regex::escape(&ch.to_string()));
        }
    }
    regex.push('$');
    Regex::new(&regex).map_or(false, |re| re.is_match(value))
}
