//! 选择器模块
//!
//! 规则用的选择器子语言：一个 CSS 表达式，外加可选的前缀来
//! 决定选中的"口径"（kind）：
//!
//! - `EXPR`             — 元素本身（elements，默认）
//! - `children:EXPR`    — 匹配元素的孩子们
//! - `attributes:EXPR` / `attributes(name, name):EXPR` — 匹配元素上的属性
//! - `tag:EXPR`         — 匹配元素的标签名
//!
//! 前面再叠一个 `not:` 时取反（只对 if-content 有意义）。
//! CSS 部分在解析期就编译一次做校验，求值时按需再编译，
//! 选择器本身只存字符串，配置可以跨线程共享。

use std::fmt;

use kuchikiki::{NodeRef, Selectors};

use crate::core::error::{Error, Result};

/// 选择器口径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorKind {
    /// 匹配到的元素本身
    Elements,
    /// 匹配元素的全部孩子
    Children,
    /// 匹配元素上的（某些）属性
    Attributes,
    /// 匹配元素的标签名
    Tag,
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelectorKind::Elements => "elements",
            SelectorKind::Children => "children",
            SelectorKind::Attributes => "attributes",
            SelectorKind::Tag => "tag",
        };
        f.write_str(name)
    }
}

/// 一次求值的结果
#[derive(Debug)]
pub struct Selection {
    pub kind: SelectorKind,
    /// 文档序的命中元素
    pub elements: Vec<NodeRef>,
    /// 点名的属性集合（空表示"全部"），仅 kind 为 attributes 时有意义
    pub attributes: Vec<String>,
}

/// 编译后的选择器表达式
#[derive(Debug, Clone)]
pub struct Selector {
    kind: SelectorKind,
    css: String,
    attributes: Vec<String>,
    inverted: bool,
    raw: String,
}

impl Selector {
    /// 解析选择器文本，CSS 部分编译失败算语法错误
    pub fn parse(text: &str) -> Result<Self> {
        let raw = text.to_string();
        let mut rest = text.trim();
        let mut inverted = false;
        if let Some(stripped) = rest.strip_prefix("not:") {
            inverted = true;
            rest = stripped.trim_start();
        }
        let (kind, attributes, css) = Self::split_kind(rest)?;
        if css.is_empty() {
            return Err(Error::Selection(format!("empty selector expression: {raw:?}")));
        }
        if Selectors::compile(&css).is_err() {
            return Err(Error::Selection(format!("invalid CSS expression: {css:?}")));
        }
        Ok(Self {
            kind,
            css,
            attributes,
            inverted,
            raw,
        })
    }

    fn split_kind(text: &str) -> Result<(SelectorKind, Vec<String>, String)> {
        if let Some(rest) = text.strip_prefix("children:") {
            return Ok((SelectorKind::Children, Vec::new(), rest.trim().to_string()));
        }
        if let Some(rest) = text.strip_prefix("elements:") {
            return Ok((SelectorKind::Elements, Vec::new(), rest.trim().to_string()));
        }
        if let Some(rest) = text.strip_prefix("tag:") {
            return Ok((SelectorKind::Tag, Vec::new(), rest.trim().to_string()));
        }
        if let Some(rest) = text.strip_prefix("attributes:") {
            return Ok((SelectorKind::Attributes, Vec::new(), rest.trim().to_string()));
        }
        if let Some(rest) = text.strip_prefix("attributes(") {
            let close = rest.find(')').ok_or_else(|| {
                Error::Selection(format!("unclosed attribute list in selector: {text:?}"))
            })?;
            let names: Vec<String> = rest[..close]
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect();
            let tail = rest[close + 1..].trim_start();
            let css = tail.strip_prefix(':').ok_or_else(|| {
                Error::Selection(format!("expected ':' after attribute list: {text:?}"))
            })?;
            return Ok((SelectorKind::Attributes, names, css.trim().to_string()));
        }
        Ok((SelectorKind::Elements, Vec::new(), text.trim().to_string()))
    }

    /// 该表达式可能产出的口径集合（编译期兼容性检查用）
    pub fn selector_types(&self) -> Vec<SelectorKind> {
        vec![self.kind]
    }

    /// if-content 取反标志
    pub fn inverted(&self) -> bool {
        self.inverted
    }

    /// 对文档求值，返回口径、文档序元素和点名属性
    pub fn select(&self, doc: &NodeRef) -> Result<Selection> {
        let matches = doc
            .select(&self.css)
            .map_err(|()| Error::Selection(format!("invalid CSS expression: {:?}", self.css)))?;
        let elements: Vec<NodeRef> = matches.map(|m| m.as_node().clone()).collect();
        Ok(Selection {
            kind: self.kind,
            elements,
            attributes: self.attributes.clone(),
        })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
