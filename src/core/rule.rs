//! 规则与规则集模块
//!
//! `<rule>` 是一组按声明顺序执行的动作，带一个 class 集合；
//! 只有 class 与请求的活动 class 有交集时才会执行。
//! RuleSet 按配置顺序串起全部规则，并负责主题 URL 的归属
//! 和收尾时的来源标记清理。

use std::collections::HashSet;

use kuchikiki::NodeRef;

use crate::core::action::{Action, ResourceFetcher};
use crate::core::config::asbool;
use crate::core::dom;
use crate::core::error::{Error, Result};
use crate::core::log::TraceLog;

/// 缺省规则 class
pub const DEFAULT_CLASS: &str = "default";

/// 一段 `<rule>` 配置
#[derive(Debug, Clone)]
pub struct Rule {
    /// 规则生效的 class 集合，缺省 {"default"}
    pub classes: Vec<String>,
    /// 按声明顺序执行的动作
    pub actions: Vec<Action>,
    /// 对整个请求生效的主题 URL 覆盖
    pub theme: Option<String>,
    /// 生效时是否压掉纯 default 规则
    pub suppress_standard: bool,
    /// 配置位置，报错用
    pub location: String,
}

impl Rule {
    /// 从 `<rule>` 元素解析
    pub fn parse_xml(el: roxmltree::Node<'_, '_>, location: &str) -> Result<Self> {
        for attr in el.attributes() {
            if !["class", "suppress-standard"].contains(&attr.name()) {
                return Err(Error::syntax(
                    format!("unknown attribute {}=\"{}\" on <rule>", attr.name(), attr.value()),
                    location,
                ));
            }
        }
        let mut classes: Vec<String> = el
            .attribute("class")
            .unwrap_or("")
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if classes.is_empty() {
            classes.push(DEFAULT_CLASS.to_string());
        }
        let suppress_standard = match el.attribute("suppress-standard") {
            Some(value) => asbool(value, location)?,
            None => false,
        };
        let mut theme = None;
        let mut actions = Vec::new();
        for child in el.children().filter(roxmltree::Node::is_element) {
            if child.tag_name().name() == "theme" {
                if theme.is_some() {
                    return Err(Error::syntax("a <rule> can have at most one <theme>", location));
                }
                theme = Some(
                    child
                        .attribute("href")
                        .ok_or_else(|| Error::syntax("<theme> needs an href attribute", location))?
                        .to_string(),
                );
                continue;
            }
            actions.push(Action::parse_xml(child, location)?);
        }
        Ok(Self {
            classes,
            actions,
            theme,
            suppress_standard,
            location: location.to_string(),
        })
    }

    /// 该规则是否对给定的活动 class 生效
    pub fn applies_to(&self, active: &HashSet<String>) -> bool {
        self.classes.iter().any(|class| active.contains(class))
    }

    /// 是否只挂在 default class 上
    pub fn default_only(&self) -> bool {
        self.classes.iter().all(|class| class == DEFAULT_CLASS)
    }

    /// 按声明顺序执行全部动作
    ///
    /// AbortTheme 向上传播，其余动作错误记 warn 后跳过该动作。
    pub fn apply(
        &self,
        content_doc: &NodeRef,
        theme_doc: &NodeRef,
        fetcher: ResourceFetcher<'_>,
        log: &TraceLog,
    ) -> Result<()> {
        let source = format!("<rule class=\"{}\">", self.classes.join(" "));
        for action in &self.actions {
            match action.apply(content_doc, theme_doc, fetcher, log) {
                Ok(()) => {}
                Err(err @ Error::AbortTheme(_)) => return Err(err),
                Err(err) => {
                    log.warn(&source, format!("action {action} failed and was skipped: {err}"));
                }
            }
        }
        Ok(())
    }
}

/// 按配置顺序排列的规则集合
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    /// 没有规则出面时用的缺省主题 URL
    pub default_theme: Option<String>,
}

impl RuleSet {
    /// 算出请求实际生效的 class 集合
    ///
    /// 任一生效规则带 suppress-standard 时，default class 被摘掉，
    /// 纯 default 规则随之失效。
    pub fn active_classes(&self, requested: &HashSet<String>) -> HashSet<String> {
        let mut active = requested.clone();
        let suppress = self
            .rules
            .iter()
            .any(|rule| rule.suppress_standard && rule.applies_to(requested) && !rule.default_only());
        if suppress {
            active.remove(DEFAULT_CLASS);
        }
        active
    }

    /// 求本次请求的主题 URL：第一个出面的规则说了算
    pub fn theme_url(&self, active: &HashSet<String>, log: &TraceLog) -> Option<String> {
        let mut chosen: Option<String> = None;
        for rule in &self.rules {
            if !rule.applies_to(active) {
                continue;
            }
            if let Some(href) = &rule.theme {
                match &chosen {
                    None => chosen = Some(href.clone()),
                    Some(first) => log.warn(
                        &rule.location,
                        format!(
                            "more than one rule sets a theme; keeping theme=\"{first}\" and \
                             ignoring theme=\"{href}\""
                        ),
                    ),
                }
            }
        }
        chosen.or_else(|| self.default_theme.clone())
    }

    /// 对 (内容, 主题) 应用全部生效规则，结束后清掉来源标记
    ///
    /// 返回 `Err(AbortTheme)` 时主题文档可能已被改了一半，
    /// 调用方应当回退到原始主题。
    pub fn apply(
        &self,
        content_doc: &NodeRef,
        theme_doc: &NodeRef,
        fetcher: ResourceFetcher<'_>,
        log: &TraceLog,
        requested_classes: &HashSet<String>,
    ) -> Result<()> {
        let active = self.active_classes(requested_classes);
        for rule in &self.rules {
            if rule.applies_to(&active) {
                rule.apply(content_doc, theme_doc, fetcher, log)?;
            }
        }
        dom::strip_content_markers(theme_doc);
        Ok(())
    }
}
