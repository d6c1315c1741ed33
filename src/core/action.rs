//! 规则动作模块
//!
//! 实现 `<replace>` / `<append>` / `<prepend>` / `<drop>` 四种
//! DOM 变换，以及 nocontent/notheme/manycontent/manytheme
//! 四个错误策略旋钮。动作在配置期解析并做选择器口径的
//! 兼容性检查，请求期对 (内容文档, 主题文档) 求值。

use std::fmt;

use kuchikiki::NodeRef;

use crate::core::config::asbool;
use crate::core::dom;
use crate::core::error::{Error, Result};
use crate::core::log::TraceLog;
use crate::core::selector::{Selector, SelectorKind};

/// 资源抓取回调：按 URL 取回一个解析好的 HTML 文档
pub type ResourceFetcher<'a> = &'a dyn Fn(&str) -> Result<NodeRef>;

/// nocontent / notheme 策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// 静默跳过，只记 debug
    Ignore,
    /// 记一条 warn 后跳过
    Warn,
    /// 抛出 AbortTheme，整个主题回退
    Abort,
}

impl ErrorPolicy {
    /// 解析 nocontent/notheme 属性值，缺省 warn
    pub fn parse(name: &str, value: Option<&str>, location: &str) -> Result<Self> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(ErrorPolicy::Warn),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "ignore" => Ok(ErrorPolicy::Ignore),
                "warn" => Ok(ErrorPolicy::Warn),
                "abort" => Ok(ErrorPolicy::Abort),
                other => Err(Error::syntax(
                    format!("the attribute {name}=\"{other}\" should be one of: ignore, warn, abort"),
                    location,
                )),
            },
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorPolicy::Ignore => "ignore",
            ErrorPolicy::Warn => "warn",
            ErrorPolicy::Abort => "abort",
        })
    }
}

/// 多命中时的兜底取法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    First,
    Last,
}

/// manycontent / manytheme 策略：处理方式 + 兜底取第几个
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManyPolicy {
    pub handler: ErrorPolicy,
    pub fallback: Fallback,
}

impl ManyPolicy {
    /// 解析 manycontent/manytheme 属性值，缺省 warn:first
    pub fn parse(name: &str, value: Option<&str>, location: &str) -> Result<Self> {
        let value = match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => {
                return Ok(ManyPolicy {
                    handler: ErrorPolicy::Warn,
                    fallback: Fallback::First,
                })
            }
            Some(v) => v.to_ascii_lowercase(),
        };
        let (handler, fallback) = match value.as_str() {
            "ignore" => (ErrorPolicy::Ignore, Fallback::First),
            "warn" => (ErrorPolicy::Warn, Fallback::First),
            "abort" => (ErrorPolicy::Abort, Fallback::First),
            "first" => (ErrorPolicy::Ignore, Fallback::First),
            "last" => (ErrorPolicy::Ignore, Fallback::Last),
            "ignore:first" => (ErrorPolicy::Ignore, Fallback::First),
            "ignore:last" => (ErrorPolicy::Ignore, Fallback::Last),
            "warn:first" => (ErrorPolicy::Warn, Fallback::First),
            "warn:last" => (ErrorPolicy::Warn, Fallback::Last),
            other => {
                return Err(Error::syntax(
                    format!(
                        "the attribute {name}=\"{other}\" should be one of: ignore, warn, abort, \
                         first, last, ignore:first, ignore:last, warn:first, warn:last"
                    ),
                    location,
                ))
            }
        };
        Ok(ManyPolicy { handler, fallback })
    }
}

impl fmt::Display for ManyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fallback {
            Fallback::Last => write!(f, "{}:last", self.handler),
            Fallback::First => write!(f, "{}", self.handler),
        }
    }
}

/// 动作种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Replace,
    Append,
    Prepend,
    Drop,
}

impl ActionKind {
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Replace => "replace",
            ActionKind::Append => "append",
            ActionKind::Prepend => "prepend",
            ActionKind::Drop => "drop",
        }
    }
}

/// replace 的 (内容口径, 主题口径) 兼容表
const REPLACE_COMPAT: &[(SelectorKind, SelectorKind)] = &[
    (SelectorKind::Children, SelectorKind::Elements),
    (SelectorKind::Children, SelectorKind::Children),
    (SelectorKind::Elements, SelectorKind::Elements),
    (SelectorKind::Elements, SelectorKind::Children),
    (SelectorKind::Attributes, SelectorKind::Attributes),
    (SelectorKind::Tag, SelectorKind::Tag),
];

/// append / prepend 的兼容表（不含 tag）
const INSERT_COMPAT: &[(SelectorKind, SelectorKind)] = &[
    (SelectorKind::Children, SelectorKind::Elements),
    (SelectorKind::Children, SelectorKind::Children),
    (SelectorKind::Elements, SelectorKind::Elements),
    (SelectorKind::Elements, SelectorKind::Children),
    (SelectorKind::Attributes, SelectorKind::Attributes),
];

/// 属性搬运方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrMode {
    /// replace：点名的属性以内容为准，没点名就整套换掉
    Replace,
    /// append：只补主题缺的，不覆盖
    SetIfAbsent,
    /// prepend：逐个覆盖
    Overwrite,
}

/// 一条规则里的单个动作
#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    pub content: Option<Selector>,
    pub theme: Option<Selector>,
    pub if_content: Option<Selector>,
    pub content_href: Option<String>,
    pub move_content: bool,
    pub nocontent: ErrorPolicy,
    pub notheme: ErrorPolicy,
    pub manycontent: ManyPolicy,
    pub manytheme: ManyPolicy,
}

impl Action {
    /// 构造动作并做口径兼容性检查
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: ActionKind,
        content: Option<Selector>,
        theme: Option<Selector>,
        if_content: Option<Selector>,
        content_href: Option<String>,
        move_content: bool,
        nocontent: ErrorPolicy,
        notheme: ErrorPolicy,
        manycontent: ManyPolicy,
        manytheme: ManyPolicy,
        location: &str,
    ) -> Result<Self> {
        match kind {
            ActionKind::Drop => {
                if content.is_none() && theme.is_none() {
                    return Err(Error::syntax(
                        "<drop> needs at least one of content=\"...\" or theme=\"...\"",
                        location,
                    ));
                }
            }
            _ => {
                let (Some(content_sel), Some(theme_sel)) = (&content, &theme) else {
                    return Err(Error::syntax(
                        format!("<{}> needs both content=\"...\" and theme=\"...\"", kind.name()),
                        location,
                    ));
                };
                let table = match kind {
                    ActionKind::Replace => REPLACE_COMPAT,
                    _ => INSERT_COMPAT,
                };
                for ctype in content_sel.selector_types() {
                    for ttype in theme_sel.selector_types() {
                        if !table.contains(&(ctype, ttype)) {
                            return Err(Error::syntax(
                                format!(
                                    "selector type {ctype} (from content=\"{content_sel}\") and type \
                                     {ttype} (from theme=\"{theme_sel}\") are not compatible"
                                ),
                                location,
                            ));
                        }
                    }
                }
            }
        }
        Ok(Self {
            kind,
            content,
            theme,
            if_content,
            content_href,
            move_content,
            nocontent,
            notheme,
            manycontent,
            manytheme,
        })
    }

    /// 从配置 XML 元素解析一个动作
    pub fn parse_xml(el: roxmltree::Node<'_, '_>, location: &str) -> Result<Self> {
        let kind = match el.tag_name().name() {
            "replace" => ActionKind::Replace,
            "append" => ActionKind::Append,
            "prepend" => ActionKind::Prepend,
            "drop" => ActionKind::Drop,
            other => {
                return Err(Error::syntax(
                    format!("there is no action named <{other}>"),
                    location,
                ))
            }
        };
        let allowed: &[&str] = match kind {
            ActionKind::Drop => &["content", "theme", "if-content", "nocontent", "notheme"],
            _ => &[
                "content",
                "theme",
                "if-content",
                "href",
                "move",
                "nocontent",
                "notheme",
                "manycontent",
                "manytheme",
            ],
        };
        for attr in el.attributes() {
            if !allowed.contains(&attr.name()) {
                return Err(Error::syntax(
                    format!("unknown attribute {}=\"{}\" on <{}>", attr.name(), attr.value(), kind.name()),
                    location,
                ));
            }
        }
        let parse_selector = |name: &str| -> Result<Option<Selector>> {
            el.attribute(name)
                .map(|text| {
                    Selector::parse(text).map_err(|err| Error::syntax(err.to_string(), location))
                })
                .transpose()
        };
        let content = parse_selector("content")?;
        let theme = parse_selector("theme")?;
        let if_content = parse_selector("if-content")?;
        let content_href = el.attribute("href").map(str::to_string);
        let move_content = match el.attribute("move") {
            Some(value) => asbool(value, location)?,
            None => true,
        };
        Action::new(
            kind,
            content,
            theme,
            if_content,
            content_href,
            move_content,
            ErrorPolicy::parse("nocontent", el.attribute("nocontent"), location)?,
            ErrorPolicy::parse("notheme", el.attribute("notheme"), location)?,
            ManyPolicy::parse("manycontent", el.attribute("manycontent"), location)?,
            ManyPolicy::parse("manytheme", el.attribute("manytheme"), location)?,
            location,
        )
    }

    /// 对一对文档执行该动作
    ///
    /// 返回 `Err(AbortTheme)` 表示整个主题处理要回退；其余
    /// 错误（选择器求值、内容抓取）由调用方按"告警并跳过"处理。
    pub fn apply(
        &self,
        content_doc: &NodeRef,
        theme_doc: &NodeRef,
        fetcher: ResourceFetcher<'_>,
        log: &TraceLog,
    ) -> Result<()> {
        match self.kind {
            ActionKind::Drop => self.apply_drop(content_doc, theme_doc, log),
            _ => self.apply_transform(content_doc, theme_doc, fetcher, log),
        }
    }

    fn apply_transform(
        &self,
        content_doc: &NodeRef,
        theme_doc: &NodeRef,
        fetcher: ResourceFetcher<'_>,
        log: &TraceLog,
    ) -> Result<()> {
        let source = self.to_string();
        let fetched;
        let content_doc = match &self.content_href {
            Some(href) => match fetcher(href) {
                Ok(doc) => {
                    fetched = doc;
                    &fetched
                }
                Err(err) => {
                    log.warn(&source, format!("could not fetch href=\"{href}\": {err}"));
                    return Ok(());
                }
            },
            None => content_doc,
        };
        if !self.if_content_matches(content_doc, log)? {
            return Ok(());
        }
        let (Some(content_sel), Some(theme_sel)) = (&self.content, &self.theme) else {
            return Ok(());
        };
        let content = content_sel.select(content_doc)?;
        if content.elements.is_empty() {
            return self.handle_empty("content", content_sel, self.nocontent, log);
        }
        let mut theme = theme_sel.select(theme_doc)?;
        // 已经搬进主题的内容子树不允许再被主题侧选中
        theme.elements.retain(|el| !dom::is_content_element(el));
        if theme.elements.is_empty() {
            return self.handle_empty("theme", theme_sel, self.notheme, log);
        }
        let attributes = join_attributes(&content.attributes, &theme.attributes);
        let theme_el = if theme.elements.len() > 1 {
            match self.manytheme.handler {
                ErrorPolicy::Abort => {
                    return Err(Error::AbortTheme(format!(
                        "{} elements match theme=\"{theme_sel}\"",
                        theme.elements.len()
                    )))
                }
                ErrorPolicy::Warn => log.warn(
                    &source,
                    format!(
                        "{} elements match theme=\"{theme_sel}\", using the {:?} match",
                        theme.elements.len(),
                        self.manytheme.fallback
                    ),
                ),
                ErrorPolicy::Ignore => log.debug(
                    &source,
                    format!("{} elements match theme=\"{theme_sel}\"", theme.elements.len()),
                ),
            }
            match self.manytheme.fallback {
                Fallback::First => theme.elements[0].clone(),
                Fallback::Last => theme.elements[theme.elements.len() - 1].clone(),
            }
        } else {
            theme.elements[0].clone()
        };
        let content_els: Vec<NodeRef> = if !self.move_content
            && matches!(content.kind, SelectorKind::Elements | SelectorKind::Children)
        {
            log.debug(&source, "content elements are being copied into the theme, not moved");
            content.elements.iter().map(dom::deep_clone).collect()
        } else {
            content.elements
        };
        dom::mark_content_elements(&content_els);
        self.apply_transformation(content.kind, &content_els, &attributes, theme.kind, &theme_el, log)
    }

    /// 按主题口径分派具体变换
    fn apply_transformation(
        &self,
        ctype: SelectorKind,
        content_els: &[NodeRef],
        attributes: &[String],
        ttype: SelectorKind,
        theme_el: &NodeRef,
        log: &TraceLog,
    ) -> Result<()> {
        match (self.kind, ttype) {
            (ActionKind::Replace, SelectorKind::Children) => {
                dom::clear_children(theme_el);
                self.move_content_nodes(ctype, content_els, |nodes| {
                    dom::append_all(theme_el, nodes);
                })?;
                self.describe_move(content_els, theme_el, log);
                Ok(())
            }
            (ActionKind::Replace, SelectorKind::Elements) => {
                // 主题元素的 tail 先挪到它前面，替换后文本留在原位
                let tail = dom::detach_tail(theme_el);
                dom::insert_all_before(theme_el, &tail);
                self.move_content_nodes(ctype, content_els, |nodes| {
                    dom::insert_all_before(theme_el, nodes);
                })?;
                theme_el.detach();
                self.describe_move(content_els, theme_el, log);
                Ok(())
            }
            (ActionKind::Replace, SelectorKind::Attributes) => {
                self.transfer_attributes(content_els, attributes, theme_el, AttrMode::Replace, log)
            }
            (ActionKind::Replace, SelectorKind::Tag) => self.replace_tag(content_els, theme_el),
            (ActionKind::Append, SelectorKind::Children) => {
                self.move_content_nodes(ctype, content_els, |nodes| {
                    dom::append_all(theme_el, nodes);
                })?;
                self.describe_move(content_els, theme_el, log);
                Ok(())
            }
            (ActionKind::Prepend, SelectorKind::Children) => {
                self.move_content_nodes(ctype, content_els, |nodes| {
                    dom::prepend_all(theme_el, nodes);
                })?;
                self.describe_move(content_els, theme_el, log);
                Ok(())
            }
            (ActionKind::Append, SelectorKind::Elements) => {
                self.move_content_nodes(ctype, content_els, |nodes| {
                    dom::insert_after_tail(theme_el, nodes);
                })?;
                self.describe_move(content_els, theme_el, log);
                Ok(())
            }
            (ActionKind::Prepend, SelectorKind::Elements) => {
                self.move_content_nodes(ctype, content_els, |nodes| {
                    dom::insert_all_before(theme_el, nodes);
                })?;
                self.describe_move(content_els, theme_el, log);
                Ok(())
            }
            (ActionKind::Append, SelectorKind::Attributes) => {
                self.transfer_attributes(content_els, attributes, theme_el, AttrMode::SetIfAbsent, log)
            }
            (ActionKind::Prepend, SelectorKind::Attributes) => {
                self.transfer_attributes(content_els, attributes, theme_el, AttrMode::Overwrite, log)
            }
            _ => Err(Error::Selection(format!(
                "selector type {ttype} cannot be handled by <{}>",
                self.kind.name()
            ))),
        }
    }

    /// 把内容节点交给 `place` 放进主题
    ///
    /// 口径为 elements 时搬元素本身（tail 文本留在内容文档里）；
    /// 为 children 时搬它们的逻辑孩子，move 时再摘掉空壳父元素。
    fn move_content_nodes(
        &self,
        ctype: SelectorKind,
        content_els: &[NodeRef],
        place: impl FnOnce(&[NodeRef]),
    ) -> Result<()> {
        match ctype {
            SelectorKind::Elements => {
                place(content_els);
                Ok(())
            }
            SelectorKind::Children => {
                let mut nodes = Vec::new();
                for el in content_els {
                    nodes.extend(dom::logical_children(el));
                }
                place(&nodes);
                if self.move_content {
                    for el in content_els {
                        el.detach();
                    }
                }
                Ok(())
            }
            other => Err(Error::Selection(format!(
                "selector type {other} cannot supply nodes for <{}>",
                self.kind.name()
            ))),
        }
    }

    /// manycontent 策略：多个内容元素命中时挑一个
    fn pick_content_element(
        &self,
        content_els: &[NodeRef],
        log: &TraceLog,
    ) -> Result<NodeRef> {
        if content_els.len() > 1 {
            let selector = self
                .content
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            match self.manycontent.handler {
                ErrorPolicy::Abort => {
                    return Err(Error::AbortTheme(format!(
                        "{} elements match content=\"{selector}\"",
                        content_els.len()
                    )))
                }
                ErrorPolicy::Warn => log.warn(
                    &self.to_string(),
                    format!(
                        "{} elements match content=\"{selector}\" (but only one expected), using the {:?} match",
                        content_els.len(),
                        self.manycontent.fallback
                    ),
                ),
                ErrorPolicy::Ignore => log.debug(
                    &self.to_string(),
                    format!("{} elements match content=\"{selector}\"", content_els.len()),
                ),
            }
            return Ok(match self.manycontent.fallback {
                Fallback::First => content_els[0].clone(),
                Fallback::Last => content_els[content_els.len() - 1].clone(),
            });
        }
        Ok(content_els[0].clone())
    }

    /// 属性口径的搬运
    fn transfer_attributes(
        &self,
        content_els: &[NodeRef],
        attributes: &[String],
        theme_el: &NodeRef,
        mode: AttrMode,
        log: &TraceLog,
    ) -> Result<()> {
        let source = self.pick_content_element(content_els, log)?;
        let (Some(theme_data), Some(source_data)) = (theme_el.as_element(), source.as_element())
        else {
            return Err(Error::Selection(
                "attribute selectors must match elements".to_string(),
            ));
        };
        let mut theme_attrs = theme_data.attributes.borrow_mut();
        let mut source_attrs = source_data.attributes.borrow_mut();
        if attributes.is_empty() {
            if mode == AttrMode::Replace {
                theme_attrs.map.clear();
            }
            for (name, attr) in source_attrs.map.iter() {
                if mode == AttrMode::SetIfAbsent && theme_attrs.map.contains_key(name) {
                    continue;
                }
                theme_attrs.map.insert(name.clone(), attr.clone());
            }
            if self.move_content {
                source_attrs.map.clear();
            }
        } else {
            for name in attributes {
                let value = source_attrs.get(name.as_str()).map(str::to_string);
                match mode {
                    AttrMode::Replace | AttrMode::Overwrite => {
                        theme_attrs.remove(name.as_str());
                        if let Some(value) = value {
                            theme_attrs.insert(name.as_str(), value);
                        }
                    }
                    AttrMode::SetIfAbsent => {
                        if let Some(value) = value {
                            if !theme_attrs.contains(name.as_str()) {
                                theme_attrs.insert(name.as_str(), value);
                            }
                        }
                    }
                }
            }
            if self.move_content {
                for name in attributes {
                    source_attrs.remove(name.as_str());
                }
            }
        }
        Ok(())
    }

    /// tag 口径的 replace：主题元素换成内容元素的标签和属性，孩子不动
    fn replace_tag(&self, content_els: &[NodeRef], theme_el: &NodeRef) -> Result<()> {
        let source = &content_els[0];
        let Some(source_data) = source.as_element() else {
            return Err(Error::Selection("tag selectors must match elements".to_string()));
        };
        let new_el = NodeRef::new_element(
            source_data.name.clone(),
            source_data
                .attributes
                .borrow()
                .map
                .iter()
                .map(|(name, attr)| (name.clone(), attr.clone())),
        );
        for child in dom::logical_children(theme_el) {
            child.detach();
            new_el.append(child);
        }
        theme_el.insert_before(new_el);
        theme_el.detach();
        Ok(())
    }

    fn apply_drop(&self, content_doc: &NodeRef, theme_doc: &NodeRef, log: &TraceLog) -> Result<()> {
        if !self.if_content_matches(content_doc, log)? {
            return Ok(());
        }
        let sides: [(&str, &Option<Selector>, ErrorPolicy, &NodeRef, bool); 2] = [
            ("theme", &self.theme, self.notheme, theme_doc, true),
            ("content", &self.content, self.nocontent, content_doc, false),
        ];
        for (side, selector, policy, doc, is_theme) in sides {
            let Some(selector) = selector else { continue };
            let mut selection = selector.select(doc)?;
            if is_theme {
                selection.elements.retain(|el| !dom::is_content_element(el));
            }
            if selection.elements.is_empty() {
                return self.handle_empty(side, selector, policy, log);
            }
            match selection.kind {
                SelectorKind::Elements => {
                    for el in &selection.elements {
                        // tail 文本留在原位
                        el.detach();
                    }
                }
                SelectorKind::Children => {
                    for el in &selection.elements {
                        dom::clear_children(el);
                    }
                }
                SelectorKind::Attributes => {
                    for el in &selection.elements {
                        let Some(data) = el.as_element() else { continue };
                        let mut attrs = data.attributes.borrow_mut();
                        if selection.attributes.is_empty() {
                            attrs.map.clear();
                        } else {
                            for name in &selection.attributes {
                                attrs.remove(name.as_str());
                            }
                        }
                    }
                }
                SelectorKind::Tag => {
                    // 解包：孩子原位顶替元素本身
                    for el in &selection.elements {
                        let children = dom::logical_children(el);
                        dom::insert_all_before(el, &children);
                        el.detach();
                    }
                }
            }
            if log.describe_enabled() {
                log.describe(format!(
                    "Rule {self} dropped {} {side} node(s) matching {side}=\"{selector}\"",
                    selection.elements.len()
                ));
            }
        }
        Ok(())
    }

    /// if-content 守卫：不命中（结合取反标志）就静默跳过
    fn if_content_matches(&self, content_doc: &NodeRef, log: &TraceLog) -> Result<bool> {
        let Some(selector) = &self.if_content else {
            return Ok(true);
        };
        let selection = selector.select(content_doc)?;
        let matched = match selection.kind {
            SelectorKind::Elements | SelectorKind::Tag => !selection.elements.is_empty(),
            SelectorKind::Children => selection.elements.iter().any(dom::element_has_content),
            SelectorKind::Attributes => selection.elements.iter().any(|el| {
                let Some(data) = el.as_element() else { return false };
                let attrs = data.attributes.borrow();
                if selection.attributes.is_empty() {
                    !attrs.map.is_empty()
                } else {
                    selection.attributes.iter().any(|name| attrs.contains(name.as_str()))
                }
            }),
        };
        if matched == selector.inverted() {
            log.debug(
                &self.to_string(),
                format!("skipping rule because if-content=\"{selector}\" does not match"),
            );
            if log.describe_enabled() {
                log.describe(format!(
                    "skipping rule {self} because if-content=\"{selector}\" does not match anything"
                ));
            }
            return Ok(false);
        }
        Ok(true)
    }

    /// 某侧选择器没有命中时按策略收场
    fn handle_empty(
        &self,
        side: &str,
        selector: &Selector,
        policy: ErrorPolicy,
        log: &TraceLog,
    ) -> Result<()> {
        let source = self.to_string();
        match policy {
            ErrorPolicy::Abort => {
                log.debug(
                    &source,
                    format!("aborting theme because no {side} matches {side}=\"{selector}\""),
                );
                Err(Error::AbortTheme(format!("no {side} matches {side}=\"{selector}\"")))
            }
            other => {
                let message = format!("skipping rule because no {side} matches {side}=\"{selector}\"");
                match other {
                    ErrorPolicy::Ignore => log.debug(&source, &message),
                    _ => log.warn(&source, &message),
                }
                if log.describe_enabled() {
                    log.describe(format!(
                        "skipping rule {self} because {side}=\"{selector}\" does not match anything"
                    ));
                }
                Ok(())
            }
        }
    }

    fn describe_move(&self, content_els: &[NodeRef], theme_el: &NodeRef, log: &TraceLog) {
        if !log.describe_enabled() {
            return;
        }
        let names: Vec<String> = content_els
            .iter()
            .filter_map(dom::element_name)
            .collect();
        log.describe(format!(
            "Rule {self} moved {} into element {}",
            names.join(", "),
            dom::element_name(theme_el).unwrap_or_default()
        ));
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.kind.name())?;
        if let Some(content) = &self.content {
            write!(f, " content=\"{content}\"")?;
        }
        if let Some(href) = &self.content_href {
            write!(f, " href=\"{href}\"")?;
        }
        if !self.move_content {
            write!(f, " move=\"0\"")?;
        }
        if let Some(theme) = &self.theme {
            write!(f, " theme=\"{theme}\"")?;
        }
        if self.nocontent != ErrorPolicy::Warn {
            write!(f, " nocontent=\"{}\"", self.nocontent)?;
        }
        if self.notheme != ErrorPolicy::Warn {
            write!(f, " notheme=\"{}\"", self.notheme)?;
        }
        let default_many = ManyPolicy {
            handler: ErrorPolicy::Warn,
            fallback: Fallback::First,
        };
        if self.manycontent != default_many {
            write!(f, " manycontent=\"{}\"", self.manycontent)?;
        }
        if self.manytheme != default_many {
            write!(f, " manytheme=\"{}\"", self.manytheme)?;
        }
        write!(f, " />")
    }
}

/// 合并两侧点名的属性集合（任一侧为空表示"全部"则以另一侧为准）
fn join_attributes(content: &[String], theme: &[String]) -> Vec<String> {
    let mut joined: Vec<String> = content.to_vec();
    for name in theme {
        if !joined.contains(name) {
            joined.push(name.clone());
        }
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dom::{get_attribute, parse_document, serialize, CONTENT_MARKER};

    fn fetcher_unused(_: &str) -> Result<NodeRef> {
        Err(Error::Proxy("no fetcher in this test".to_string()))
    }

    fn action(kind: ActionKind, content: &str, theme: &str) -> Action {
        build_action(kind, Some(content), Some(theme), |a| a)
    }

    fn build_action(
        kind: ActionKind,
        content: Option<&str>,
        theme: Option<&str>,
        tweak: impl FnOnce(Action) -> Action,
    ) -> Action {
        let parse = |text: Option<&str>| text.map(|t| Selector::parse(t).unwrap());
        let action = Action::new(
            kind,
            parse(content),
            parse(theme),
            None,
            None,
            true,
            ErrorPolicy::Warn,
            ErrorPolicy::Warn,
            ManyPolicy { handler: ErrorPolicy::Warn, fallback: Fallback::First },
            ManyPolicy { handler: ErrorPolicy::Warn, fallback: Fallback::First },
            "test",
        )
        .unwrap();
        tweak(action)
    }

    fn apply(action: &Action, content: &str, theme: &str) -> (NodeRef, NodeRef, Result<()>) {
        let content_doc = parse_document(content);
        let theme_doc = parse_document(theme);
        let log = TraceLog::capturing("test");
        let result = action.apply(&content_doc, &theme_doc, &fetcher_unused, &log);
        crate::core::dom::strip_content_markers(&theme_doc);
        (content_doc, theme_doc, result)
    }

    fn body_html(doc: &NodeRef) -> String {
        serialize(doc.select_first("body").unwrap().as_node())
    }

    #[test]
    fn test_policy_parse_defaults() {
        assert_eq!(ErrorPolicy::parse("nocontent", None, "t").unwrap(), ErrorPolicy::Warn);
        let many = ManyPolicy::parse("manytheme", None, "t").unwrap();
        assert_eq!(many.handler, ErrorPolicy::Warn);
        assert_eq!(many.fallback, Fallback::First);
    }

    #[test]
    fn test_policy_parse_shorthands() {
        let last = ManyPolicy::parse("manytheme", Some("last"), "t").unwrap();
        assert_eq!(last.handler, ErrorPolicy::Ignore);
        assert_eq!(last.fallback, Fallback::Last);
        let warn_last = ManyPolicy::parse("manytheme", Some("warn:last"), "t").unwrap();
        assert_eq!(warn_last.handler, ErrorPolicy::Warn);
        assert_eq!(warn_last.fallback, Fallback::Last);
        assert!(ManyPolicy::parse("manytheme", Some("abort:first"), "t").is_err());
        assert!(ErrorPolicy::parse("nocontent", Some("explode"), "t").is_err());
    }

    #[test]
    fn test_incompatible_selector_kinds_rejected() {
        let content = Selector::parse("attributes:body").unwrap();
        let theme = Selector::parse("children:body").unwrap();
        let err = Action::new(
            ActionKind::Replace,
            Some(content),
            Some(theme),
            None,
            None,
            true,
            ErrorPolicy::Warn,
            ErrorPolicy::Warn,
            ManyPolicy { handler: ErrorPolicy::Warn, fallback: Fallback::First },
            ManyPolicy { handler: ErrorPolicy::Warn, fallback: Fallback::First },
            "rules.xml:3",
        );
        assert!(matches!(err, Err(Error::Syntax { .. })));
    }

    #[test]
    fn test_tag_not_allowed_for_append() {
        let content = Selector::parse("tag:div").unwrap();
        let theme = Selector::parse("tag:div").unwrap();
        let err = Action::new(
            ActionKind::Append,
            Some(content),
            Some(theme),
            None,
            None,
            true,
            ErrorPolicy::Warn,
            ErrorPolicy::Warn,
            ManyPolicy { handler: ErrorPolicy::Warn, fallback: Fallback::First },
            ManyPolicy { handler: ErrorPolicy::Warn, fallback: Fallback::First },
            "t",
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_append_children_into_empty_body() {
        let act = action(ActionKind::Append, "children:body", "children:body");
        let (_, theme, result) = apply(
            &act,
            "<html><body><p>Hi</p></body></html>",
            "<html><body></body></html>",
        );
        result.unwrap();
        assert_eq!(body_html(&theme), "<body><p>Hi</p></body>");
    }

    #[test]
    fn test_replace_children_empties_theme_first() {
        let act = action(ActionKind::Replace, "children:body", "children:#main");
        let (_, theme, result) = apply(
            &act,
            "<html><body>intro <b>x</b> outro</body></html>",
            "<html><body><div id=\"main\">old <i>stuff</i></div></body></html>",
        );
        result.unwrap();
        assert_eq!(
            body_html(&theme),
            "<body><div id=\"main\">intro <b>x</b> outro</div></body>"
        );
    }

    #[test]
    fn test_replace_elements_keeps_theme_tail_in_place() {
        let act = action(ActionKind::Replace, "#new", "#old");
        let (_, theme, result) = apply(
            &act,
            "<html><body><div id=\"new\">n</div></body></html>",
            "<html><body>a<span id=\"old\">o</span>b<i>c</i></body></html>",
        );
        result.unwrap();
        assert_eq!(body_html(&theme), "<body>ab<div id=\"new\">n</div><i>c</i></body>");
    }

    #[test]
    fn test_move_leaves_content_tail_behind() {
        let act = action(ActionKind::Append, "#x", "children:body");
        let (content, _, result) = apply(
            &act,
            "<html><body><p>a<span id=\"x\">b</span>tail<i>c</i></p></body></html>",
            "<html><body></body></html>",
        );
        result.unwrap();
        // 被搬走的元素不在了，tail 文本留在原位
        assert_eq!(body_html(&content), "<body><p>atail<i>c</i></p></body>");
    }

    #[test]
    fn test_move_false_copies_instead() {
        let act = build_action(ActionKind::Append, Some("#x"), Some("children:body"), |mut a| {
            a.move_content = false;
            a
        });
        let before = "<html><body><p>a<span id=\"x\">b</span>c</p></body></html>";
        let (content, theme, result) = apply(&act, before, "<html><body></body></html>");
        result.unwrap();
        assert_eq!(body_html(&content), "<body><p>a<span id=\"x\">b</span>c</p></body>");
        crate::core::dom::strip_content_markers(&content);
        assert_eq!(body_html(&theme), "<body><span id=\"x\">b</span></body>");
    }

    #[test]
    fn test_replace_named_attributes_keeps_others() {
        let act = action(
            ActionKind::Replace,
            "attributes(class):body",
            "attributes(class):body",
        );
        let (content, theme, result) = apply(
            &act,
            "<html><body class=\"b\"></body></html>",
            "<html><body class=\"a\" id=\"t\"></body></html>",
        );
        result.unwrap();
        let body = theme.select_first("body").unwrap().as_node().clone();
        assert_eq!(get_attribute(&body, "class").as_deref(), Some("b"));
        assert_eq!(get_attribute(&body, "id").as_deref(), Some("t"));
        // move 缺省为真：内容侧的属性被摘走
        let content_body = content.select_first("body").unwrap().as_node().clone();
        assert_eq!(get_attribute(&content_body, "class"), None);
    }

    #[test]
    fn test_append_attributes_does_not_overwrite() {
        let act = action(ActionKind::Append, "attributes:body", "attributes:body");
        let (_, theme, result) = apply(
            &act,
            "<html><body class=\"new\" lang=\"en\"></body></html>",
            "<html><body class=\"old\"></body></html>",
        );
        result.unwrap();
        let body = theme.select_first("body").unwrap().as_node().clone();
        assert_eq!(get_attribute(&body, "class").as_deref(), Some("old"));
        assert_eq!(get_attribute(&body, "lang").as_deref(), Some("en"));
    }

    #[test]
    fn test_prepend_attributes_overwrites() {
        let act = action(ActionKind::Prepend, "attributes:body", "attributes:body");
        let (_, theme, result) = apply(
            &act,
            "<html><body class=\"new\"></body></html>",
            "<html><body class=\"old\" id=\"kept\"></body></html>",
        );
        result.unwrap();
        let body = theme.select_first("body").unwrap().as_node().clone();
        assert_eq!(get_attribute(&body, "class").as_deref(), Some("new"));
        assert_eq!(get_attribute(&body, "id").as_deref(), Some("kept"));
    }

    #[test]
    fn test_replace_tag_keeps_children() {
        let act = action(ActionKind::Replace, "tag:#src", "tag:#dst");
        let (_, theme, result) = apply(
            &act,
            "<html><body><section id=\"src\" class=\"wide\">ignored</section></body></html>",
            "<html><body><div id=\"dst\" class=\"old\"><p>kept</p></div>t</body></html>",
        );
        result.unwrap();
        // 属性按名字排序序列化
        assert_eq!(
            body_html(&theme),
            "<body><section class=\"wide\" id=\"src\"><p>kept</p></section>t</body>"
        );
    }

    #[test]
    fn test_drop_unwraps_by_tag() {
        let act = build_action(ActionKind::Drop, None, Some("tag:span"), |a| a);
        let (_, theme, result) = apply(
            &act,
            "<html><body></body></html>",
            "<html><body><p>x<span>y</span>z</p></body></html>",
        );
        result.unwrap();
        assert_eq!(body_html(&theme), "<body><p>xyz</p></body>");
    }

    #[test]
    fn test_drop_elements_keeps_tail_text() {
        let act = build_action(ActionKind::Drop, None, Some(".ad"), |a| a);
        let (_, theme, result) = apply(
            &act,
            "<html><body></body></html>",
            "<html><body>a<div class=\"ad\">buy</div>b</body></html>",
        );
        result.unwrap();
        assert_eq!(body_html(&theme), "<body>ab</body>");
    }

    #[test]
    fn test_drop_children_and_attributes() {
        let act = build_action(ActionKind::Drop, None, Some("children:#main"), |a| a);
        let (_, theme, result) = apply(
            &act,
            "<html><body></body></html>",
            "<html><body><div id=\"main\">x<b>y</b></div></body></html>",
        );
        result.unwrap();
        assert_eq!(body_html(&theme), "<body><div id=\"main\"></div></body>");

        let act = build_action(ActionKind::Drop, None, Some("attributes(class):div"), |a| a);
        let (_, theme, result) = apply(
            &act,
            "<html><body></body></html>",
            "<html><body><div class=\"x\" id=\"keep\"></div></body></html>",
        );
        result.unwrap();
        let div = theme.select_first("div").unwrap().as_node().clone();
        assert_eq!(get_attribute(&div, "class"), None);
        assert_eq!(get_attribute(&div, "id").as_deref(), Some("keep"));
    }

    #[test]
    fn test_nocontent_abort_raises() {
        let act = build_action(ActionKind::Replace, Some("#missing"), Some("children:body"), |mut a| {
            a.nocontent = ErrorPolicy::Abort;
            a
        });
        let (_, _, result) = apply(
            &act,
            "<html><body></body></html>",
            "<html><body></body></html>",
        );
        assert!(matches!(result, Err(Error::AbortTheme(_))));
    }

    #[test]
    fn test_nocontent_ignore_skips_quietly() {
        let act = build_action(ActionKind::Replace, Some("#missing"), Some("children:body"), |mut a| {
            a.nocontent = ErrorPolicy::Ignore;
            a
        });
        let theme_before = "<html><body>keep</body></html>";
        let (_, theme, result) = apply(&act, "<html><body></body></html>", theme_before);
        result.unwrap();
        assert_eq!(body_html(&theme), "<body>keep</body>");
    }

    #[test]
    fn test_manytheme_first_and_last() {
        for (value, expect) in [("warn:first", "<p class=\"t\">Hi</p>x"), ("warn:last", "x<p class=\"t\">Hi</p>")] {
            let act = build_action(
                ActionKind::Replace,
                Some("children:body"),
                Some("children:.t"),
                |mut a| {
                    a.manytheme = ManyPolicy::parse("manytheme", Some(value), "t").unwrap();
                    a
                },
            );
            let (_, theme, result) = apply(
                &act,
                "<html><body>Hi</body></html>",
                "<html><body><p class=\"t\"></p>x<p class=\"t\"></p></body></html>",
            );
            result.unwrap();
            let html = body_html(&theme);
            let expected = if expect.starts_with('<') {
                "<body><p class=\"t\">Hi</p>x<p class=\"t\"></p></body>"
            } else {
                "<body><p class=\"t\"></p>x<p class=\"t\">Hi</p></body>"
            };
            assert_eq!(html, expected, "manytheme={value}");
        }
    }

    #[test]
    fn test_manytheme_abort() {
        let act = build_action(
            ActionKind::Replace,
            Some("children:body"),
            Some("children:p"),
            |mut a| {
                a.manytheme = ManyPolicy { handler: ErrorPolicy::Abort, fallback: Fallback::First };
                a
            },
        );
        let (_, _, result) = apply(
            &act,
            "<html><body>Hi</body></html>",
            "<html><body><p></p><p></p></body></html>",
        );
        assert!(matches!(result, Err(Error::AbortTheme(_))));
    }

    #[test]
    fn test_if_content_guard_and_inversion() {
        let guarded = build_action(ActionKind::Append, Some("children:body"), Some("children:body"), |mut a| {
            a.if_content = Some(Selector::parse("#flag").unwrap());
            a
        });
        let (_, theme, result) = apply(
            &guarded,
            "<html><body>Hi</body></html>",
            "<html><body></body></html>",
        );
        result.unwrap();
        assert_eq!(body_html(&theme), "<body></body>");

        let inverted = build_action(ActionKind::Append, Some("children:body"), Some("children:body"), |mut a| {
            a.if_content = Some(Selector::parse("not:#flag").unwrap());
            a
        });
        let (_, theme, result) = apply(
            &inverted,
            "<html><body>Hi</body></html>",
            "<html><body></body></html>",
        );
        result.unwrap();
        assert_eq!(body_html(&theme), "<body>Hi</body>");
    }

    #[test]
    fn test_theme_selector_skips_content_origin_elements() {
        let act = action(ActionKind::Append, "p.item", "children:#box");
        let content_doc = parse_document(
            "<html><body><p class=\"item\">one</p><p class=\"item\">two</p></body></html>",
        );
        let theme_doc = parse_document("<html><body><div id=\"box\"></div></body></html>");
        let log = TraceLog::capturing("test");
        act.apply(&content_doc, &theme_doc, &fetcher_unused, &log).unwrap();
        // 第二次应用：主题侧的 p 选择器不得命中刚搬进来的内容节点
        let second = action(ActionKind::Drop, "p", "p");
        let second = Action { content: None, ..second };
        second.apply(&content_doc, &theme_doc, &fetcher_unused, &log).unwrap();
        crate::core::dom::strip_content_markers(&theme_doc);
        assert_eq!(
            body_html(&theme_doc),
            "<body><div id=\"box\"><p class=\"item\">one</p><p class=\"item\">two</p></div></body>"
        );
        assert!(!serialize(&theme_doc).contains(CONTENT_MARKER));
    }

    #[test]
    fn test_parse_xml_round_trip() {
        let xml = r##"<replace content="children:body" theme="#main" notheme="abort" move="0"/>"##;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let act = Action::parse_xml(doc.root_element(), "rules.xml:1").unwrap();
        assert_eq!(act.kind, ActionKind::Replace);
        assert!(!act.move_content);
        assert_eq!(act.notheme, ErrorPolicy::Abort);
        assert_eq!(act.nocontent, ErrorPolicy::Warn);
    }

    #[test]
    fn test_parse_xml_rejects_unknown_attribute() {
        let xml = r#"<append content="body" theme="body" colour="red"/>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        assert!(Action::parse_xml(doc.root_element(), "rules.xml:9").is_err());
    }

    #[test]
    fn test_drop_needs_some_selector() {
        let xml = r#"<drop/>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        assert!(Action::parse_xml(doc.root_element(), "rules.xml:2").is_err());
    }
}
