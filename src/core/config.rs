//! 配置解析模块
//!
//! XML 形状的配置文件：根元素 `<reskin>`，下面是
//! `<server-settings>`、`<proxy>`（顺序敏感）、`<rule>`
//! （顺序敏感）和可选的缺省 `<theme>`。语法错误在启动期
//! 就报出来，并带上文件与行号。

use std::fs;
use std::path::Path;

use crate::core::error::{Error, Result};
use crate::core::proxy::{Proxy, ProxySet};
use crate::core::rule::{Rule, RuleSet};
use crate::core::settings::ProxySettings;

/// 解析布尔属性/文本（1/true/yes/on 与 0/false/no/off）
pub fn asbool(value: &str, location: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::syntax(
            format!("cannot interpret {other:?} as a boolean"),
            location,
        )),
    }
}

/// 元素在配置文件里的位置，形如 "proxy.xml:12"
pub fn node_location(file: &str, node: &roxmltree::Node<'_, '_>) -> String {
    let pos = node.document().text_pos_at(node.range().start);
    format!("{file}:{}", pos.row)
}

/// 整套解析好的配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub settings: ProxySettings,
    pub proxy_set: ProxySet,
    /// 配置文件所在目录，URI 模板里的 here 变量
    pub here: String,
}

impl AppConfig {
    /// 解析配置文本；`file` 只用来报位置
    pub fn parse(xml: &str, file: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|err| Error::syntax(format!("invalid XML: {err}"), file))?;
        let root = doc.root_element();
        if root.tag_name().name() != "reskin" {
            return Err(Error::syntax(
                format!(
                    "expected <reskin> as the root element, found <{}>",
                    root.tag_name().name()
                ),
                node_location(file, &root),
            ));
        }
        let here = Path::new(file)
            .parent()
            .map(|dir| dir.to_string_lossy().into_owned())
            .filter(|dir| !dir.is_empty())
            .unwrap_or_else(|| ".".to_string());
        let mut settings = ProxySettings::default();
        let mut proxies = Vec::new();
        let mut rules = Vec::new();
        let mut default_theme: Option<String> = None;
        for child in root.children().filter(roxmltree::Node::is_element) {
            let location = node_location(file, &child);
            match child.tag_name().name() {
                "server-settings" => settings = ProxySettings::parse_xml(child, file)?,
                "proxy" => proxies.push(Proxy::parse_xml(child, file, &here)?),
                "rule" => rules.push(Rule::parse_xml(child, &location)?),
                "theme" => {
                    if default_theme.is_some() {
                        return Err(Error::syntax(
                            "you cannot have more than one default <theme>",
                            location,
                        ));
                    }
                    default_theme = Some(
                        child
                            .attribute("href")
                            .ok_or_else(|| Error::syntax("<theme> needs an href attribute", &location))?
                            .to_string(),
                    );
                }
                other => {
                    return Err(Error::syntax(
                        format!("unknown element <{other}> in <reskin>"),
                        location,
                    ))
                }
            }
        }
        let ruleset = RuleSet {
            rules,
            default_theme,
        };
        Ok(Self {
            settings,
            proxy_set: ProxySet::new(proxies, ruleset),
            here,
        })
    }

    /// 从磁盘读配置
    pub fn load(path: &Path) -> Result<Self> {
        let xml = fs::read_to_string(path)?;
        Self::parse(&xml, &path.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<reskin>
    <server-settings>
        <server>127.0.0.1:8000</server>
    </server-settings>
    <theme href="/theme.html"/>
    <proxy>
        <path>/blog</path>
        <dest href="http://blog.internal:8080/"/>
        <response rewrite-links="1"/>
    </proxy>
    <proxy>
        <dest href="http://www.internal/"/>
    </proxy>
    <rule>
        <replace content="children:body" theme="children:body"/>
    </rule>
</reskin>"#;

    #[test]
    fn test_parse_sample_config() {
        let config = AppConfig::parse(SAMPLE, "/etc/reskin/proxy.xml").unwrap();
        assert_eq!(config.settings.server_host, "127.0.0.1:8000");
        assert_eq!(config.proxy_set.proxies.len(), 2);
        assert_eq!(config.proxy_set.ruleset.rules.len(), 1);
        assert_eq!(
            config.proxy_set.ruleset.default_theme.as_deref(),
            Some("/theme.html")
        );
        assert_eq!(config.here, "/etc/reskin");
    }

    #[test]
    fn test_wrong_root_element() {
        let err = AppConfig::parse("<misconfigured/>", "x.xml").unwrap_err();
        assert!(err.to_string().contains("reskin"));
    }

    #[test]
    fn test_unknown_element_names_the_line() {
        let xml = "<reskin>\n  <mystery/>\n</reskin>";
        let err = AppConfig::parse(xml, "conf.xml").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("mystery"));
        assert!(text.contains("conf.xml:2"));
    }

    #[test]
    fn test_asbool_values() {
        assert!(asbool("1", "t").unwrap());
        assert!(asbool("Yes", "t").unwrap());
        assert!(!asbool("off", "t").unwrap());
        assert!(!asbool("", "t").unwrap());
        assert!(asbool("maybe", "t").is_err());
    }
}
