//! URI 模板模块
//!
//! `<dest href="http://{SERVER_NAME}:8080{PATH_INFO}"/>` 这类
//! 目标模板的 `{变量}` 替换。变量来自请求环境、请求头和 here，
//! 渲染时引用未定义变量直接报错。

use crate::core::error::{Error, Result};

/// 渲染模板，`lookup` 按名字给出变量值
pub fn substitute(template: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| Error::Template(format!("unclosed variable in template {template:?}")))?;
        let name = after[..end].trim();
        let value = lookup(name).ok_or_else(|| Error::Template(name.to_string()))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_substitute_mixed_text() {
        let vars = vars(&[("HOST", "backend"), ("PATH_INFO", "/x")]);
        let result = substitute("http://{HOST}:8080{PATH_INFO}", &|name| vars.get(name).cloned());
        assert_eq!(result.unwrap(), "http://backend:8080/x");
    }

    #[test]
    fn test_undefined_variable_is_an_error() {
        let result = substitute("http://{MISSING}/", &|_| None);
        assert!(matches!(result, Err(Error::Template(name)) if name == "MISSING"));
    }

    #[test]
    fn test_unclosed_brace_is_an_error() {
        assert!(substitute("http://{HOST", &|_| Some(String::new())).is_err());
    }

    #[test]
    fn test_no_variables_passthrough() {
        assert_eq!(substitute("http://plain/", &|_| None).unwrap(), "http://plain/");
    }
}
