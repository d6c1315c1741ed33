//! 错误处理模块
//!
//! 整个引擎共用一个错误枚举：配置期的语法错误是致命的，
//! 请求期的错误全部被包住，客户端总能拿到一个响应。

use std::io;

/// 应用错误类型
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 配置语法错误（启动期致命，带文件与行号）
    #[error("配置语法错误 ({location}): {message}")]
    Syntax { message: String, location: String },
    /// 选择器编译通过但求值结果不合法
    #[error("选择器求值错误: {0}")]
    Selection(String),
    /// 规则以 abort 策略中止主题处理，回退到原始主题
    #[error("主题处理中止: {0}")]
    AbortTheme(String),
    /// 当前代理放弃请求，交给下一个代理
    #[error("代理转发中止: {0}")]
    AbortProxy(String),
    /// URI 模板中引用了未定义的变量
    #[error("URI 模板变量未定义: {0}")]
    Template(String),
    /// 转发过程中的其他错误（映射为 503 响应）
    #[error("代理转发失败: {0}")]
    Proxy(String),
    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] io::Error),
    /// HTTP 请求错误
    #[error("HTTP 错误: {0}")]
    Http(#[from] reqwest::Error),
    /// URL 解析错误
    #[error("URL 解析错误: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// 构造一个语法错误
    pub fn syntax(message: impl Into<String>, location: impl Into<String>) -> Self {
        Error::Syntax {
            message: message.into(),
            location: location.into(),
        }
    }
}

/// 应用结果类型
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display() {
        let err = Error::syntax("unknown element <foo>", "rules.xml:12");
        let text = err.to_string();
        assert!(text.contains("rules.xml:12"));
        assert!(text.contains("unknown element <foo>"));
    }

    #[test]
    fn test_abort_variants_are_distinct() {
        let theme = Error::AbortTheme("no content".to_string());
        let proxy = Error::AbortProxy("dest is next".to_string());
        assert!(matches!(theme, Error::AbortTheme(_)));
        assert!(matches!(proxy, Error::AbortProxy(_)));
    }
}
