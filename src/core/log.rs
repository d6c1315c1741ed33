//! 请求级日志模块
//!
//! 引擎只产生结构化日志事件，落盘与渲染交给 `log` 门面。
//! 每个请求持有一个 `TraceLog`，除常规级别外还带一个可选的
//! describe 叙述通道，用来记录规则执行的人类可读轨迹。

use std::cell::RefCell;

/// 单个请求的日志上下文
pub struct TraceLog {
    /// 请求标识，形如 "GET /blog/post"
    context: String,
    /// 规则轨迹叙述（describe 通道）
    narration: RefCell<Vec<String>>,
    /// 是否收集叙述
    describe_enabled: bool,
}

impl TraceLog {
    /// 创建新的请求日志，describe 通道跟随 debug 级别开关
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            narration: RefCell::new(Vec::new()),
            describe_enabled: log::log_enabled!(log::Level::Debug),
        }
    }

    /// 创建一个总是收集叙述的日志（测试用）
    pub fn capturing(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            narration: RefCell::new(Vec::new()),
            describe_enabled: true,
        }
    }

    pub fn debug(&self, source: &str, message: impl AsRef<str>) {
        log::debug!("[{}] {}: {}", self.context, source, message.as_ref());
    }

    pub fn info(&self, source: &str, message: impl AsRef<str>) {
        log::info!("[{}] {}: {}", self.context, source, message.as_ref());
    }

    pub fn warn(&self, source: &str, message: impl AsRef<str>) {
        log::warn!("[{}] {}: {}", self.context, source, message.as_ref());
    }

    pub fn error(&self, source: &str, message: impl AsRef<str>) {
        log::error!("[{}] {}: {}", self.context, source, message.as_ref());
    }

    /// describe 通道是否打开
    pub fn describe_enabled(&self) -> bool {
        self.describe_enabled
    }

    /// 记录一条规则轨迹叙述
    pub fn describe(&self, text: impl Into<String>) {
        if !self.describe_enabled {
            return;
        }
        let text = text.into();
        log::debug!("[{}] describe: {}", self.context, text);
        self.narration.borrow_mut().push(text);
    }

    /// 取出已收集的叙述
    pub fn narration(&self) -> Vec<String> {
        self.narration.borrow().clone()
    }
}
