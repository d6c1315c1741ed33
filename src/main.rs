//! reskin - 主题化反向代理的主入口点

use std::error::Error;

use reskin::cli::handle_cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 初始化日志
    env_logger::init();

    // 处理命令行
    handle_cli().await
}
