//! 命令行参数解析模块

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// reskin 命令行参数定义
#[derive(Parser)]
#[clap(name = "reskin", about = "主题化反向代理", version)]
pub struct Cli {
    /// 要执行的命令
    #[clap(subcommand)]
    pub command: Commands,
}

/// 可用命令
#[derive(Subcommand)]
pub enum Commands {
    /// 启动代理服务器
    Serve {
        /// 配置文件路径
        #[clap(long, short)]
        config: PathBuf,

        /// 覆盖配置里的监听主机
        #[clap(long)]
        host: Option<String>,

        /// 覆盖配置里的监听端口
        #[clap(long)]
        port: Option<u16>,
    },

    /// 校验配置文件并打印概览
    Check {
        /// 配置文件路径
        #[clap(long, short)]
        config: PathBuf,
    },
}

pub mod handler;

pub use handler::handle_cli;
