//! 命令行处理

use std::error::Error;

use clap::Parser;

use crate::app::App;
use crate::cli::{Cli, Commands};
use crate::core::config::AppConfig;
use crate::core::proxy::ProxyDest;
use crate::web::routes::create_routes;
use crate::web::server::Server;

/// 解析并执行命令行
pub async fn handle_cli() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config, host, port } => {
            let mut config = AppConfig::load(&config)?;
            if let Some(host) = host {
                config.settings = config.settings.with_host(&host);
            }
            if let Some(port) = port {
                config.settings = config.settings.with_port(port);
            }
            let host = config.settings.host();
            let port = config.settings.port();
            // 阻塞 HTTP 客户端不能在异步上下文里构建
            let app = tokio::task::spawn_blocking(move || App::shared(config)).await??;
            let router = create_routes(app);
            Server::new(&host, port, router)?.run().await?;
            Ok(())
        }
        Commands::Check { config } => {
            let config = AppConfig::load(&config)?;
            println!("configuration OK");
            println!("  listen: {}", config.settings.server_host);
            for proxy in &config.proxy_set.proxies {
                let dest = match &proxy.dest {
                    ProxyDest::Href { template, .. } => template.clone(),
                    ProxyDest::Pyref(pyref) => format!("pyref:{pyref}"),
                    ProxyDest::Next => "next".to_string(),
                };
                println!("  proxy ({}) -> {dest}", proxy.location);
            }
            for rule in &config.proxy_set.ruleset.rules {
                println!(
                    "  rule class=\"{}\" with {} action(s)",
                    rule.classes.join(" "),
                    rule.actions.len()
                );
            }
            if let Some(theme) = &config.proxy_set.ruleset.default_theme {
                println!("  default theme: {theme}");
            }
            Ok(())
        }
    }
}
