//! Web 服务器实现

use std::net::{SocketAddr, ToSocketAddrs};

use axum::Router;

use crate::core::error::{Error, Result};

/// Web 服务器
pub struct Server {
    /// 服务器地址
    address: SocketAddr,
    /// 路由
    router: Router,
}

impl Server {
    /// 创建新的服务器实例
    pub fn new(host: &str, port: u16, router: Router) -> Result<Self> {
        let address = format!("{host}:{port}")
            .to_socket_addrs()
            .map_err(|_| Error::Proxy(format!("invalid listen address {host}:{port}")))?
            .next()
            .ok_or_else(|| Error::Proxy(format!("invalid listen address {host}:{port}")))?;
        Ok(Self { address, router })
    }

    /// 运行服务器
    pub async fn run(self) -> Result<()> {
        log::info!("server starting at http://{}", self.address);
        axum::Server::bind(&self.address)
            .serve(
                self.router
                    .into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .map_err(|err| Error::Proxy(format!("server error: {err}")))
    }
}
