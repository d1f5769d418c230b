//! 连接处理器池
//!
//! 池子限定并发连接数的上限（max_threads），空闲处理器被后续
//! 连接复用；周期性清理每次至多销毁一个多余的空闲处理器，
//! 保底留下 min_threads 个。处理器表是引擎里唯一的跨任务
//! 共享可变状态，acquire / cleanup 互斥进行。
//!
//! TLS 配置在建池时加载一次：证书与私钥文件缺一则不启用 TLS。

use std::fs::File;
use std::io::BufReader;
use std::sync::{Arc, Mutex};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, private_key};
use tokio_rustls::TlsAcceptor;

use crate::error::{VoleError, VoleResult};
use crate::server::config::ServerConfig;
use crate::server::connection_handler::ConnectionHandler;
use crate::server::handler::RequestHandler;
use crate::utils::crypto_provider::ensure_crypto_provider_installed;
use crate::utils::logger::{debug, info};

/// 连接处理器池
pub struct ConnectionHandlerPool {
    config: Arc<ServerConfig>,
    handler: Arc<dyn RequestHandler>,
    tls: Option<TlsAcceptor>,
    handlers: Mutex<Vec<ConnectionHandler>>,
}

impl ConnectionHandlerPool {
    /// 建池。配置了证书与私钥时在此一次性加载 TLS。
    pub fn new(
        config: Arc<ServerConfig>,
        handler: Arc<dyn RequestHandler>,
    ) -> VoleResult<Self> {
        let tls = if config.tls_enabled() {
            Some(load_tls_acceptor(&config)?)
        } else {
            None
        };
        Ok(Self {
            config,
            handler,
            tls,
            handlers: Mutex::new(Vec::new()),
        })
    }

    /// 是否启用了 TLS
    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// 取一个空闲处理器并标记为忙。
    ///
    /// 没有空闲处理器且池子未到上限时新建一个；
    /// 到上限时返回 None，调用方必须拒绝这条连接。
    pub fn acquire(&self) -> Option<ConnectionHandler> {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        for handler in handlers.iter() {
            if handler.try_acquire() {
                debug!("🏊 [池] 复用处理器 {}", handler.id());
                return Some(handler.clone());
            }
        }
        if handlers.len() < self.config.max_threads {
            let handler = ConnectionHandler::new(
                self.config.clone(),
                self.tls.clone(),
                self.handler.clone(),
            );
            debug!(
                "🏊 [池] 新建处理器 {} ({}/{})",
                handler.id(),
                handlers.len() + 1,
                self.config.max_threads
            );
            handlers.push(handler.clone());
            return Some(handler);
        }
        None
    }

    /// 周期清理：空闲数量超过 min_threads 时销毁一个空闲处理器。
    ///
    /// 每次只清一个，突发负载下不会抖动。
    pub fn cleanup(&self) {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        let idle = handlers.iter().filter(|h| !h.is_busy()).count();
        if idle > self.config.min_threads {
            if let Some(pos) = handlers.iter().position(|h| !h.is_busy()) {
                let removed = handlers.remove(pos);
                debug!(
                    "🏊 [池] 清理空闲处理器 {} (剩余 {})",
                    removed.id(),
                    handlers.len()
                );
            }
        }
    }

    /// 池内处理器总数
    pub fn len(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// 池子是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 空闲处理器数量
    pub fn idle_count(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|h| !h.is_busy())
            .count()
    }
}

/// 从 PEM 证书与私钥文件构造 TLS 接收器，ALPN 同时通告 h2 与 http/1.1
fn load_tls_acceptor(config: &ServerConfig) -> VoleResult<TlsAcceptor> {
    ensure_crypto_provider_installed();
    let cert_path = config.ssl_cert_file.as_deref().unwrap_or_default();
    let key_path = config.ssl_key_file.as_deref().unwrap_or_default();

    let cert_file = File::open(cert_path)
        .map_err(|e| VoleError::TlsError(format!("打开证书文件 {} 失败: {}", cert_path, e)))?;
    let mut cert_reader = BufReader::new(cert_file);
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| VoleError::TlsError(format!("解析证书失败: {}", e)))?;
    if cert_chain.is_empty() {
        return Err(VoleError::TlsError(format!("证书文件 {} 为空", cert_path)));
    }

    let key_file = File::open(key_path)
        .map_err(|e| VoleError::TlsError(format!("打开私钥文件 {} 失败: {}", key_path, e)))?;
    let mut key_reader = BufReader::new(key_file);
    let key: PrivateKeyDer<'static> = private_key(&mut key_reader)
        .map_err(|e| VoleError::TlsError(format!("解析私钥失败: {}", e)))?
        .ok_or_else(|| VoleError::TlsError(format!("私钥文件 {} 为空", key_path)))?;

    let mut tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| VoleError::TlsError(format!("构造 TLS 配置失败: {}", e)))?;
    tls_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    info!("🔐 [池] TLS 已启用: {}", cert_path);
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
