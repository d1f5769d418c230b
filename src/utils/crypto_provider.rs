use std::sync::Once;

static CRYPTO_PROVIDER_INIT: Once = Once::new();

/// 确保 rustls 加密提供者只安装一次
///
/// 这个函数使用 std::sync::Once 确保无论被调用多少次，
/// ring 提供者的安装只会执行一次
pub fn ensure_crypto_provider_installed() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
        crate::utils::logger::debug!("🔐 rustls ring 加密提供者已安装");
    });
}
