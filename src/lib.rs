//! 脳MRI画像の腫瘍分類: CNNの学習と推論HTTPサーバー
#![recursion_limit = "256"]

pub mod ml;
pub mod model;
pub mod server;

/// tracing の初期化（RUST_LOG 未指定時は info）
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
