//! HTTP server bootstrap for the VIN node.
//!
//! This module wires together:
//! - configuration
//! - the platform-agent adapter and key resolution
//! - the startup attestation bound to the signing key
//! - core services (receipt engine, rate limiter, nonce cache, outbound)
//! - the Axum router

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use crate::crypto::sha256;
use crate::infra::{
    Attestation, KeyManager, NodeKeypair, OutboundCaller, ProviderTransport, RateLimiter,
    ReceiptEngine, TeeAdapter, TtlCache,
};

/// Envelope-nonce replay window
const REQUEST_NONCE_TTL: Duration = Duration::from_secs(600);

/// Server configuration.
///
/// These are the only knobs that may change behavior; the provider-host
/// allowlist in particular is compile-time only.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen port
    pub port: u16,
    /// Signing-key persistence path; unset means ephemeral identity
    pub key_path: Option<PathBuf>,
    /// Enables the `?paid=true` payment bypass
    pub test_mode: bool,
    /// Enables the legacy plaintext branch
    pub allow_legacy: bool,
    /// On-chain payment recipient
    pub pay_to: String,
    /// Price in minor units
    pub price_amount: u64,
    /// Settlement network, CAIP-2
    pub network: String,
    /// Platform agent RPC endpoint
    pub platform_agent_url: Option<String>,
    /// Maximum accepted request body size
    pub max_input_size: usize,
    /// Replay-cache capacity (receipts and envelope nonces)
    pub replay_cache_max: usize,
    /// Receipt validity window in seconds
    pub receipt_validity_seconds: u64,
    /// Rate-limiter burst capacity
    pub rate_burst: u32,
    /// Rate-limiter sustained refill per second
    pub rate_per_second: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", 3402),
            key_path: std::env::var("VIN_KEY_PATH").ok().map(PathBuf::from),
            test_mode: env_flag("VIN_TEST_MODE"),
            allow_legacy: env_flag("VIN_ALLOW_LEGACY"),
            pay_to: std::env::var("VIN_PAY_TO")
                .unwrap_or_else(|_| "0x0000000000000000000000000000000000000000".to_string()),
            price_amount: env_parse("VIN_PRICE_AMOUNT", 10_000),
            network: std::env::var("VIN_NETWORK")
                .unwrap_or_else(|_| crate::domain::DEFAULT_NETWORK.to_string()),
            platform_agent_url: std::env::var("PLATFORM_AGENT_URL").ok(),
            max_input_size: env_parse("VIN_MAX_INPUT_SIZE", 1024 * 1024),
            replay_cache_max: env_parse("VIN_REPLAY_CACHE_MAX", 10_000),
            receipt_validity_seconds: env_parse("VIN_RECEIPT_VALIDITY_SECS", 600),
            rate_burst: env_parse("VIN_RATE_BURST", 100),
            rate_per_second: env_parse("VIN_RATE_PER_SECOND", 10),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3402,
            key_path: None,
            test_mode: false,
            allow_legacy: false,
            pay_to: "0x0000000000000000000000000000000000000000".to_string(),
            price_amount: 10_000,
            network: crate::domain::DEFAULT_NETWORK.to_string(),
            platform_agent_url: None,
            max_input_size: 1024 * 1024,
            replay_cache_max: 10_000,
            receipt_validity_seconds: 600,
            rate_burst: 100,
            rate_per_second: 10,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on"))
        .unwrap_or(false)
}

/// Application state shared across handlers.
///
/// Keypairs are read-only after initialization; the mutable maps (replay
/// caches, buckets) each guard their own short critical sections.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub keys: Arc<NodeKeypair>,
    pub attestation: Arc<Attestation>,
    pub provider: Arc<dyn ProviderTransport>,
    pub receipt_engine: Arc<ReceiptEngine>,
    pub rate_limiter: Arc<RateLimiter>,
    pub request_nonces: Arc<TtlCache<String, ()>>,
}

impl AppState {
    pub fn new(
        config: Config,
        keys: NodeKeypair,
        attestation: Attestation,
        provider: Arc<dyn ProviderTransport>,
    ) -> Self {
        let receipt_engine = ReceiptEngine::new(
            Duration::from_secs(config.receipt_validity_seconds),
            config.replay_cache_max,
        );
        let rate_limiter = RateLimiter::new(config.rate_burst, config.rate_per_second);
        let request_nonces = TtlCache::new(config.replay_cache_max, REQUEST_NONCE_TTL);

        Self {
            config: Arc::new(config),
            keys: Arc::new(keys),
            attestation: Arc::new(attestation),
            provider,
            receipt_engine: Arc::new(receipt_engine),
            rate_limiter: Arc::new(rate_limiter),
            request_nonces: Arc::new(request_nonces),
        }
    }
}

/// Start the HTTP server.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting VIN node v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();
    info!("Configuration loaded");
    info!("  Port: {}", config.port);
    info!("  Test mode: {}", config.test_mode);
    info!("  Legacy branch: {}", config.allow_legacy);
    info!("  Platform agent: {:?}", config.platform_agent_url);

    let tee = TeeAdapter::new(config.platform_agent_url.clone());
    let key_manager = KeyManager::resolve(&tee, config.key_path.as_deref()).await?;
    info!("Node keys resolved from {:?}", key_manager.source());
    let keys = key_manager.into_keypair();
    info!("  Node pubkey: {}", keys.node_pubkey_b64url());
    info!("  Encryption pubkey: {}", keys.encryption_pubkey_hex());

    // Bind the runtime attestation to the signing key at startup
    let signing_pubkey = keys.signing().public_key_bytes();
    let attestation = tee
        .attestation(&sha256(&signing_pubkey), Some(&signing_pubkey))
        .await;
    info!(
        "Attestation: type={} available={}",
        attestation.kind, attestation.available
    );

    let listen_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(config, keys, attestation, Arc::new(OutboundCaller::new()));
    let app = build_router(state);

    info!("Listening on {listen_addr}");
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Assemble the router with tracing and panic recovery.
pub fn build_router(state: AppState) -> Router {
    crate::api::router()
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

/// Panics inside handlers become the generic redacted failure; the panic
/// itself is logged by the layer.
fn panic_response(_err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(serde_json::json!({
            "error": {"kind": "generation_failed", "message": "generation failed"}
        })),
    )
        .into_response()
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

// ============================================================================
// Tests
// ============================================================================
