use std::env;
use std::sync::LazyLock;

fn required_env(key: &str) -> String {
  env::var(key).unwrap_or_else(|_| panic!("env {key} must be set"))
}

fn optional_env(key: &str, default: &str) -> String {
  env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn optional_env_u64(key: &str, default: u64) -> u64 {
  env::var(key)
    .ok()
    .and_then(|v| v.parse().ok())
    .unwrap_or(default)
}

/// Process-wide configuration, read once from the environment (+ `.env`).
///
/// `0` for `analysis_rpm`/`embed_rpm` means "auto" — the rate/latency
/// controllers own the cap. A positive value pins a fixed RPM and the
/// controllers are not started for that workload.
pub struct AppEnv {
  pub source_chat_db: String,
  pub app_dir: String,
  pub analysis_rpm: u64,
  pub embed_rpm: u64,
  pub analysis_model: String,
  pub embed_model: String,
  pub api_key: String,
  pub api_base_url: String,
  pub worker_count: u64,
  pub lease_ttl_seconds: u64,
  pub poll_interval_ms: u64,
  pub tx_batch_size: u64,
  pub tx_flush_interval_ms: u64,
  pub gap_threshold_seconds: u64,
  pub lookback_rows: u64,
}

impl AppEnv {
  fn new() -> Self {
    dotenvy::dotenv().ok();

    Self {
      source_chat_db: optional_env("SOURCE_CHAT_DB", "chat.db"),
      app_dir: optional_env("APP_DIR", "."),
      analysis_rpm: optional_env_u64("ANALYSIS_RPM", 0),
      embed_rpm: optional_env_u64("EMBED_RPM", 0),
      analysis_model: optional_env("ANALYSIS_MODEL", "gemini-1.5-pro"),
      embed_model: optional_env("EMBED_MODEL", "text-embedding-004"),
      api_key: required_env("API_KEY"),
      api_base_url: optional_env("API_BASE_URL", "https://api.openai.com/v1"),
      worker_count: optional_env_u64("WORKER_COUNT", 8),
      lease_ttl_seconds: optional_env_u64("LEASE_TTL_SECONDS", 300),
      poll_interval_ms: optional_env_u64("POLL_INTERVAL_MS", 500),
      tx_batch_size: optional_env_u64("TX_BATCH_SIZE", 32),
      tx_flush_interval_ms: optional_env_u64("TX_FLUSH_INTERVAL_MS", 50),
      gap_threshold_seconds: optional_env_u64("GAP_THRESHOLD_SECONDS", 10_800),
      lookback_rows: optional_env_u64("LOOKBACK_ROWS", 5_000),
    }
  }
}

pub static APP_ENV: LazyLock<AppEnv> = LazyLock::new(AppEnv::new);
