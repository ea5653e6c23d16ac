//! Environment-driven configuration, following the teacher's `Config::from_env()`
//! idiom: `dotenv` bootstrap, then `std::env::var(KEY).unwrap_or(default).parse()`
//! per field.

#[derive(Debug, Clone)]
pub struct Config {
    pub dry_run: bool,
    pub starting_balance_usd: f64,
    pub max_drawdown_usd: f64,

    pub max_trade_size_usd: f64,
    pub daily_volume_cap_usd: f64,
    pub max_open_positions: usize,
    pub max_per_market_usd: f64,
    pub max_portfolio_exposure_usd: f64,

    pub arb_min_profit_cents: f64,
    pub arb_scan_interval_sec: f64,

    pub lp_order_size_usd: f64,
    pub lp_refresh_interval_sec: f64,
    pub lp_max_markets: usize,
    pub lp_min_daily_reward: f64,
    pub lp_min_estimated_reward: f64,
    pub lp_min_best_bid: f64,
    pub lp_stop_loss_pct: f64,

    pub lp_flip_order_size_usd: f64,
    pub lp_flip_scan_interval_sec: f64,
    pub lp_flip_poll_interval_sec: f64,
    pub lp_flip_max_resting_sec: f64,
    pub lp_flip_stop_loss_pct: f64,

    pub copy_traders: Vec<String>,
    pub copy_scale_factor: f64,
    pub copy_poll_interval_sec: f64,
    pub copy_min_trade_usd: f64,
    pub copy_max_delay_sec: f64,

    pub synth_edge_threshold: f64,
    pub synth_assets: Vec<String>,
    pub synth_poll_interval_sec: f64,
    pub synth_kelly_fraction: f64,

    pub timing_jitter_pct: f64,
    pub size_jitter_pct: f64,

    pub db_path: String,
    pub log_level: String,

    pub tick_size: f64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            dry_run: env_or("DRY_RUN", true),
            starting_balance_usd: env_or("STARTING_BALANCE_USD", 1000.0),
            max_drawdown_usd: env_or("MAX_DRAWDOWN_USD", 250.0),

            max_trade_size_usd: env_or("MAX_TRADE_SIZE_USD", 25.0),
            daily_volume_cap_usd: env_or("DAILY_VOLUME_CAP_USD", 500.0),
            max_open_positions: env_or("MAX_OPEN_POSITIONS", 20usize),
            max_per_market_usd: env_or("MAX_PER_MARKET_USD", 100.0),
            max_portfolio_exposure_usd: env_or("MAX_PORTFOLIO_EXPOSURE_USD", 800.0),

            arb_min_profit_cents: env_or("ARB_MIN_PROFIT_CENTS", 0.5),
            arb_scan_interval_sec: env_or("ARB_SCAN_INTERVAL_SEC", 20.0),

            lp_order_size_usd: env_or("LP_ORDER_SIZE_USD", 10.0),
            lp_refresh_interval_sec: env_or("LP_REFRESH_INTERVAL_SEC", 60.0),
            lp_max_markets: env_or("LP_MAX_MARKETS", 5usize),
            lp_min_daily_reward: env_or("LP_MIN_DAILY_REWARD", 20.0),
            lp_min_estimated_reward: env_or("LP_MIN_ESTIMATED_REWARD", 0.50),
            lp_min_best_bid: env_or("LP_MIN_BEST_BID", 0.05),
            lp_stop_loss_pct: env_or("LP_STOP_LOSS_PCT", 0.05),

            lp_flip_order_size_usd: env_or("LP_FLIP_ORDER_SIZE_USD", 25.0),
            lp_flip_scan_interval_sec: env_or("LP_FLIP_SCAN_INTERVAL_SEC", 45.0),
            lp_flip_poll_interval_sec: env_or("LP_FLIP_POLL_INTERVAL_SEC", 15.0),
            lp_flip_max_resting_sec: env_or("LP_FLIP_MAX_RESTING_SEC", 300.0),
            lp_flip_stop_loss_pct: env_or("LP_FLIP_STOP_LOSS_PCT", 0.05),

            copy_traders: env_list("COPY_TRADERS", &[]),
            copy_scale_factor: env_or("COPY_SCALE_FACTOR", 0.1),
            copy_poll_interval_sec: env_or("COPY_POLL_INTERVAL_SEC", 30.0),
            copy_min_trade_usd: env_or("COPY_MIN_TRADE_USD", 5.0),
            copy_max_delay_sec: env_or("COPY_MAX_DELAY_SEC", 10.0),

            synth_edge_threshold: env_or("SYNTH_EDGE_THRESHOLD", 0.05),
            synth_assets: env_list("SYNTH_ASSETS", &["BTC", "ETH"]),
            synth_poll_interval_sec: env_or("SYNTH_POLL_INTERVAL_SEC", 60.0),
            synth_kelly_fraction: env_or("SYNTH_KELLY_FRACTION", 0.25),

            timing_jitter_pct: env_or("TIMING_JITTER_PCT", 0.15),
            size_jitter_pct: env_or("SIZE_JITTER_PCT", 0.10),

            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "betterbot.db".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            tick_size: env_or("TICK_SIZE", 0.01),
        })
    }
}
