use regex::Regex;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use super::sizing::{ClampPolicy, SizingConfig};

pub const DEFAULT_DATA_API_URL: &str = "https://data-api.polymarket.com";
pub const DEFAULT_CLOB_HTTP_URL: &str = "https://clob.polymarket.com";
pub const DEFAULT_DATABASE: &str = "polymarket_copytrading";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    pub fn problems(&self) -> &[String] {
        match self {
            ConfigError::Invalid(problems) => problems,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSourceKind {
    /// Change streams on the backing collections.
    Push,
    /// Events derived from the poller's upsert outcomes.
    Poll,
}

#[derive(Debug, Clone)]
pub struct Env {
    pub trader_wallet: String,
    pub funder_address: String,
    pub private_key: Option<String>,
    pub store_backend: StoreBackend,
    pub event_source: EventSourceKind,
    pub mongo_uri: Option<String>,
    pub mongo_database: String,
    pub trades_table: String,
    pub positions_table: String,
    pub data_api_url: String,
    pub clob_http_url: String,
    pub chain_id: u64,
    pub signature_type: u8,
    pub sizing: SizingConfig,
    pub skip_if_already_open: bool,
    pub activity_poll_interval: Duration,
    pub position_poll_interval: Duration,
    pub activity_page_limit: u32,
    pub position_page_limit: u32,
    pub request_timeout_ms: u64,
    pub network_retry_limit: u32,
    pub order_dedup_window: Duration,
    pub preview_mode: bool,
}

fn is_valid_ethereum_address(address: &str) -> bool {
    Regex::new(r"^0x[a-fA-F0-9]{40}$")
        .map(|re| re.is_match(address))
        .unwrap_or(false)
}

/// Reads keys through a lookup function and accumulates every problem
/// instead of stopping at the first one.
struct Reader<F> {
    lookup: F,
    problems: Vec<String>,
}

impl<F> Reader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&mut self, key: &str) -> String {
        match self.raw(key) {
            Some(value) => value,
            None => {
                self.problems.push(format!("{} is not set", key));
                String::new()
            }
        }
    }

    fn parsed<T: FromStr>(&mut self, key: &str, default: T) -> T {
        match self.raw(key) {
            None => default,
            Some(value) => match value.parse::<T>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    self.problems
                        .push(format!("{} has an invalid value: {:?}", key, value));
                    default
                }
            },
        }
    }

    fn flag(&mut self, key: &str, default: bool) -> bool {
        match self.raw(key).map(|v| v.to_lowercase()) {
            None => default,
            Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => true,
            Some(v) if matches!(v.as_str(), "false" | "0" | "no") => false,
            Some(v) => {
                self.problems
                    .push(format!("{} must be true or false, got {:?}", key, v));
                default
            }
        }
    }

    fn wallet(&mut self, key: &str) -> String {
        let value = self.required(key);
        if !value.is_empty() && !is_valid_ethereum_address(&value) {
            self.problems.push(format!(
                "{} must be 0x followed by 40 hex characters, got {}",
                key, value
            ));
        }
        value.to_lowercase()
    }

    fn http_url(&mut self, key: &str, default: &str) -> String {
        let value = self.raw(key).unwrap_or_else(|| default.to_string());
        match url::Url::parse(&value) {
            Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {
                value.trim_end_matches('/').to_string()
            }
            _ => {
                self.problems
                    .push(format!("{} must be a valid HTTP/HTTPS URL, got {}", key, value));
                value
            }
        }
    }

    fn page_limit(&mut self, key: &str, default: u32) -> u32 {
        let limit = self.parsed::<u32>(key, default);
        if limit == 0 || limit > 500 {
            self.problems
                .push(format!("{} must be between 1 and 500, got {}", key, limit));
        }
        limit
    }

    fn interval(&mut self, key: &str, default: u64) -> Duration {
        let secs = self.parsed::<u64>(key, default);
        if secs == 0 {
            self.problems.push(format!("{} must be positive", key));
        }
        Duration::from_secs(secs.max(1))
    }
}

impl Env {
    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut r = Reader {
            lookup,
            problems: Vec::new(),
        };

        let trader_wallet = r.wallet("TRADER_WALLET");
        let funder_address = r.wallet("POLY_FUNDER");
        let preview_mode = r.flag("PREVIEW_MODE", true);

        let private_key = r.raw("PRIVATE_KEY").or_else(|| r.raw("PK"));
        if private_key.is_none() && !preview_mode {
            r.problems
                .push("PRIVATE_KEY (or PK) is not set and PREVIEW_MODE is false".to_string());
        }

        let store_backend = match r.raw("STORE_BACKEND").map(|v| v.to_lowercase()).as_deref() {
            None | Some("mongo") | Some("mongodb") => StoreBackend::Mongo,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                r.problems
                    .push(format!("STORE_BACKEND must be mongo or memory, got {}", other));
                StoreBackend::Mongo
            }
        };

        let mut event_source = match r.raw("EVENT_SOURCE").map(|v| v.to_lowercase()).as_deref() {
            None | Some("push") => EventSourceKind::Push,
            Some("poll") => EventSourceKind::Poll,
            Some(other) => {
                r.problems
                    .push(format!("EVENT_SOURCE must be push or poll, got {}", other));
                EventSourceKind::Push
            }
        };
        if store_backend == StoreBackend::Memory {
            event_source = EventSourceKind::Poll;
        }

        let mongo_uri = match store_backend {
            StoreBackend::Mongo => {
                let uri = r.required("MONGO_URI");
                if !uri.is_empty() && !uri.starts_with("mongodb") {
                    r.problems.push(format!(
                        "MONGO_URI must start with mongodb:// or mongodb+srv://, got {}",
                        uri
                    ));
                }
                Some(uri)
            }
            StoreBackend::Memory => r.raw("MONGO_URI"),
        };

        let sizing = SizingConfig {
            bankroll: r.parsed("BANKROLL", 1000.0),
            stake_min: r.parsed("STAKE_MIN", 5.0),
            stake_max: r.parsed("STAKE_MAX", 20.0),
            mirror_fraction: r.parsed("STAKE_WHALE_PCT", 0.005),
            clamp: if r.flag("CLAMP_STAKES", false) {
                ClampPolicy::Enabled
            } else {
                ClampPolicy::Disabled
            },
        };
        r.problems.extend(sizing.validate());

        let signature_type = r.parsed::<u8>("SIGNATURE_TYPE", 1);
        if signature_type > 2 {
            r.problems.push(format!(
                "SIGNATURE_TYPE must be 0 (EOA), 1 (proxy) or 2 (Gnosis Safe), got {}",
                signature_type
            ));
        }

        let request_timeout_ms = r.parsed::<u64>("REQUEST_TIMEOUT_MS", 5000);
        if request_timeout_ms < 1000 {
            r.problems
                .push("REQUEST_TIMEOUT_MS must be at least 1000ms".to_string());
        }

        let network_retry_limit = r.parsed::<u32>("NETWORK_RETRY_LIMIT", 3);
        if !(1..=10).contains(&network_retry_limit) {
            r.problems
                .push("NETWORK_RETRY_LIMIT must be between 1 and 10".to_string());
        }

        let env = Env {
            trader_wallet,
            funder_address,
            private_key,
            store_backend,
            event_source,
            mongo_uri,
            mongo_database: r
                .raw("MONGO_DATABASE")
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            trades_table: r
                .raw("TABLE_NAME_TRADES")
                .unwrap_or_else(|| "historic_trades".to_string()),
            positions_table: r
                .raw("TABLE_NAME_POSITIONS")
                .unwrap_or_else(|| "polymarket_positions".to_string()),
            data_api_url: r.http_url("DATA_API_URL", DEFAULT_DATA_API_URL),
            clob_http_url: r.http_url("CLOB_HTTP_URL", DEFAULT_CLOB_HTTP_URL),
            chain_id: r.parsed("POLY_CHAIN_ID", 137),
            signature_type,
            sizing,
            skip_if_already_open: r.flag("SKIP_IF_ALREADY_OPEN", true),
            activity_poll_interval: r.interval("ACTIVITY_POLL_INTERVAL_SECS", 5),
            position_poll_interval: r.interval("POSITION_POLL_INTERVAL_SECS", 6 * 60),
            activity_page_limit: r.page_limit("ACTIVITY_PAGE_LIMIT", 500),
            position_page_limit: r.page_limit("POSITION_PAGE_LIMIT", 50),
            request_timeout_ms,
            network_retry_limit,
            order_dedup_window: Duration::from_secs(r.parsed("ORDER_DEDUP_WINDOW_SECS", 600)),
            preview_mode,
        };

        if r.problems.is_empty() {
            Ok(env)
        } else {
            Err(ConfigError::Invalid(r.problems))
        }
    }

    pub fn from_map(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| values.get(key).cloned())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Loads `.env` (if present) and the process environment.
pub fn load_env() -> Result<Env, ConfigError> {
    dotenvy::dotenv().ok();
    Env::from_lookup(|key| std::env::var(key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> HashMap<String, String> {
        [
            ("TRADER_WALLET", "0x1111111111111111111111111111111111111111"),
            ("POLY_FUNDER", "0x3333333333333333333333333333333333333333"),
            ("MONGO_URI", "mongodb://localhost:27017"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn defaults_match_observed_behaviour() {
        let env = Env::from_map(&base()).unwrap();
        assert_eq!(env.trades_table, "historic_trades");
        assert_eq!(env.positions_table, "polymarket_positions");
        assert_eq!(env.activity_poll_interval, Duration::from_secs(5));
        assert_eq!(env.position_poll_interval, Duration::from_secs(360));
        assert_eq!(env.request_timeout_ms, 5000);
        assert_eq!(env.sizing.mirror_fraction, 0.005);
        assert_eq!(env.sizing.clamp, ClampPolicy::Disabled);
        assert_eq!(env.event_source, EventSourceKind::Push);
        assert!(env.preview_mode);
    }

    #[test]
    fn reports_all_missing_keys_at_once() {
        let mut values = HashMap::new();
        values.insert("PREVIEW_MODE".to_string(), "false".to_string());
        let err = Env::from_map(&values).unwrap_err();
        let problems = err.problems().join("\n");
        for key in ["TRADER_WALLET", "POLY_FUNDER", "PRIVATE_KEY", "MONGO_URI"] {
            assert!(problems.contains(key), "missing {} in {}", key, problems);
        }
    }

    #[test]
    fn invalid_values_are_collected_with_missing_ones() {
        let mut values = base();
        values.remove("POLY_FUNDER");
        values.insert("STAKE_WHALE_PCT".to_string(), "abc".to_string());
        values.insert("STAKE_MIN".to_string(), "50".to_string());
        values.insert("TRADER_WALLET".to_string(), "0x123".to_string());
        let err = Env::from_map(&values).unwrap_err();
        assert_eq!(err.problems().len(), 4);
    }

    #[test]
    fn memory_backend_forces_poll_source_and_skips_mongo() {
        let mut values = base();
        values.remove("MONGO_URI");
        values.insert("STORE_BACKEND".to_string(), "memory".to_string());
        values.insert("EVENT_SOURCE".to_string(), "push".to_string());
        let env = Env::from_map(&values).unwrap();
        assert_eq!(env.store_backend, StoreBackend::Memory);
        assert_eq!(env.event_source, EventSourceKind::Poll);
    }

    #[test]
    fn pk_alias_is_accepted() {
        let mut values = base();
        values.insert("PREVIEW_MODE".to_string(), "false".to_string());
        values.insert("PK".to_string(), "0xabc".to_string());
        let env = Env::from_map(&values).unwrap();
        assert_eq!(env.private_key.as_deref(), Some("0xabc"));
    }
}
