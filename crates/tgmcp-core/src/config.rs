use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the gateway and its stdio server.
#[derive(Clone, Debug)]
pub struct Config {
    // Remote bridge
    pub bridge_url: String,
    pub session: SessionCredential,
    pub request_timeout: Duration,

    // Gateway tuning
    pub gateway: GatewayConfig,

    // Logging
    pub log_file: Option<PathBuf>,
}

/// Credential forwarded to the bridge. The bridge owns the session lifecycle.
#[derive(Clone, PartialEq, Eq)]
pub enum SessionCredential {
    String(String),
    Named(String),
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "String({}...)", s.chars().take(8).collect::<String>()),
            Self::Named(n) => write!(f, "Named({n})"),
        }
    }
}

/// Knobs consumed by [`crate::gateway::Gateway`].
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub resolver_ttl: Duration,
    pub resolver_capacity: usize,
    pub backoff_max_wait: Duration,
    pub page_max_items: usize,
    pub cursor_listings: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            resolver_ttl: Duration::from_secs(300),
            resolver_capacity: 1024,
            backoff_max_wait: Duration::from_secs(30),
            page_max_items: 5000,
            cursor_listings: vec!["messages".to_string(), "search".to_string()],
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup (process env in production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let bridge_url = get("TELEGRAM_BRIDGE_URL").ok_or_else(|| {
            Error::Config("TELEGRAM_BRIDGE_URL environment variable is required".to_string())
        })?;
        if !(bridge_url.starts_with("http://") || bridge_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "TELEGRAM_BRIDGE_URL must be an http(s) URL, got {bridge_url}"
            )));
        }

        // String sessions take precedence over named sessions.
        let session = match (get("TELEGRAM_SESSION_STRING"), get("TELEGRAM_SESSION_NAME")) {
            (Some(s), _) => SessionCredential::String(s),
            (None, Some(n)) => SessionCredential::Named(n),
            (None, None) => {
                return Err(Error::Config(
                    "either TELEGRAM_SESSION_STRING or TELEGRAM_SESSION_NAME is required"
                        .to_string(),
                ))
            }
        };

        let request_timeout = Duration::from_millis(
            parse_u64(get("TGMCP_REQUEST_TIMEOUT_MS")).unwrap_or(30_000),
        );

        let defaults = GatewayConfig::default();
        let gateway = GatewayConfig {
            resolver_ttl: parse_u64(get("TGMCP_RESOLVER_TTL_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.resolver_ttl),
            resolver_capacity: parse_u64(get("TGMCP_RESOLVER_CAPACITY"))
                .map(|v| v.max(1) as usize)
                .unwrap_or(defaults.resolver_capacity),
            backoff_max_wait: parse_u64(get("TGMCP_BACKOFF_MAX_WAIT_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_max_wait),
            page_max_items: parse_u64(get("TGMCP_PAGE_MAX_ITEMS"))
                .map(|v| v.max(1) as usize)
                .unwrap_or(defaults.page_max_items),
            cursor_listings: get("TGMCP_CURSOR_LISTINGS")
                .map(|v| parse_csv_lower(&v))
                .unwrap_or(defaults.cursor_listings),
        };

        let log_file = get("TGMCP_LOG_FILE").map(PathBuf::from);

        Ok(Self {
            bridge_url: bridge_url.trim_end_matches('/').to_string(),
            session,
            request_timeout,
            gateway,
            log_file,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn parse_csv_lower(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn requires_bridge_url() {
        let err = Config::from_lookup(lookup(&[("TELEGRAM_SESSION_STRING", "abc")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn requires_some_session() {
        let err =
            Config::from_lookup(lookup(&[("TELEGRAM_BRIDGE_URL", "http://localhost:8081")]))
                .unwrap_err();
        assert!(err.to_string().contains("TELEGRAM_SESSION"));
    }

    #[test]
    fn string_session_wins_over_name() {
        let cfg = Config::from_lookup(lookup(&[
            ("TELEGRAM_BRIDGE_URL", "http://localhost:8081/"),
            ("TELEGRAM_SESSION_STRING", "1BVtsOK"),
            ("TELEGRAM_SESSION_NAME", "anon"),
        ]))
        .unwrap();
        assert_eq!(cfg.session, SessionCredential::String("1BVtsOK".into()));
        assert_eq!(cfg.bridge_url, "http://localhost:8081");
    }

    #[test]
    fn defaults_and_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("TELEGRAM_BRIDGE_URL", "https://bridge.local"),
            ("TELEGRAM_SESSION_NAME", "anon"),
            ("TGMCP_RESOLVER_TTL_SECS", "60"),
            ("TGMCP_CURSOR_LISTINGS", "Messages, dialogs ,"),
        ]))
        .unwrap();
        assert_eq!(cfg.gateway.resolver_ttl, Duration::from_secs(60));
        assert_eq!(cfg.gateway.backoff_max_wait, Duration::from_secs(30));
        assert_eq!(cfg.gateway.page_max_items, 5000);
        assert_eq!(cfg.gateway.cursor_listings, vec!["messages", "dialogs"]);
        assert_eq!(cfg.request_timeout, Duration::from_millis(30_000));
        assert!(cfg.log_file.is_none());
    }

    #[test]
    fn session_debug_does_not_leak_secret() {
        let s = SessionCredential::String("1BVtsOKsupersecretvalue".into());
        assert!(!format!("{s:?}").contains("supersecret"));
    }
}
