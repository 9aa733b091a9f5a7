use crate::schema::AppConfig;
use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

pub const DEFAULT_PSA_API_URL: &str =
    "https://api-na.myconnectwise.net/v4_6_release/apis/3.0";
pub const DEFAULT_PSA_TICKET_URL: &str =
    "https://na.myconnectwise.net/v4_6_release/services/system_io/Service/fv_sr100_request.rails";
pub const DEFAULT_CHAT_API_URL: &str = "https://webexapis.com/v1";

const ENV_KEYS: &[&str] = &[
    "listen_addr",
    "root_url",
    "postgres_dsn",
    "cw_pub_key",
    "cw_priv_key",
    "cw_client_id",
    "cw_company_id",
    "cw_api_url",
    "cw_ticket_url",
    "webex_secret",
    "webex_api_url",
    "admin_api_key",
    "attempt_notify",
    "max_msg_length",
    "max_concurrent_syncs",
    "excluded_cw_members",
    "cache_ttl_hours",
    "skip_launch_syncs",
    "skip_auth",
    "skip_hooks",
    "mock_webex",
    "mock_connectwise",
];

/// Startup settings. Read once from `ticketbridge.toml` (or the file named by
/// `TICKETBRIDGE_CONFIG`) and the environment, which wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listen_addr: String,
    pub root_url: String,
    pub postgres_dsn: String,
    pub cw_pub_key: String,
    pub cw_priv_key: String,
    pub cw_client_id: String,
    pub cw_company_id: String,
    pub cw_api_url: String,
    pub cw_ticket_url: String,
    pub webex_secret: String,
    pub webex_api_url: String,
    pub admin_api_key: String,
    pub attempt_notify: bool,
    pub max_msg_length: i32,
    pub max_concurrent_syncs: i32,
    pub excluded_cw_members: String,
    pub cache_ttl_hours: i64,
    pub skip_launch_syncs: bool,
    pub skip_auth: bool,
    pub skip_hooks: bool,
    pub mock_webex: bool,
    pub mock_connectwise: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            root_url: String::new(),
            postgres_dsn: String::new(),
            cw_pub_key: String::new(),
            cw_priv_key: String::new(),
            cw_client_id: String::new(),
            cw_company_id: String::new(),
            cw_api_url: DEFAULT_PSA_API_URL.to_string(),
            cw_ticket_url: DEFAULT_PSA_TICKET_URL.to_string(),
            webex_secret: String::new(),
            webex_api_url: DEFAULT_CHAT_API_URL.to_string(),
            admin_api_key: String::new(),
            attempt_notify: false,
            max_msg_length: 300,
            max_concurrent_syncs: 5,
            excluded_cw_members: String::new(),
            cache_ttl_hours: 24,
            skip_launch_syncs: false,
            skip_auth: false,
            skip_hooks: false,
            mock_webex: false,
            mock_connectwise: false,
        }
    }
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("TICKETBRIDGE_CONFIG")
            .unwrap_or_else(|_| "ticketbridge.toml".to_string());
        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(&path))
            .merge(Env::raw().only(ENV_KEYS));
        let settings = Self::from_figment(figment)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        figment.extract().context("failed to read settings")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut missing = Vec::new();
        if self.postgres_dsn.is_empty() {
            missing.push("postgres_dsn");
        }
        if !self.mock_connectwise {
            for (key, value) in [
                ("cw_pub_key", &self.cw_pub_key),
                ("cw_priv_key", &self.cw_priv_key),
                ("cw_client_id", &self.cw_client_id),
                ("cw_company_id", &self.cw_company_id),
            ] {
                if value.is_empty() {
                    missing.push(key);
                }
            }
        }
        if !self.mock_webex && self.webex_secret.is_empty() {
            missing.push("webex_secret");
        }
        if !self.skip_hooks && self.root_url.is_empty() {
            missing.push("root_url");
        }
        if !self.skip_auth && self.admin_api_key.is_empty() {
            missing.push("admin_api_key");
        }
        if !missing.is_empty() {
            anyhow::bail!("missing required settings: {}", missing.join(", "));
        }
        if self.max_msg_length <= 0 {
            anyhow::bail!("max_msg_length must be positive");
        }
        Ok(())
    }

    /// Member identifiers that never receive "updated" notifications.
    pub fn excluded_members(&self) -> Vec<String> {
        self.excluded_cw_members
            .split(',')
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .collect()
    }

    pub fn cache_ttl(&self) -> Option<chrono::Duration> {
        (self.cache_ttl_hours > 0).then(|| chrono::Duration::hours(self.cache_ttl_hours))
    }

    /// Live config seeded into the store on first boot.
    pub fn initial_app_config(&self) -> AppConfig {
        AppConfig {
            attempt_notify: self.attempt_notify,
            max_concurrent_syncs: self.max_concurrent_syncs,
            max_message_length: self.max_msg_length,
            skip_launch_syncs: self.skip_launch_syncs,
        }
    }

    pub fn callback_url(&self) -> String {
        let root = self.root_url.trim_end_matches('/');
        let root = if root.starts_with("http://") || root.starts_with("https://") {
            root.to_string()
        } else {
            format!("https://{root}")
        };
        format!("{root}/hooks/psa/tickets")
    }
}

/// Process-wide live config. Readers take a snapshot per event; `replace`
/// publishes a new one.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<AppConfig>>>,
}

impl SharedConfig {
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn snapshot(&self) -> Arc<AppConfig> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, config: AppConfig) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }
}
