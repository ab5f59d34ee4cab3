use config::{Config, ConfigError, Environment, File, FileFormat};
use std::env;
use std::path::PathBuf;

const DEFAULT_CONFIG_FILE: &str = "chat.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub http: HttpSettings,
    pub session: SessionSettings,
    pub relay: RelaySettings,
    pub broker: BrokerSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
    pub cookie_name: String,
    /// Name advertised in the logs, defaults to `host:port`
    pub server_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSettings {
    /// Local session database, unused when sessions are kept by the relay broker
    pub db_path: PathBuf,
    pub ttl_secs: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySettings {
    /// Broker address, when absent chat messages and sessions stay in this process
    pub address: Option<String>,
    pub channel: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSettings {
    pub address: String,
    pub max_connections: usize,
}

impl Settings {
    /// Load settings from defaults, then `chat.toml` (or the file named by `CHAT_CONFIG`) if it
    /// exists, then `CHAT_<SECTION>__<KEY>` environment variables. `PORT` overrides `http.port`.
    pub fn get() -> Result<Self, ConfigError> {
        let path = env::var("CHAT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut s = Settings::defaults()?;
        s.merge(File::from(path).required(false))?;
        s.merge(Environment::with_prefix("CHAT").separator("__"))?;

        if let Ok(port) = env::var("PORT") {
            s.set("http.port", port)?;
        }

        s.try_into()
    }

    /// Load settings from defaults overridden by a toml document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut s = Settings::defaults()?;
        s.merge(File::from_str(content, FileFormat::Toml))?;
        s.try_into()
    }

    pub fn http_address(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }

    pub fn server_name(&self) -> String {
        self.http
            .server_name
            .clone()
            .unwrap_or_else(|| self.http_address())
    }

    fn defaults() -> Result<Config, ConfigError> {
        let mut s = Config::new();
        s.set_default("http.host", "127.0.0.1")?;
        s.set_default("http.port", 3000_i64)?;
        s.set_default("http.cookie_name", "jsessionid")?;
        s.set_default("session.db_path", "relaychat_db")?;
        s.set_default("session.ttl_secs", 86400_i64)?;
        s.set_default("relay.channel", "chat")?;
        s.set_default("broker.address", "127.0.0.1:6380")?;
        s.set_default("broker.max_connections", 1024_i64)?;
        Ok(s)
    }
}

#[cfg(test)]
mod test {
    use super::Settings;

    #[test]
    fn should_load_defaults() {
        let settings = Settings::from_toml("").unwrap();

        assert_eq!(settings.http_address(), "127.0.0.1:3000");
        assert_eq!(settings.http.cookie_name, "jsessionid");
        assert_eq!(settings.session.ttl_secs, 86400);
        assert_eq!(settings.relay.address, None);
        assert_eq!(settings.relay.channel, "chat");
        assert_eq!(settings.broker.max_connections, 1024);
        assert_eq!(settings.server_name(), "127.0.0.1:3000");
    }

    #[test]
    fn should_override_defaults() {
        let settings = Settings::from_toml(
            r#"
            [http]
            port = 8080
            server_name = "chat-1.internal:8080"

            [relay]
            address = "10.0.0.2:6380"
            "#,
        )
        .unwrap();

        assert_eq!(settings.http.port, 8080);
        assert_eq!(settings.http.host, "127.0.0.1");
        assert_eq!(settings.relay.address.as_deref(), Some("10.0.0.2:6380"));
        assert_eq!(settings.server_name(), "chat-1.internal:8080");
    }

    #[test]
    fn should_reject_unknown_keys() {
        let settings = Settings::from_toml(
            r#"
            [http]
            prot = 8080
            "#,
        );

        assert!(settings.is_err());
    }
}
