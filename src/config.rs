use crate::scheduler::SchedulerSettings;
use crate::source::BasicAuth;
use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;
use url::Url;

const PREFIX: &str = "POWER_FORWARDER_";

#[derive(Debug, Clone)]
pub struct Config {
    pub site: Option<String>,
    pub cluster: Option<String>,

    pub api_base: String,
    /// May contain `{site}`.
    pub wattmetre_base: String,
    pub login: Option<String>,
    pub password: Option<String>,
    pub http_timeout: Duration,
    pub http_insecure: bool,

    pub snmp_community: String,
    pub snmp_timeout: Duration,

    pub poll_interval: Duration,
    pub window_seconds: u64,
    pub connection_loss_cycles: u32,

    pub sink: String,
    pub sink_table: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let api_base = vars.env_string("API_BASE", Some("https://api.grid5000.fr/stable"))?;
        Url::parse(&api_base).with_context(|| format!("invalid {PREFIX}API_BASE {api_base}"))?;

        let wattmetre_base =
            vars.env_string("WATTMETRE_BASE", Some("http://wattmetre.{site}.grid5000.fr"))?;

        let connection_loss_cycles = vars.env_u64("CONNECTION_LOSS_CYCLES", Some(1))?;
        let connection_loss_cycles = u32::try_from(connection_loss_cycles.max(1))
            .with_context(|| format!("invalid {PREFIX}CONNECTION_LOSS_CYCLES"))?;

        let window_seconds = vars.env_u64("WINDOW_SECONDS", Some(3600))?;
        if window_seconds == 0 {
            return Err(anyhow!("{PREFIX}WINDOW_SECONDS must be positive"));
        }

        Ok(Self {
            site: vars.env_optional("SITE"),
            cluster: vars.env_optional("CLUSTER"),
            api_base,
            wattmetre_base,
            login: vars.env_optional("LOGIN"),
            password: vars.env_optional("PASSWORD"),
            http_timeout: Duration::from_millis(vars.env_u64("HTTP_TIMEOUT_MS", Some(5000))?),
            http_insecure: vars.env_bool("HTTP_INSECURE", true)?,
            snmp_community: vars.env_string("SNMP_COMMUNITY", Some("public"))?,
            snmp_timeout: Duration::from_millis(vars.env_u64("SNMP_TIMEOUT_MS", Some(3000))?),
            poll_interval: Duration::from_millis(vars.env_u64("POLL_INTERVAL_MS", Some(1000))?),
            window_seconds,
            connection_loss_cycles,
            sink: vars.env_string("SINK", Some("stdout"))?,
            sink_table: vars.env_string("SINK_TABLE", Some("power_samples"))?,
        })
    }

    pub fn auth(&self) -> Option<BasicAuth> {
        self.login.as_ref().map(|username| BasicAuth {
            username: username.clone(),
            password: self.password.clone(),
        })
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            poll_interval: self.poll_interval,
            window_seconds: self.window_seconds,
            connection_loss_cycles: self.connection_loss_cycles,
        }
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{PREFIX}{key}")).map(|value| value.trim().to_string())
    }

    fn env_string(&self, key: &str, default: Option<&str>) -> Result<String> {
        match self.raw(key) {
            Some(value) => Ok(value),
            None => default
                .map(str::to_string)
                .ok_or_else(|| anyhow!("missing env var {PREFIX}{key}")),
        }
    }

    fn env_u64(&self, key: &str, default: Option<u64>) -> Result<u64> {
        match self.raw(key) {
            Some(value) => value
                .parse::<u64>()
                .with_context(|| format!("invalid {PREFIX}{key}")),
            None => default.ok_or_else(|| anyhow!("missing env var {PREFIX}{key}")),
        }
    }

    fn env_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.raw(key).as_deref() {
            None | Some("") => Ok(default),
            Some(v) if v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") => {
                Ok(true)
            }
            Some(v) if v == "0" || v.eq_ignore_ascii_case("false") || v.eq_ignore_ascii_case("no") => {
                Ok(false)
            }
            Some(v) => Err(anyhow!("invalid {PREFIX}{key}: {v}")),
        }
    }

    fn env_optional(&self, key: &str) -> Option<String> {
        self.raw(key).filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{PREFIX}{k}"), v.to_string()))
            .collect();
        Config::from_lookup(move |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.api_base, "https://api.grid5000.fr/stable");
        assert_eq!(config.http_timeout, Duration::from_millis(5000));
        assert!(config.http_insecure);
        assert_eq!(config.snmp_community, "public");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.window_seconds, 3600);
        assert_eq!(config.connection_loss_cycles, 1);
        assert_eq!(config.sink, "stdout");
        assert_eq!(config.sink_table, "power_samples");
        assert!(config.site.is_none());
        assert!(config.auth().is_none());
    }

    #[test]
    fn overrides_are_trimmed_and_parsed() {
        let config = config(&[
            ("SITE", " lyon "),
            ("POLL_INTERVAL_MS", "250"),
            ("CONNECTION_LOSS_CYCLES", "3"),
            ("HTTP_INSECURE", "false"),
            ("LOGIN", "alice"),
            ("PASSWORD", "secret"),
        ])
        .unwrap();
        assert_eq!(config.site.as_deref(), Some("lyon"));
        assert_eq!(config.scheduler_settings().poll_interval, Duration::from_millis(250));
        assert_eq!(config.scheduler_settings().connection_loss_cycles, 3);
        assert!(!config.http_insecure);
        let auth = config.auth().unwrap();
        assert_eq!(auth.username, "alice");
        assert_eq!(auth.password.as_deref(), Some("secret"));
    }

    #[test]
    fn zero_loss_cycles_means_one() {
        let config = config(&[("CONNECTION_LOSS_CYCLES", "0")]).unwrap();
        assert_eq!(config.connection_loss_cycles, 1);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(config(&[("POLL_INTERVAL_MS", "fast")]).is_err());
        assert!(config(&[("HTTP_INSECURE", "maybe")]).is_err());
        assert!(config(&[("WINDOW_SECONDS", "0")]).is_err());
        assert!(config(&[("API_BASE", "not a url")]).is_err());
    }

    #[test]
    fn empty_optional_values_are_unset() {
        let config = config(&[("LOGIN", "  ")]).unwrap();
        assert!(config.login.is_none());
    }
}
