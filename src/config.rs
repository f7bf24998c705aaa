use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use simplelog::LevelFilter;
use url::Url;

use crate::models::RecipientId;

const DEFAULT_BASE_URL: &str = "https://qisserver.htwk-leipzig.de/qisserver/rds";
const DEFAULT_DEGREE_NODE: &str = "auswahlBaum|abschluss:abschl=90,stgnr=1|studiengang:stg=INM";
const DEFAULT_INTERVAL_MINUTES: u64 = 15;
const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Clone)]
pub struct QisConfig {
    pub base_url: Url,
    pub username: String,
    pub password: String,
    pub degree_node: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub qis: QisConfig,
    pub bot_token: String,
    pub owner: RecipientId,
    pub poll_interval: Duration,
    pub grades_file: PathBuf,
    pub users_file: PathBuf,
    pub log_level: LevelFilter,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("{key} environment variable not found"))
        };
        let optional = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let base_url = optional("QIS_BASE_URL", DEFAULT_BASE_URL);
        let base_url = Url::parse(&base_url).with_context(|| format!("QIS_BASE_URL is not a valid url: {base_url}"))?;

        let owner = required("PRIVATE_USER_ID")?;
        let owner = owner
            .trim()
            .parse::<i64>()
            .with_context(|| format!("PRIVATE_USER_ID is not a chat id: {owner}"))?;

        let minutes = match lookup("POLL_INTERVAL_MINUTES") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("POLL_INTERVAL_MINUTES is not a number: {raw}"))?,
            None => DEFAULT_INTERVAL_MINUTES,
        };
        if !(1..=MAX_INTERVAL_MINUTES).contains(&minutes) {
            return Err(anyhow!(
                "POLL_INTERVAL_MINUTES must be between 1 and {MAX_INTERVAL_MINUTES}, got {minutes}"
            ));
        }

        let log_level = optional("LOG_LEVEL", "info");
        let log_level = LevelFilter::from_str(log_level.trim())
            .map_err(|_| anyhow!("LOG_LEVEL is not a log level: {log_level}"))?;

        Ok(Self {
            qis: QisConfig {
                base_url,
                username: required("QIS_USERNAME")?,
                password: required("QIS_PASSWORD")?,
                degree_node: optional("QIS_DEGREE_NODE", DEFAULT_DEGREE_NODE),
            },
            bot_token: required("TELEGRAM_BOT_SECRET")?,
            owner: RecipientId(owner),
            poll_interval: Duration::from_secs(minutes * 60),
            grades_file: PathBuf::from(optional("GRADES_FILE", "grades.json")),
            users_file: PathBuf::from(optional("USERS_FILE", "telegram_users.json")),
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("QIS_USERNAME", "s12345"),
        ("QIS_PASSWORD", "hunter2"),
        ("TELEGRAM_BOT_SECRET", "123:abc"),
        ("PRIVATE_USER_ID", "9001"),
    ];

    #[test]
    fn defaults_apply_when_only_secrets_are_set() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.owner, RecipientId(9001));
        assert_eq!(config.poll_interval, Duration::from_secs(15 * 60));
        assert_eq!(config.grades_file, PathBuf::from("grades.json"));
        assert_eq!(config.users_file, PathBuf::from("telegram_users.json"));
        assert_eq!(config.qis.base_url.as_str(), DEFAULT_BASE_URL);
        assert_eq!(config.log_level, LevelFilter::Info);
    }

    #[test]
    fn overrides_are_honoured() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("POLL_INTERVAL_MINUTES", "5"),
            ("GRADES_FILE", "/var/lib/notenbot/grades.json"),
            ("LOG_LEVEL", "debug"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert_eq!(config.grades_file, PathBuf::from("/var/lib/notenbot/grades.json"));
        assert_eq!(config.log_level, LevelFilter::Debug);
    }

    #[test]
    fn one_week_is_the_longest_interval() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("POLL_INTERVAL_MINUTES", "10080"));
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(7 * 24 * 60 * 60));
    }

    #[test]
    fn missing_secret_is_reported_by_name() {
        let vars: Vec<_> = REQUIRED.iter().copied().filter(|(k, _)| *k != "QIS_PASSWORD").collect();
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains("QIS_PASSWORD"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (key, value) in [
            ("PRIVATE_USER_ID", "owner"),
            ("POLL_INTERVAL_MINUTES", "0"),
            ("POLL_INTERVAL_MINUTES", "10081"),
            ("POLL_INTERVAL_MINUTES", "18446744073709551615"),
            ("QIS_BASE_URL", "not a url"),
            ("LOG_LEVEL", "loud"),
        ] {
            let mut vars: Vec<_> = REQUIRED.iter().copied().filter(|(k, _)| *k != key).collect();
            vars.push((key, value));
            assert!(Config::from_lookup(lookup(&vars)).is_err(), "{key}={value} accepted");
        }
    }
}
