//! Service configuration from environment variables.
//!
//! Nothing is validated at startup. Each accessor resolves only the values its
//! operation needs and returns a [`ConfigError`] naming the first missing or
//! invalid variable. A missing topic breaks `/publish` and nothing else.

use std::str::FromStr;
use std::time::Duration;

use crate::domain::{ConfigError, SubscriptionPath, TopicPath};
use crate::ports::SecretName;

pub const PROJECT_VAR: &str = "GOOGLE_CLOUD_PROJECT";
pub const TOPIC_VAR: &str = "PUBSUB_TOPIC";
pub const SUBSCRIPTION_VAR: &str = "PUBSUB_SUBSCRIPTION";
pub const EMULATOR_HOST_VAR: &str = "PUBSUB_EMULATOR_HOST";
pub const MAX_MESSAGES_VAR: &str = "PUBSUB_MAX_MESSAGES";
pub const PULL_TIMEOUT_VAR: &str = "PUBSUB_PULL_TIMEOUT_SECS";
pub const FETCH_MODE_VAR: &str = "FETCH_MODE";
pub const DB_HOST_VAR: &str = "DB_HOST";
pub const DB_NAME_VAR: &str = "DB_NAME";
pub const DB_PORT_VAR: &str = "DB_PORT";
pub const DB_USER_VAR: &str = "DB_USER";
pub const DB_SECRET_NAME_VAR: &str = "DB_SECRET_NAME";
pub const DB_PASSWORD_VAR: &str = "DB_PASSWORD";
pub const DB_MAX_CONNECTIONS_VAR: &str = "DB_MAX_CONNECTIONS";
pub const ACCESS_TOKEN_VAR: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

const DEFAULT_MAX_MESSAGES: usize = 5;
const DEFAULT_PULL_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DB_PORT: u16 = 5432;
const DEFAULT_DB_USER: &str = "cache";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// FetchMode は `/fetch` が pull したメッセージをどう扱うか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// queue に返す（ack deadline 0）。覗いても何も消費しない
    #[default]
    Release,
    /// ack する。覗いたメッセージは subscription から消える
    Acknowledge,
}

impl FromStr for FetchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "release" => Ok(FetchMode::Release),
            "acknowledge" | "ack" => Ok(FetchMode::Acknowledge),
            other => Err(format!("expected `release` or `acknowledge`, got `{other}`")),
        }
    }
}

/// どこから、どれだけ待って pull するか
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullTarget {
    pub subscription: SubscriptionPath,
    pub timeout: Duration,
}

/// データベースのパスワードの取得方法
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbCredential {
    Password(String),
    Secret(SecretName),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: String,
    pub name: String,
    pub port: u16,
    pub user: String,
    pub max_connections: u32,
    pub credential: DbCredential,
}

/// 環境変数のスナップショット。空の値は未設定として扱う
#[derive(Debug, Clone, Default)]
pub struct Settings {
    project: Option<String>,
    topic: Option<String>,
    subscription: Option<String>,
    emulator_host: Option<String>,
    max_messages: Option<String>,
    pull_timeout_secs: Option<String>,
    fetch_mode: Option<String>,
    db_host: Option<String>,
    db_name: Option<String>,
    db_port: Option<String>,
    db_user: Option<String>,
    db_secret_name: Option<String>,
    db_password: Option<String>,
    db_max_connections: Option<String>,
    access_token: Option<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        Self {
            project: get(PROJECT_VAR),
            topic: get(TOPIC_VAR),
            subscription: get(SUBSCRIPTION_VAR),
            emulator_host: get(EMULATOR_HOST_VAR),
            max_messages: get(MAX_MESSAGES_VAR),
            pull_timeout_secs: get(PULL_TIMEOUT_VAR),
            fetch_mode: get(FETCH_MODE_VAR),
            db_host: get(DB_HOST_VAR),
            db_name: get(DB_NAME_VAR),
            db_port: get(DB_PORT_VAR),
            db_user: get(DB_USER_VAR),
            db_secret_name: get(DB_SECRET_NAME_VAR),
            db_password: get(DB_PASSWORD_VAR),
            db_max_connections: get(DB_MAX_CONNECTIONS_VAR),
            access_token: get(ACCESS_TOKEN_VAR),
        }
    }

    pub fn project(&self) -> Result<&str, ConfigError> {
        require(PROJECT_VAR, &self.project)
    }

    pub fn topic_path(&self) -> Result<TopicPath, ConfigError> {
        let topic = require(TOPIC_VAR, &self.topic)?;
        Ok(TopicPath::new(self.project()?, topic))
    }

    pub fn subscription_path(&self) -> Result<SubscriptionPath, ConfigError> {
        let subscription = require(SUBSCRIPTION_VAR, &self.subscription)?;
        Ok(SubscriptionPath::new(self.project()?, subscription))
    }

    pub fn pull_target(&self) -> Result<PullTarget, ConfigError> {
        Ok(PullTarget {
            subscription: self.subscription_path()?,
            timeout: self.pull_timeout()?,
        })
    }

    pub fn pull_timeout(&self) -> Result<Duration, ConfigError> {
        let secs = parse_or(PULL_TIMEOUT_VAR, &self.pull_timeout_secs, DEFAULT_PULL_TIMEOUT_SECS)?;
        // 0 だと HTTP の pull が毎回すぐ timeout し、何も届かない
        if secs == 0 {
            return Err(invalid(PULL_TIMEOUT_VAR, "0", "must be at least 1"));
        }
        Ok(Duration::from_secs(secs))
    }

    pub fn max_messages(&self) -> Result<usize, ConfigError> {
        let max = parse_or(MAX_MESSAGES_VAR, &self.max_messages, DEFAULT_MAX_MESSAGES)?;
        if max == 0 {
            return Err(invalid(MAX_MESSAGES_VAR, "0", "must be at least 1"));
        }
        Ok(max)
    }

    pub fn fetch_mode(&self) -> Result<FetchMode, ConfigError> {
        parse_or(FETCH_MODE_VAR, &self.fetch_mode, FetchMode::default())
    }

    pub fn emulator_host(&self) -> Option<&str> {
        self.emulator_host.as_deref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// データベース接続に必要な値をまとめて解決する
    ///
    /// `DB_PASSWORD` が `DB_SECRET_NAME` より優先。secret を使うには project が要る。
    pub fn database(&self) -> Result<DatabaseSettings, ConfigError> {
        let host = require(DB_HOST_VAR, &self.db_host)?.to_string();
        let name = require(DB_NAME_VAR, &self.db_name)?.to_string();
        let port = parse_or(DB_PORT_VAR, &self.db_port, DEFAULT_DB_PORT)?;
        let max_connections = parse_or(
            DB_MAX_CONNECTIONS_VAR,
            &self.db_max_connections,
            DEFAULT_DB_MAX_CONNECTIONS,
        )?;
        let user = self
            .db_user
            .clone()
            .unwrap_or_else(|| DEFAULT_DB_USER.to_string());

        let credential = match (&self.db_password, &self.db_secret_name) {
            (Some(password), _) => DbCredential::Password(password.clone()),
            (None, Some(secret)) => DbCredential::Secret(SecretName::latest(self.project()?, secret)),
            (None, None) => return Err(ConfigError::Missing(DB_SECRET_NAME_VAR)),
        };

        Ok(DatabaseSettings {
            host,
            name,
            port,
            user,
            max_connections,
            credential,
        })
    }
}

fn require<'a>(var: &'static str, value: &'a Option<String>) -> Result<&'a str, ConfigError> {
    value.as_deref().ok_or(ConfigError::Missing(var))
}

fn parse_or<T>(var: &'static str, value: &Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, raw, &e.to_string())),
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
