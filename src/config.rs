use std::{fs, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::types::{ChatId, Recipient};

const ENV_CONFIG_FILE: &str = "RANGEBOT_CONFIG";
const ENV_BOT_TOKEN: &str = "BOT_TOKEN";
const ENV_LOG_CHAT_ID: &str = "LOG_CHAT_ID";
const ENV_UPSTREAM_BASE: &str = "UPSTREAM_BASE";
const ENV_LOGIN_PATH: &str = "LOGIN_PATH";
const ENV_ALL_PATH: &str = "ALL_PATH";
const ENV_TODAY_PATH: &str = "TODAY_PATH";
const ENV_LOGIN_FORM_RAW: &str = "LOGIN_FORM_RAW";
const ENV_DB_PATH: &str = "RANGEBOT_DB";
const ENV_SUBMIT_DELAY_MS: &str = "RANGEBOT_SUBMIT_DELAY_MS";

const DEFAULT_CONFIG_FILENAME: &str = "rangebot.toml";
const DEFAULT_UPSTREAM_BASE: &str = "http://mysmsportal.com";
const DEFAULT_LOGIN_PATH: &str = "/index.php?login=1";
const DEFAULT_ALL_PATH: &str = "/index.php?opt=shw_all_v2";
const DEFAULT_TODAY_PATH: &str = "/index.php?opt=shw_sts_today";
const DEFAULT_DB_PATH: &str = "alloc_history.db";
const DEFAULT_SUBMIT_DELAY_MS: u64 = 250;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("BOT_TOKEN is not set; export it or add `bot_token` to rangebot.toml")]
    MissingBotToken,
    #[error("{key} must be {expected}, got `{value}`")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("failed to read `{path}`: {message}")]
    File { path: String, message: String },
}

/// Where the portal lives and how to log into it.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub base_url: String,
    pub login_path: String,
    pub all_path: String,
    pub today_path: String,
    /// Raw `key=value&...` credential payload replayed on login.
    pub login_form_raw: String,
}

impl PortalConfig {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UPSTREAM_BASE.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            all_path: DEFAULT_ALL_PATH.to_string(),
            today_path: DEFAULT_TODAY_PATH.to_string(),
            login_form_raw: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub admin_chat: Option<Recipient>,
    pub portal: PortalConfig,
    pub db_path: PathBuf,
    pub submit_delay: Duration,
}

/// Optional `rangebot.toml`; every key is overridden by its env variable.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FileConfig {
    bot_token: Option<String>,
    log_chat_id: Option<ChatSetting>,
    upstream_base: Option<String>,
    login_path: Option<String>,
    all_path: Option<String>,
    today_path: Option<String>,
    login_form_raw: Option<String>,
    db_path: Option<String>,
    submit_delay_ms: Option<u64>,
}

/// `log_chat_id` may be written as a bare number or as a quoted string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatSetting {
    Id(i64),
    Name(String),
}

impl FileConfig {
    fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(ENV_CONFIG_FILE).ok();
        let path = explicit
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_FILENAME.to_string());
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            // Only an explicitly named file has to exist.
            Err(_) if explicit.is_none() => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::File {
                    path,
                    message: e.to_string(),
                });
            }
        };
        Self::parse(&text).map_err(|message| ConfigError::File { path, message })
    }

    pub(crate) fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| format!("not valid TOML: {e}"))
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let file = FileConfig::load()?;
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    pub(crate) fn resolve<F>(file: FileConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |key: &str, fallback: Option<String>| {
            env(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .or(fallback)
        };

        let bot_token = pick(ENV_BOT_TOKEN, file.bot_token).ok_or(ConfigError::MissingBotToken)?;

        let admin_chat = match env(ENV_LOG_CHAT_ID).filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(admin_recipient(&raw)?),
            None => match file.log_chat_id {
                Some(ChatSetting::Id(id)) => Some(Recipient::Chat(ChatId(id))),
                Some(ChatSetting::Name(raw)) => Some(admin_recipient(&raw)?),
                None => None,
            },
        };

        let submit_delay_ms = match env(ENV_SUBMIT_DELAY_MS).filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_SUBMIT_DELAY_MS,
                expected: "a number of milliseconds",
                value: raw.clone(),
            })?,
            None => file.submit_delay_ms.unwrap_or(DEFAULT_SUBMIT_DELAY_MS),
        };

        let defaults = PortalConfig::default();
        let portal = PortalConfig {
            base_url: pick(ENV_UPSTREAM_BASE, file.upstream_base).unwrap_or(defaults.base_url),
            login_path: pick(ENV_LOGIN_PATH, file.login_path).unwrap_or(defaults.login_path),
            all_path: pick(ENV_ALL_PATH, file.all_path).unwrap_or(defaults.all_path),
            today_path: pick(ENV_TODAY_PATH, file.today_path).unwrap_or(defaults.today_path),
            login_form_raw: pick(ENV_LOGIN_FORM_RAW, file.login_form_raw).unwrap_or_default(),
        };

        Ok(Self {
            bot_token,
            admin_chat,
            portal,
            db_path: PathBuf::from(
                pick(ENV_DB_PATH, file.db_path).unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            ),
            submit_delay: Duration::from_millis(submit_delay_ms),
        })
    }
}

fn admin_recipient(raw: &str) -> Result<Recipient, ConfigError> {
    Recipient::parse(raw).ok_or_else(|| ConfigError::Invalid {
        key: ENV_LOG_CHAT_ID,
        expected: "a numeric chat id or an @channel username",
        value: raw.to_string(),
    })
}
