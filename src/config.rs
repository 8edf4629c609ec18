use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub push: PushConfig,
    pub cron: CronConfig,
    pub reminders: ReminderConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret used by the auth provider to sign session tokens.
    pub jwt_secret: String,
}

/// Raw VAPID settings as read from the environment. Validation happens once at
/// startup in `services::push::VapidConfig::from_settings`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushConfig {
    pub vapid_public_key: Option<String>,
    pub vapid_private_key: Option<String>,
    /// Contact identifier (`mailto:` or `https:` URI).
    pub vapid_subject: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CronConfig {
    /// Shared secret expected as `Authorization: Bearer <secret>` on the cron
    /// endpoint. `None` disables the check.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReminderConfig {
    /// Offset from UTC used to compute the local hour of day for brackets.
    pub utc_offset_hours: i32,
    /// Whether the in-process reminder scheduler is enabled.
    pub scheduler_enabled: bool,
    /// Local hours at which the in-process scheduler fires.
    pub schedule_hours: Vec<u32>,
    /// Language used for reminder copy.
    pub lang: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for /api/push endpoints
    pub push_per_second: u32,
    /// Burst size for /api/push endpoints
    pub push_burst: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/app.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            auth: AuthConfig {
                jwt_secret: env::var("SUPABASE_JWT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("SUPABASE_JWT_SECRET".to_string()))?,
            },
            push: PushConfig {
                vapid_public_key: non_empty_env("VAPID_PUBLIC_KEY"),
                vapid_private_key: non_empty_env("VAPID_PRIVATE_KEY"),
                vapid_subject: non_empty_env("VAPID_SUBJECT"),
            },
            cron: CronConfig {
                secret: non_empty_env("CRON_SECRET"),
            },
            reminders: ReminderConfig {
                utc_offset_hours: match env::var("REMINDER_UTC_OFFSET_HOURS") {
                    Ok(v) => parse_utc_offset(&v).ok_or_else(|| {
                        ConfigError::InvalidValue("REMINDER_UTC_OFFSET_HOURS".to_string())
                    })?,
                    Err(_) => -5,
                },
                scheduler_enabled: parse_bool(env::var("REMINDER_SCHEDULER_ENABLED").ok(), false),
                schedule_hours: match env::var("REMINDER_SCHEDULE_HOURS") {
                    Ok(v) => parse_schedule_hours(&v).ok_or_else(|| {
                        ConfigError::InvalidValue("REMINDER_SCHEDULE_HOURS".to_string())
                    })?,
                    Err(_) => vec![17, 21],
                },
                lang: match env::var("REMINDER_LANG") {
                    Ok(v) => parse_lang(&v)?,
                    Err(_) => crate::i18n::DEFAULT_LANG.to_string(),
                },
            },
            rate_limit: RateLimitConfig {
                push_per_second: env::var("RATE_LIMIT_PUSH_PER_SECOND")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
                push_burst: env::var("RATE_LIMIT_PUSH_BURST")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
        })
    }
}

/// Reads an env var, treating unset and blank values the same way.
fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        None => default,
    }
}

fn parse_utc_offset(raw: &str) -> Option<i32> {
    let offset: i32 = raw.trim().parse().ok()?;
    (-12..=14).contains(&offset).then_some(offset)
}

/// Parses a comma separated list of hours ("17,21"). Duplicates are removed and
/// the result is sorted.
fn parse_schedule_hours(raw: &str) -> Option<Vec<u32>> {
    let mut hours = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let hour: u32 = part.parse().ok()?;
        if hour > 23 {
            return None;
        }
        hours.push(hour);
    }
    hours.sort_unstable();
    hours.dedup();
    if hours.is_empty() {
        None
    } else {
        Some(hours)
    }
}

fn parse_lang(raw: &str) -> Result<String, ConfigError> {
    let lang = crate::i18n::normalize_language(raw);
    if crate::i18n::is_supported_language(&lang) {
        Ok(lang)
    } else {
        Err(ConfigError::InvalidValue(crate::i18n::t_with(
            "error.unsupported_language",
            &[("lang", raw)],
        )))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/app.db".to_string(),
                max_connections: 5,
            },
            auth: AuthConfig {
                jwt_secret: String::new(),
            },
            push: PushConfig::default(),
            cron: CronConfig::default(),
            reminders: ReminderConfig {
                utc_offset_hours: -5,
                scheduler_enabled: false,
                schedule_hours: vec![17, 21],
                lang: crate::i18n::DEFAULT_LANG.to_string(),
            },
            rate_limit: RateLimitConfig {
                push_per_second: 2,
                push_burst: 10,
            },
        }
    }
}
