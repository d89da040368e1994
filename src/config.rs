use crate::error::SyncError;
use chrono_tz::Tz;
use directories::ProjectDirs;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";
pub const DEFAULT_TAIGA_API: &str = "https://api.taiga.io";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "taiga-calsync", "taiga-calsync")
}

fn default_config_dir() -> PathBuf {
    if let Some(dirs) = project_dirs() {
        return dirs.config_dir().to_path_buf();
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_data_dir() -> PathBuf {
    if let Some(dirs) = project_dirs() {
        return dirs.data_dir().to_path_buf();
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("CALSYNC_CONFIG") {
        return PathBuf::from(path);
    }
    default_config_dir().join("config.toml")
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub timezone: String,
    pub google: GoogleConfig,
    pub taiga: TaigaConfig,
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
            google: GoogleConfig::default(),
            taiga: TaigaConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GoogleConfig {
    /// Client-secret descriptor downloaded from the Google Cloud console.
    pub credentials_path: PathBuf,
    /// Cached authorized-user token, rewritten on every refresh.
    pub token_path: PathBuf,
    pub calendar_id: String,
    pub api_base: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_config_dir().join("credentials.json"),
            token_path: default_data_dir().join("token.json"),
            calendar_id: "primary".to_string(),
            api_base: DEFAULT_CALENDAR_API.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TaigaConfig {
    pub api_url: String,
    pub username: String,
    pub password: String,
    #[serde(deserialize_with = "id_text")]
    pub project_id: String,
    #[serde(deserialize_with = "id_text")]
    pub user_story_id: String,
}

/// Ids may be written as `42` or `"42"` in the config file.
fn id_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(u64),
        Text(String),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Number(id) => id.to_string(),
        Id::Text(text) => text,
    })
}

impl Default for TaigaConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_TAIGA_API.to_string(),
            username: String::new(),
            password: String::new(),
            project_id: String::new(),
            user_story_id: String::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HttpConfig {
    /// Unset means the HTTP library defaults apply.
    pub timeout_seconds: Option<u64>,
}

/// Validated configuration for a single run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub timezone: Tz,
    pub google: GoogleConfig,
    pub taiga: TaigaSettings,
    pub http: HttpConfig,
}

#[derive(Debug, Clone)]
pub struct TaigaSettings {
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub project_id: u64,
    pub user_story_id: u64,
}

impl Config {
    /// Read the TOML file at `path`. Only a non-`required` file may be absent.
    pub fn load(path: &Path, required: bool) -> Result<Self, SyncError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound && !required => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Config::default());
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SyncError::Config(vec![format!(
                    "config file {} not found",
                    path.display()
                )]));
            }
            Err(err) => return Err(err.into()),
        };
        toml::from_str::<Config>(&content)
            .map_err(|e| SyncError::Config(vec![format!("{}: {e}", path.display())]))
    }

    /// Overlay environment variables on top of the file values.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("TIMEZONE") {
            self.timezone = value;
        }
        if let Some(value) = get("GOOGLE_CREDENTIALS_FILE") {
            self.google.credentials_path = PathBuf::from(value);
        }
        if let Some(value) = get("GOOGLE_TOKEN_FILE") {
            self.google.token_path = PathBuf::from(value);
        }
        if let Some(value) = get("GOOGLE_CALENDAR_ID") {
            self.google.calendar_id = value;
        }
        if let Some(value) = get("TAIGA_API_URL") {
            self.taiga.api_url = value;
        }
        if let Some(value) = get("TAIGA_USERNAME") {
            self.taiga.username = value;
        }
        if let Some(value) = get("TAIGA_PASSWORD") {
            self.taiga.password = value;
        }
        if let Some(value) = get("TAIGA_PROJECT_ID") {
            self.taiga.project_id = value;
        }
        if let Some(value) = get("TAIGA_USER_STORY_ID") {
            self.taiga.user_story_id = value;
        }
    }

    /// Check every field and report all problems in one error.
    pub fn resolve(self) -> Result<Settings, SyncError> {
        let mut problems = Vec::new();

        let timezone_name = if self.timezone.trim().is_empty() {
            DEFAULT_TIMEZONE
        } else {
            self.timezone.trim()
        };
        let timezone = match timezone_name.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                problems.push(format!("unknown TIMEZONE {timezone_name:?}"));
                None
            }
        };

        if self.taiga.username.trim().is_empty() {
            problems.push("missing TAIGA_USERNAME".to_string());
        }
        if self.taiga.password.is_empty() {
            problems.push("missing TAIGA_PASSWORD".to_string());
        }
        let project_id = parse_id("TAIGA_PROJECT_ID", &self.taiga.project_id, &mut problems);
        let user_story_id =
            parse_id("TAIGA_USER_STORY_ID", &self.taiga.user_story_id, &mut problems);

        if self.google.calendar_id.trim().is_empty() {
            problems.push("google.calendar_id must not be empty".to_string());
        }

        match (timezone, project_id, user_story_id) {
            (Some(timezone), Some(project_id), Some(user_story_id)) if problems.is_empty() => {
                Ok(Settings {
                    timezone,
                    google: self.google,
                    taiga: TaigaSettings {
                        api_url: self.taiga.api_url.trim_end_matches('/').to_string(),
                        username: self.taiga.username.trim().to_string(),
                        password: self.taiga.password,
                        project_id,
                        user_story_id,
                    },
                    http: self.http,
                })
            }
            _ => Err(SyncError::Config(problems)),
        }
    }
}

fn parse_id(name: &str, raw: &str, problems: &mut Vec<String>) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        problems.push(format!("missing {name}"));
        return None;
    }
    match raw.parse::<u64>() {
        Ok(id) => Some(id),
        Err(_) => {
            problems.push(format!("{name} must be a numeric id, got {raw:?}"));
            None
        }
    }
}
