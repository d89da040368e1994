use crate::error::{SyncError, truncate_error};
use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration as StdDuration, Instant};
use tracing::{debug, info};

pub const CALENDAR_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/calendar.readonly";
const OAUTH_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const EXPIRY_SKEW_SECONDS: i64 = 60;
const REDIRECT_READ_TIMEOUT_SECONDS: u64 = 5;

/// Cached calendar credential. Field names match Google's authorized-user token file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoredToken {
    #[serde(rename = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl StoredToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expiry {
            Some(expiry) => expiry > now + Duration::seconds(EXPIRY_SKEW_SECONDS),
            None => true,
        }
    }

    fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }
}

fn default_token_uri() -> String {
    OAUTH_TOKEN_URL.to_string()
}

fn default_auth_uri() -> String {
    OAUTH_AUTH_URL.to_string()
}

#[derive(Deserialize, Clone, Debug)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Auth(format!(
                "cannot read client secrets {}: {e}",
                path.display()
            ))
        })?;
        let file: ClientSecretsFile = serde_json::from_str(&content)?;
        file.installed.or(file.web).ok_or_else(|| {
            SyncError::Auth(format!(
                "{} has neither an \"installed\" nor a \"web\" client",
                path.display()
            ))
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Obtains a brand-new credential, usually with the user's help.
pub trait Authorizer {
    fn authorize(&self, client: &Client, secrets: &ClientSecrets) -> Result<StoredToken, SyncError>;
}

/// JSON token file on disk.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<StoredToken>, SyncError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, token: &StoredToken) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(token)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    /// Exchange the refresh token for a new access token and persist the result.
    pub fn refresh(&self, client: &Client, token: &StoredToken) -> Result<StoredToken, SyncError> {
        let refresh_token = token.refresh_token.as_deref().unwrap_or_default();
        let resp = client
            .post(&token.token_uri)
            .form(&[
                ("client_id", token.client_id.as_str()),
                ("client_secret", token.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .map_err(SyncError::request)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(SyncError::Auth(format!(
                "token refresh failed: {}",
                format_oauth_error(status, &body)
            )));
        }

        let response: TokenResponse = resp.json().map_err(SyncError::request)?;
        let refreshed = StoredToken {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .or_else(|| token.refresh_token.clone()),
            token_uri: token.token_uri.clone(),
            client_id: token.client_id.clone(),
            client_secret: token.client_secret.clone(),
            scopes: response
                .scope
                .map(split_scopes)
                .unwrap_or_else(|| token.scopes.clone()),
            expiry: response.expires_in.map(expiry_from_now),
        };
        self.save(&refreshed)?;
        Ok(refreshed)
    }
}

/// Return a usable calendar credential, refreshing or re-authorizing as needed.
pub fn ensure_credential(
    client: &Client,
    store: &CredentialStore,
    secrets_path: &Path,
    authorizer: &dyn Authorizer,
) -> Result<StoredToken, SyncError> {
    if let Some(token) = store.load()? {
        if token.is_valid_at(Utc::now()) {
            debug!(path = %store.path().display(), "using cached calendar credential");
            return Ok(token);
        }
        if token.can_refresh() {
            info!("Refreshing expired calendar credential");
            return store.refresh(client, &token);
        }
    }

    info!("No usable calendar credential, starting authorization");
    let secrets = ClientSecrets::load(secrets_path)?;
    let token = authorizer.authorize(client, &secrets)?;
    store.save(&token)?;
    info!(path = %store.path().display(), "Saved calendar credential");
    Ok(token)
}

/// Installed-app flow: the browser redirects back to a one-shot listener on 127.0.0.1.
pub struct LoopbackAuthorizer {
    pub timeout: StdDuration,
    pub open_browser: bool,
}

impl Default for LoopbackAuthorizer {
    fn default() -> Self {
        Self {
            timeout: StdDuration::from_secs(10 * 60),
            open_browser: true,
        }
    }
}

impl Authorizer for LoopbackAuthorizer {
    fn authorize(&self, client: &Client, secrets: &ClientSecrets) -> Result<StoredToken, SyncError> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let redirect_uri = format!("http://{addr}/");
        let state = generate_state();

        let auth_url = Url::parse_with_params(
            &secrets.auth_uri,
            [
                ("client_id", secrets.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", CALENDAR_READONLY_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| SyncError::Auth(e.to_string()))?
        .to_string();

        println!("Please visit this URL to authorize calendar access:\n\n    {auth_url}\n");
        if self.open_browser
            && let Err(err) = open::that(&auth_url)
        {
            debug!(error = %err, "could not launch a browser");
        }

        let code = receive_code(&listener, &state, Instant::now() + self.timeout)?;

        let resp = client
            .post(&secrets.token_uri)
            .form(&[
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.as_str()),
                ("code", code.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .map_err(SyncError::request)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(SyncError::Auth(format!(
                "code exchange failed: {}",
                format_oauth_error(status, &body)
            )));
        }

        let response: TokenResponse = resp.json().map_err(SyncError::request)?;
        Ok(StoredToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            token_uri: secrets.token_uri.clone(),
            client_id: secrets.client_id.clone(),
            client_secret: secrets.client_secret.clone(),
            scopes: response
                .scope
                .map(split_scopes)
                .unwrap_or_else(|| vec![CALENDAR_READONLY_SCOPE.to_string()]),
            expiry: response.expires_in.map(expiry_from_now),
        })
    }
}

fn receive_code(listener: &TcpListener, state: &str, deadline: Instant) -> Result<String, SyncError> {
    listener.set_nonblocking(true)?;
    loop {
        if Instant::now() >= deadline {
            return Err(SyncError::Auth(
                "timed out waiting for the authorization redirect".to_string(),
            ));
        }

        match listener.accept() {
            // Browsers may preconnect without sending anything, or send
            // requests that carry no OAuth parameters.
            Ok((mut stream, addr)) => match handle_redirect(&mut stream, state) {
                Ok(Some(result)) => return result,
                Ok(None) => {}
                Err(err) => debug!(%addr, error = %err, "ignoring unreadable connection"),
            },
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(StdDuration::from_millis(200));
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn handle_redirect(
    stream: &mut TcpStream,
    state: &str,
) -> Result<Option<Result<String, SyncError>>, SyncError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(StdDuration::from_secs(REDIRECT_READ_TIMEOUT_SECONDS)))?;
    let mut request_line = String::new();
    {
        let mut reader = BufReader::new(&*stream);
        reader.read_line(&mut request_line)?;
        // Drain headers so closing the socket does not reset the connection.
        let mut header = String::new();
        while reader.read_line(&mut header)? > 0 && !header.trim().is_empty() {
            header.clear();
        }
    }

    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    let params: HashMap<String, String> = Url::parse(&format!("http://localhost{target}"))
        .map(|url| url.query_pairs().into_owned().collect())
        .unwrap_or_default();

    if let Some(error) = params.get("error") {
        let desc = params
            .get("error_description")
            .map(|s| format!(" ({s})"))
            .unwrap_or_default();
        let _ = respond_with_message(stream, &format!("Authorization failed: {error}{desc}"));
        return Ok(Some(Err(SyncError::Auth(format!("{error}{desc}")))));
    }

    let Some(code) = params.get("code") else {
        let _ = respond_with_message(stream, "Waiting for authorization.");
        return Ok(None);
    };

    if params.get("state").map(String::as_str) != Some(state) {
        let _ = respond_with_message(stream, "Invalid state.");
        return Ok(Some(Err(SyncError::Auth(
            "state mismatch in authorization redirect".to_string(),
        ))));
    }

    let _ = respond_with_message(stream, "Authorization complete. You can close this window.");
    Ok(Some(Ok(code.clone())))
}

fn respond_with_message(stream: &mut TcpStream, message: &str) -> io::Result<()> {
    let body = format!("{message}\n");
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())
}

fn generate_state() -> String {
    use rand::{Rng, distributions::Alphanumeric};
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn expiry_from_now(expires_in: i64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(expires_in)
}

fn split_scopes(scope: String) -> Vec<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

fn format_oauth_error(status: reqwest::StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("HTTP {status}");
    }

    let summary = if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(trimmed) {
        if let Some(desc) = err.error_description {
            format!("{} ({})", desc, err.error)
        } else {
            err.error
        }
    } else {
        truncate_error(trimmed)
    };
    format!("HTTP {status}: {summary}")
}
