use crate::config::TaigaSettings;
use crate::error::{SyncError, status_error};
use crate::models::{CalendarEvent, SyncedTask};
use crate::time_window::local_midnight;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

#[derive(Serialize)]
struct AuthRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    auth_token: String,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct TaskCreateRequest {
    pub project: u64,
    pub user_story: u64,
    pub subject: String,
}

/// Log in with username and password. Failures are logged and yield `None`.
pub fn auth_token(client: &Client, taiga: &TaigaSettings) -> Option<String> {
    match request_auth_token(client, taiga) {
        Ok(token) => Some(token),
        Err(err) => {
            error!("Error authenticating with Taiga: {err}");
            None
        }
    }
}

fn request_auth_token(client: &Client, taiga: &TaigaSettings) -> Result<String, SyncError> {
    let url = format!("{}/api/v1/auth", taiga.api_url);
    debug!(%url, username = %taiga.username, "authenticating with Taiga");
    let resp = client
        .post(url)
        .json(&AuthRequest {
            kind: "normal",
            username: &taiga.username,
            password: &taiga.password,
        })
        .send()
        .map_err(SyncError::request)?;

    if !resp.status().is_success() {
        return Err(status_error("Taiga auth", resp));
    }

    let body: AuthResponse = resp.json().map_err(SyncError::request)?;
    Ok(body.auth_token)
}

/// Create one task for `event`. Failures are logged and yield `None`.
pub fn create_task(
    client: &Client,
    taiga: &TaigaSettings,
    auth_token: &str,
    event: &CalendarEvent,
    tz: Tz,
) -> Option<SyncedTask> {
    let payload = TaskCreateRequest {
        project: taiga.project_id,
        user_story: taiga.user_story_id,
        subject: task_subject(event, tz),
    };
    match post_task(client, taiga, auth_token, &payload) {
        Ok(task) => Some(task),
        Err(err) => {
            error!(
                "Error creating Taiga task for event '{}': {err}",
                event.title()
            );
            None
        }
    }
}

fn post_task(
    client: &Client,
    taiga: &TaigaSettings,
    auth_token: &str,
    payload: &TaskCreateRequest,
) -> Result<SyncedTask, SyncError> {
    let resp = client
        .post(format!("{}/api/v1/tasks", taiga.api_url))
        .bearer_auth(auth_token)
        .json(payload)
        .send()
        .map_err(SyncError::request)?;

    if !resp.status().is_success() {
        return Err(status_error("Taiga task creation", resp));
    }

    resp.json().map_err(SyncError::request)
}

/// `"<summary> - YYYY-MM-DD HH:MM TZ"` with the start shown in `tz`.
pub fn task_subject(event: &CalendarEvent, tz: Tz) -> String {
    let start = match event_start(event, tz) {
        Some(start) => start.format("%Y-%m-%d %H:%M %Z").to_string(),
        None => {
            let raw = event
                .start
                .date_time
                .as_deref()
                .or(event.start.date.as_deref())
                .unwrap_or_default();
            warn!(start = raw, "Unparseable start for event '{}'", event.title());
            raw.to_string()
        }
    };
    format!("{} - {}", event.title(), start)
}

/// Timed events convert to `tz`; all-day events start at local midnight in `tz`.
pub fn event_start(event: &CalendarEvent, tz: Tz) -> Option<DateTime<Tz>> {
    if let Some(date_time) = event.start.date_time.as_deref() {
        return DateTime::parse_from_rfc3339(date_time)
            .ok()
            .map(|dt| dt.with_timezone(&tz));
    }
    let date = NaiveDate::parse_from_str(event.start.date.as_deref()?, "%Y-%m-%d").ok()?;
    Some(local_midnight(date, tz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventDateTime;
    use mockito::Matcher;
    use serde_json::json;

    fn timed(summary: &str, date_time: &str) -> CalendarEvent {
        CalendarEvent {
            id: None,
            status: None,
            summary: Some(summary.to_string()),
            start: EventDateTime {
                date_time: Some(date_time.to_string()),
                date: None,
            },
        }
    }

    fn settings(api_url: &str) -> TaigaSettings {
        TaigaSettings {
            api_url: api_url.to_string(),
            username: "alice".to_string(),
            password: "hunter2".to_string(),
            project_id: 42,
            user_story_id: 7,
        }
    }

    #[test]
    fn subject_localizes_start_to_configured_zone() {
        let event = timed("Standup", "2024-03-01T09:00:00Z");
        assert_eq!(
            task_subject(&event, chrono_tz::America::New_York),
            "Standup - 2024-03-01 04:00 EST"
        );
    }

    #[test]
    fn subject_uses_daylight_abbreviation_in_summer() {
        let event = timed("Retro", "2024-07-15T16:30:00+02:00");
        assert_eq!(
            task_subject(&event, chrono_tz::America::New_York),
            "Retro - 2024-07-15 10:30 EDT"
        );
    }

    #[test]
    fn all_day_event_starts_at_local_midnight() {
        let event = CalendarEvent {
            id: None,
            status: None,
            summary: Some("Offsite".to_string()),
            start: EventDateTime {
                date_time: None,
                date: Some("2024-03-01".to_string()),
            },
        };
        assert_eq!(
            task_subject(&event, chrono_tz::Europe::Berlin),
            "Offsite - 2024-03-01 00:00 CET"
        );
    }

    #[test]
    fn untitled_and_unparseable_events_still_get_a_subject() {
        let mut event = timed("", "not-a-time");
        event.summary = None;
        assert_eq!(task_subject(&event, chrono_tz::UTC), "(No title) - not-a-time");
    }

    #[test]
    fn auth_posts_normal_login_and_returns_token() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/api/v1/auth")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({
                "type": "normal",
                "username": "alice",
                "password": "hunter2"
            })))
            .with_status(200)
            .with_body(r#"{"id":1,"username":"alice","auth_token":"tok-abc","refresh":"r"}"#)
            .create();

        let token = auth_token(&Client::new(), &settings(&server.url()));
        mock.assert();
        assert_eq!(token.as_deref(), Some("tok-abc"));
    }

    #[test]
    fn auth_failure_yields_no_token() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/api/v1/auth")
            .with_status(401)
            .with_body(r#"{"_error_message":"Username or password does not matches user."}"#)
            .create();

        assert_eq!(auth_token(&Client::new(), &settings(&server.url())), None);
    }

    #[test]
    fn create_task_sends_bearer_token_and_payload() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/api/v1/tasks")
            .match_header("authorization", "Bearer tok-abc")
            .match_body(Matcher::Json(json!({
                "project": 42,
                "user_story": 7,
                "subject": "Standup - 2024-03-01 04:00 EST"
            })))
            .with_status(201)
            .with_body(r#"{"id":900,"ref":15,"subject":"Standup - 2024-03-01 04:00 EST","project":42}"#)
            .create();

        let task = create_task(
            &Client::new(),
            &settings(&server.url()),
            "tok-abc",
            &timed("Standup", "2024-03-01T09:00:00Z"),
            chrono_tz::America::New_York,
        )
        .expect("task");

        mock.assert();
        assert_eq!(task.id, 900);
        assert_eq!(task.reference, Some(15));
        assert_eq!(task.subject, "Standup - 2024-03-01 04:00 EST");
    }

    #[test]
    fn create_task_failure_yields_none() {
        let mut server = mockito::Server::new();
        server.mock("POST", "/api/v1/tasks").with_status(500).create();

        let task = create_task(
            &Client::new(),
            &settings(&server.url()),
            "tok-abc",
            &timed("Standup", "2024-03-01T09:00:00Z"),
            chrono_tz::UTC,
        );
        assert_eq!(task, None);
    }
}
