use crate::config::Settings;
use crate::integrations::{google, taiga};
use crate::models::{CalendarEvent, SyncReport};
use crate::time_window::{TimeWindow, get_day_boundaries};
use reqwest::blocking::Client;
use tracing::{debug, error, info};

/// Fetch today's events, falling back to an empty list on any error.
pub fn fetch_today(
    client: &Client,
    settings: &Settings,
    access_token: &str,
    window: &TimeWindow,
) -> Vec<CalendarEvent> {
    info!(
        "Fetching events for {} in {}",
        window.date(),
        settings.timezone
    );
    let events = match google::list_events(
        client,
        &settings.google.api_base,
        access_token,
        &settings.google.calendar_id,
        window,
    ) {
        Ok(events) => events,
        Err(err) => {
            error!("An error occurred while fetching events: {err}");
            return Vec::new();
        }
    };
    if events.is_empty() {
        info!("No events found for today.");
    }
    events
}

pub fn run(
    client: &Client,
    settings: &Settings,
    access_token: &str,
    dry_run: bool,
) -> SyncReport {
    let window = get_day_boundaries(settings.timezone);
    run_for_window(client, settings, access_token, &window, dry_run)
}

pub fn run_for_window(
    client: &Client,
    settings: &Settings,
    access_token: &str,
    window: &TimeWindow,
    dry_run: bool,
) -> SyncReport {
    let mut report = SyncReport::default();
    let events = fetch_today(client, settings, access_token, window);
    report.events_fetched = events.len();
    if events.is_empty() {
        return report;
    }

    if dry_run {
        for event in &events {
            info!(
                "Would create Taiga task: {}",
                taiga::task_subject(event, settings.timezone)
            );
        }
        return report;
    }

    let Some(auth_token) = taiga::auth_token(client, &settings.taiga) else {
        error!("Failed to authenticate with Taiga. Exiting.");
        report.tasks_failed = events.len();
        return report;
    };

    for event in &events {
        debug!(event_id = ?event.id, "syncing event");
        match taiga::create_task(client, &settings.taiga, &auth_token, event, settings.timezone) {
            Some(task) => {
                info!(task_id = task.id, task_ref = ?task.reference, "Created Taiga task: {}", task.subject);
                report.tasks_created += 1;
            }
            None => report.tasks_failed += 1,
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GoogleConfig, HttpConfig, TaigaSettings};
    use crate::time_window::day_boundaries_at;
    use chrono::{DateTime, Utc};
    use mockito::{Matcher, Mock, ServerGuard};

    fn settings(server: &ServerGuard) -> Settings {
        Settings {
            timezone: chrono_tz::America::New_York,
            google: GoogleConfig {
                api_base: server.url(),
                ..GoogleConfig::default()
            },
            taiga: TaigaSettings {
                api_url: server.url(),
                username: "alice".to_string(),
                password: "hunter2".to_string(),
                project_id: 42,
                user_story_id: 7,
            },
            http: HttpConfig::default(),
        }
    }

    fn window() -> TimeWindow {
        let now = DateTime::parse_from_rfc3339("2024-03-01T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        day_boundaries_at(now, chrono_tz::America::New_York)
    }

    fn events_mock(server: &mut ServerGuard, body: &str) -> Mock {
        server
            .mock("GET", "/calendars/primary/events")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body)
            .create()
    }

    const THREE_EVENTS: &str = r#"{"items":[
        {"summary":"Standup","start":{"dateTime":"2024-03-01T09:00:00Z"}},
        {"summary":"Lunch","start":{"dateTime":"2024-03-01T17:00:00Z"}},
        {"summary":"Review","start":{"dateTime":"2024-03-01T20:00:00Z"}}
    ]}"#;

    fn auth_mock(server: &mut ServerGuard, expected: usize) -> Mock {
        server
            .mock("POST", "/api/v1/auth")
            .with_status(200)
            .with_body(r#"{"auth_token":"tok"}"#)
            .expect(expected)
            .create()
    }

    fn task_mock(server: &mut ServerGuard, subject: &str, status: usize, expected: usize) -> Mock {
        server
            .mock("POST", "/api/v1/tasks")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::PartialJsonString(format!(r#"{{"subject":"{subject}"}}"#)))
            .with_status(status)
            .with_body(format!(r#"{{"id":1,"subject":"{subject}"}}"#))
            .expect(expected)
            .create()
    }

    #[test]
    fn no_events_means_no_taiga_calls() {
        let mut server = mockito::Server::new();
        let _events = events_mock(&mut server, r#"{"items":[]}"#);
        let auth = auth_mock(&mut server, 0);
        let settings = settings(&server);

        let report = run_for_window(&Client::new(), &settings, "access", &window(), false);

        auth.assert();
        assert_eq!(report, SyncReport::default());
    }

    #[test]
    fn fetch_failure_is_treated_as_no_events() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/calendars/primary/events")
            .match_query(Matcher::Any)
            .with_status(503)
            .create();
        let auth = auth_mock(&mut server, 0);
        let settings = settings(&server);

        let report = run_for_window(&Client::new(), &settings, "access", &window(), false);

        auth.assert();
        assert_eq!(report.events_fetched, 0);
    }

    #[test]
    fn failed_auth_creates_no_tasks() {
        let mut server = mockito::Server::new();
        let _events = events_mock(&mut server, THREE_EVENTS);
        let _auth = server.mock("POST", "/api/v1/auth").with_status(400).create();
        let tasks = server
            .mock("POST", "/api/v1/tasks")
            .expect(0)
            .create();
        let settings = settings(&server);

        let report = run_for_window(&Client::new(), &settings, "access", &window(), false);

        tasks.assert();
        assert_eq!(
            report,
            SyncReport {
                events_fetched: 3,
                tasks_created: 0,
                tasks_failed: 3,
            }
        );
        assert_eq!(report.summary(), "Events 3 | Tasks +0 | Failed 3");
    }

    #[test]
    fn one_task_per_event_with_failures_isolated() {
        let mut server = mockito::Server::new();
        let _events = events_mock(&mut server, THREE_EVENTS);
        let auth = auth_mock(&mut server, 1);
        let first = task_mock(&mut server, "Standup - 2024-03-01 04:00 EST", 201, 1);
        let second = task_mock(&mut server, "Lunch - 2024-03-01 12:00 EST", 500, 1);
        let third = task_mock(&mut server, "Review - 2024-03-01 15:00 EST", 201, 1);
        let settings = settings(&server);

        let report = run_for_window(&Client::new(), &settings, "access", &window(), false);

        auth.assert();
        first.assert();
        second.assert();
        third.assert();
        assert_eq!(
            report,
            SyncReport {
                events_fetched: 3,
                tasks_created: 2,
                tasks_failed: 1,
            }
        );
    }

    #[test]
    fn rerun_creates_duplicate_tasks() {
        let mut server = mockito::Server::new();
        let _events = events_mock(&mut server, r#"{"items":[{"summary":"Standup","start":{"dateTime":"2024-03-01T09:00:00Z"}}]}"#);
        let _auth = auth_mock(&mut server, 2);
        let tasks = task_mock(&mut server, "Standup - 2024-03-01 04:00 EST", 201, 2);
        let settings = settings(&server);
        let client = Client::new();

        for _ in 0..2 {
            let report = run_for_window(&client, &settings, "access", &window(), false);
            assert_eq!(report.tasks_created, 1);
        }
        tasks.assert();
    }

    #[test]
    fn dry_run_never_contacts_taiga() {
        let mut server = mockito::Server::new();
        let _events = events_mock(&mut server, THREE_EVENTS);
        let auth = auth_mock(&mut server, 0);
        let settings = settings(&server);

        let report = run_for_window(&Client::new(), &settings, "access", &window(), true);

        auth.assert();
        assert_eq!(report.events_fetched, 3);
        assert_eq!(report.tasks_created, 0);
    }
}
