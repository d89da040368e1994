use crate::error::{SyncError, status_error};
use crate::models::CalendarEvent;
use crate::time_window::TimeWindow;
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
struct EventsListResponse {
    items: Option<Vec<CalendarEvent>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// List the events starting inside `window`, recurring events expanded, ordered by start.
pub fn list_events(
    client: &Client,
    api_base: &str,
    access_token: &str,
    calendar_id: &str,
    window: &TimeWindow,
) -> Result<Vec<CalendarEvent>, SyncError> {
    let url = events_url(api_base, calendar_id)?;
    let time_min = window.time_min();
    let time_max = window.time_max();

    let mut events = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let mut query = vec![
            ("timeMin", time_min.as_str()),
            ("timeMax", time_max.as_str()),
            ("singleEvents", "true"),
            ("orderBy", "startTime"),
        ];
        if let Some(token) = page_token.as_deref() {
            query.push(("pageToken", token));
        }

        let resp = client
            .get(url.clone())
            .bearer_auth(access_token)
            .query(&query)
            .send()
            .map_err(SyncError::request)?;

        if !resp.status().is_success() {
            return Err(status_error("Calendar list", resp));
        }

        let body: EventsListResponse = resp.json().map_err(SyncError::request)?;
        let items = body.items.unwrap_or_default();
        debug!(count = items.len(), "fetched calendar page");
        events.extend(items.into_iter().filter(|event| !event.is_cancelled()));

        match body.next_page_token {
            Some(next) if !next.is_empty() => page_token = Some(next),
            _ => break,
        }
    }

    Ok(events)
}

/// `{api_base}/calendars/{calendar_id}/events` with the id encoded as one path segment.
fn events_url(api_base: &str, calendar_id: &str) -> Result<Url, SyncError> {
    let mut url = Url::parse(api_base).map_err(SyncError::request)?;
    url.path_segments_mut()
        .map_err(|_| SyncError::Request(format!("{api_base} cannot be a base URL")))?
        .pop_if_empty()
        .push("calendars")
        .push(calendar_id)
        .push("events");
    Ok(url)
}
