use serde::{Deserialize, Serialize};

/// A Google Calendar event as returned by `events.list`.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct CalendarEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    pub start: EventDateTime,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct EventDateTime {
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl CalendarEvent {
    pub fn title(&self) -> &str {
        match self.summary.as_deref().map(str::trim) {
            Some(summary) if !summary.is_empty() => summary,
            _ => "(No title)",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }
}

/// The task Taiga returns after creation.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct SyncedTask {
    pub id: u64,
    #[serde(rename = "ref", default)]
    pub reference: Option<u64>,
    pub subject: String,
}

#[derive(Default, Debug, PartialEq)]
pub struct SyncReport {
    pub events_fetched: usize,
    pub tasks_created: usize,
    pub tasks_failed: usize,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        format!(
            "Events {} | Tasks +{} | Failed {}",
            self.events_fetched, self.tasks_created, self.tasks_failed
        )
    }
}
