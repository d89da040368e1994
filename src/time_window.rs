use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;

/// Bounds of one local calendar day, used as the event query window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeWindow {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl TimeWindow {
    pub fn date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    pub fn time_min(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::AutoSi, false)
    }

    pub fn time_max(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::AutoSi, false)
    }
}

pub fn get_day_boundaries(tz: Tz) -> TimeWindow {
    day_boundaries_at(Utc::now(), tz)
}

/// Local midnight of `now`'s day in `tz`, through one microsecond before the next midnight.
pub fn day_boundaries_at(now: DateTime<Utc>, tz: Tz) -> TimeWindow {
    let date = now.with_timezone(&tz).date_naive();
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    let last_tick = midnight + Duration::days(1) - Duration::microseconds(1);
    TimeWindow {
        start: localize(tz, midnight, Edge::Earliest),
        end: localize(tz, last_tick, Edge::Latest),
    }
}

/// Midnight of an all-day event's date in `tz`.
pub fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Tz> {
    localize(tz, date.and_time(chrono::NaiveTime::MIN), Edge::Earliest)
}

#[derive(Clone, Copy)]
enum Edge {
    Earliest,
    Latest,
}

fn localize(tz: Tz, naive: NaiveDateTime, edge: Edge) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(first, second) => match edge {
            Edge::Earliest => first,
            Edge::Latest => second,
        },
        // Inside a DST gap: step forward to the first wall-clock minute that exists.
        LocalResult::None => {
            let mut candidate = naive;
            for _ in 0..(24 * 60) {
                candidate += Duration::minutes(1);
                if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
                    return dt;
                }
            }
            tz.from_utc_datetime(&naive)
        }
    }
}
