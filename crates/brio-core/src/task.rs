use std::cmp::Ordering;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_GROUP: &str = "inbox";

/// A reminder item. `id` is the creation timestamp in milliseconds, bumped
/// on collision, so ids stay unique and roughly ordered by creation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Task {
    pub id: i64,
    pub text: String,
    pub done: bool,
    pub due: Option<DateTime<Utc>>,
    pub group: String,
    /// Minutes of lead time before `due` at which the reminder fires.
    pub alarm_offset: i64,
}

impl Task {
    pub fn new(id: i64, text: String) -> Self {
        Self {
            id,
            text,
            done: false,
            due: None,
            group: DEFAULT_GROUP.to_string(),
            alarm_offset: 0,
        }
    }
}

/// One persisted task line. Older versions stored bare strings, and records
/// written before the group/offset fields existed lack them entirely; both
/// shapes decode here and are normalized to a canonical [`Task`] once, at
/// load time.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TaskRecord {
    Text(String),
    Fields(RawTask),
}

#[derive(Debug, Default, Deserialize)]
pub struct RawTask {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub due: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub alarm_offset: Option<i64>,
}

impl TaskRecord {
    pub fn normalize(self, fallback_id: i64) -> Task {
        match self {
            TaskRecord::Text(text) => Task::new(fallback_id, text),
            TaskRecord::Fields(raw) => Task {
                id: raw.id.unwrap_or(fallback_id),
                text: raw.text,
                done: raw.done,
                due: raw.due.as_deref().and_then(parse_stored_due),
                group: raw
                    .group
                    .filter(|g| !g.is_empty())
                    .unwrap_or_else(|| DEFAULT_GROUP.to_string()),
                alarm_offset: raw.alarm_offset.unwrap_or(0).max(0),
            },
        }
    }
}

/// Current records carry RFC 3339; legacy ones a naive local
/// `YYYY-MM-DDTHH:MM[:SS]`. Anything else normalizes to no due date.
pub fn parse_stored_due(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt)
            && let Some(local) = Local.from_local_datetime(&naive).earliest()
        {
            return Some(local.with_timezone(&Utc));
        }
    }

    None
}

/// Incomplete tasks first, then by due date ascending, undated last.
pub fn sort_for_display(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| match a.done.cmp(&b.done) {
        Ordering::Equal => match (a.due, b.due) {
            (Some(a_due), Some(b_due)) => a_due.cmp(&b_due),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
        other => other,
    });
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    All,
    Today,
    Upcoming,
    Done,
    Group(String),
}

impl View {
    pub fn parse(arg: &str) -> anyhow::Result<Self> {
        if let Some(group) = arg.strip_prefix("group:") {
            if group.is_empty() {
                anyhow::bail!("list: group name is required after group:");
            }
            return Ok(Self::Group(group.to_ascii_lowercase()));
        }

        match arg {
            "all" => Ok(Self::All),
            "today" => Ok(Self::Today),
            "upcoming" => Ok(Self::Upcoming),
            "done" => Ok(Self::Done),
            other => Err(anyhow::anyhow!(
                "list: unknown view '{other}' (expected all, today, upcoming, done, or group:NAME)"
            )),
        }
    }

    pub fn matches(&self, task: &Task, now: DateTime<Utc>) -> bool {
        match self {
            Self::All => true,
            Self::Today => task
                .due
                .is_some_and(|due| {
                    due.with_timezone(&Local).date_naive() == now.with_timezone(&Local).date_naive()
                }),
            Self::Upcoming => task.due.is_some_and(|due| due > now),
            Self::Done => task.done,
            Self::Group(group) => task.group == *group,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> TaskRecord {
        serde_json::from_str(json).expect("record parses")
    }

    #[test]
    fn legacy_string_record_normalizes_to_defaults() {
        let task = record(r#""buy milk""#).normalize(42);
        assert_eq!(task.id, 42);
        assert_eq!(task.text, "buy milk");
        assert!(!task.done);
        assert_eq!(task.due, None);
        assert_eq!(task.group, DEFAULT_GROUP);
        assert_eq!(task.alarm_offset, 0);
    }

    #[test]
    fn partial_record_fills_missing_fields() {
        let task = record(r#"{"text":"call dentist","done":true}"#).normalize(7);
        assert_eq!(task.id, 7);
        assert!(task.done);
        assert_eq!(task.group, DEFAULT_GROUP);
        assert_eq!(task.alarm_offset, 0);
    }

    #[test]
    fn full_record_keeps_its_own_id() {
        let task =
            record(r#"{"id":1700000000000,"text":"x","done":false,"group":"work"}"#).normalize(9);
        assert_eq!(task.id, 1_700_000_000_000);
        assert_eq!(task.group, "work");
    }

    #[test]
    fn negative_offset_clamps_to_zero() {
        let task = record(r#"{"text":"x","alarm_offset":-5}"#).normalize(1);
        assert_eq!(task.alarm_offset, 0);
    }

    #[test]
    fn rfc3339_due_survives_roundtrip() {
        let due = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).single().expect("valid");
        let mut task = Task::new(1, "x".to_string());
        task.due = Some(due);
        let line = serde_json::to_string(&task).expect("serializes");
        let back = record(&line).normalize(0);
        assert_eq!(back.due, Some(due));
    }

    #[test]
    fn unparseable_due_normalizes_to_none() {
        let task = record(r#"{"text":"x","due":"whenever"}"#).normalize(1);
        assert_eq!(task.due, None);
    }

    #[test]
    fn display_sort_puts_completed_last_and_undated_after_dated() {
        let due = |h| Utc.with_ymd_and_hms(2026, 1, 1, h, 0, 0).single().expect("valid");
        let mut tasks = vec![
            Task {
                done: true,
                ..Task::new(1, "done".into())
            },
            Task::new(2, "undated".into()),
            Task {
                due: Some(due(12)),
                ..Task::new(3, "noon".into())
            },
            Task {
                due: Some(due(8)),
                ..Task::new(4, "morning".into())
            },
        ];
        sort_for_display(&mut tasks);
        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![4, 3, 2, 1]);
    }
}
