use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::task::Task;

/// Timer names are derived from the task id, so re-registration for the
/// same task always addresses the same timer.
pub const TIMER_PREFIX: &str = "task-";

pub fn timer_name(id: i64) -> String {
    format!("{TIMER_PREFIX}{id}")
}

pub fn parse_timer_name(name: &str) -> Option<i64> {
    name.strip_prefix(TIMER_PREFIX)?.parse().ok()
}

/// Fire time = due minus the lead offset.
pub fn fire_time(due: DateTime<Utc>, offset_minutes: i64) -> DateTime<Utc> {
    due - Duration::minutes(offset_minutes)
}

/// Fire time for a task, if it would still fire. A task without a due date
/// never has a timer, and fire times at or before `now` are skipped
/// outright rather than fired immediately.
pub fn pending_fire_time(task: &Task, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let due = task.due?;
    let at = fire_time(due, task.alarm_offset);
    (at > now).then_some(at)
}

#[derive(Debug)]
struct Registration {
    fire_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// One-shot timers keyed by name. At most one live registration per name;
/// registering under an existing name replaces it. Fired names are
/// delivered on the channel handed to [`TimerRegistry::new`].
#[derive(Debug)]
pub struct TimerRegistry {
    timers: HashMap<String, Registration>,
    fired_tx: mpsc::UnboundedSender<String>,
}

impl TimerRegistry {
    pub fn new(fired_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            timers: HashMap::new(),
            fired_tx,
        }
    }

    pub fn register(&mut self, name: &str, fire_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.clear(name);

        let delay = (fire_at - now).to_std().unwrap_or_default();
        let tx = self.fired_tx.clone();
        let fired_name = name.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(fired_name);
        });

        self.timers.insert(
            name.to_string(),
            Registration { fire_at, handle },
        );
    }

    pub fn clear(&mut self, name: &str) {
        if let Some(reg) = self.timers.remove(name) {
            reg.handle.abort();
        }
    }

    /// Drops the bookkeeping entry for a timer that has already fired.
    pub fn acknowledge(&mut self, name: &str) {
        self.timers.remove(name);
    }

    pub fn fire_at_of(&self, name: &str) -> Option<DateTime<Utc>> {
        self.timers.get(name).map(|reg| reg.fire_at)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Clear-then-register for one task from its current due date and
    /// offset. An edit that lands the fire time in the past nets out to no
    /// timer at all.
    pub fn schedule_task(&mut self, task: &Task, now: DateTime<Utc>) {
        let name = timer_name(task.id);
        self.clear(&name);
        if let Some(at) = pending_fire_time(task, now) {
            debug!(task = task.id, fire_at = %at, "registered reminder");
            self.register(&name, at, now);
        } else {
            debug!(task = task.id, "no reminder for task");
        }
    }

    /// Reconciles the registry against the full task list: timers for
    /// vanished or no-longer-schedulable tasks are cleared, changed fire
    /// times re-registered, unchanged ones left alone. Completion state is
    /// ignored on purpose: finishing a task does not silence its reminder.
    pub fn sync(&mut self, tasks: &[Task], now: DateTime<Utc>) {
        let mut desired: HashMap<String, DateTime<Utc>> = HashMap::new();
        for task in tasks {
            if let Some(at) = pending_fire_time(task, now) {
                desired.insert(timer_name(task.id), at);
            }
        }

        let stale: Vec<String> = self
            .timers
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .cloned()
            .collect();
        for name in &stale {
            self.clear(name);
        }

        let mut registered = 0usize;
        for (name, at) in desired {
            if self.timers.get(&name).is_some_and(|reg| reg.fire_at == at) {
                continue;
            }
            self.register(&name, at, now);
            registered += 1;
        }

        info!(
            timers = self.timers.len(),
            registered,
            cleared = stale.len(),
            "timer registry synced"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::sync::mpsc::unbounded_channel;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0)
            .single()
            .expect("valid")
    }

    fn task_due_in(now: DateTime<Utc>, millis: i64, offset_minutes: i64) -> Task {
        let mut task = Task::new(1, "remind me".to_string());
        task.due = Some(now + Duration::milliseconds(millis));
        task.alarm_offset = offset_minutes;
        task
    }

    #[test]
    fn timer_names_roundtrip() {
        assert_eq!(timer_name(1_700_000_000_000), "task-1700000000000");
        assert_eq!(parse_timer_name("task-42"), Some(42));
        assert_eq!(parse_timer_name("other-42"), None);
        assert_eq!(parse_timer_name("task-notanumber"), None);
    }

    #[test]
    fn fire_time_subtracts_offset_minutes() {
        let now = fixed_now();
        // due in 1 hour, offset 0: fires exactly at the due time
        let task = task_due_in(now, 3_600_000, 0);
        assert_eq!(
            pending_fire_time(&task, now),
            Some(now + Duration::milliseconds(3_600_000))
        );

        // same task edited to offset 30: fires half an hour early
        let task = task_due_in(now, 3_600_000, 30);
        assert_eq!(
            pending_fire_time(&task, now),
            Some(now + Duration::milliseconds(1_800_000))
        );
    }

    #[test]
    fn past_or_absent_due_yields_no_fire_time() {
        let now = fixed_now();
        assert_eq!(pending_fire_time(&Task::new(1, "x".into()), now), None);

        let past = task_due_in(now, -1, 0);
        assert_eq!(pending_fire_time(&past, now), None);

        // due in the future but the offset pushes the fire time behind now
        let eaten_by_offset = task_due_in(now, 60_000, 5);
        assert_eq!(pending_fire_time(&eaten_by_offset, now), None);
    }

    #[tokio::test(start_paused = true)]
    async fn register_replaces_prior_registration() {
        let now = fixed_now();
        let (tx, _rx) = unbounded_channel();
        let mut registry = TimerRegistry::new(tx);

        registry.register("task-1", now + Duration::hours(1), now);
        registry.register("task-1", now + Duration::minutes(30), now);

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.fire_at_of("task-1"),
            Some(now + Duration::minutes(30))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_task_edit_to_past_clears_without_registering() {
        let now = fixed_now();
        let (tx, _rx) = unbounded_channel();
        let mut registry = TimerRegistry::new(tx);

        let task = task_due_in(now, 3_600_000, 0);
        registry.schedule_task(&task, now);
        assert_eq!(registry.len(), 1);

        let edited = task_due_in(now, -3_600_000, 0);
        registry.schedule_task(&edited, now);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sync_clears_timers_for_deleted_tasks() {
        let now = fixed_now();
        let (tx, _rx) = unbounded_channel();
        let mut registry = TimerRegistry::new(tx);

        let task = task_due_in(now, 3_600_000, 0);
        registry.sync(std::slice::from_ref(&task), now);
        assert_eq!(registry.fire_at_of(&timer_name(task.id)), Some(now + Duration::hours(1)));

        registry.sync(&[], now);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn registered_timer_fires_with_its_name() {
        let now = fixed_now();
        let (tx, mut rx) = unbounded_channel();
        let mut registry = TimerRegistry::new(tx);

        registry.register("task-7", now + Duration::hours(1), now);

        let fired = rx.recv().await;
        assert_eq!(fired.as_deref(), Some("task-7"));
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_timer_never_fires() {
        let now = fixed_now();
        let (tx, mut rx) = unbounded_channel();
        let mut registry = TimerRegistry::new(tx);

        registry.register("task-7", now + Duration::minutes(1), now);
        registry.clear("task-7");

        tokio::time::sleep(std::time::Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }
}
