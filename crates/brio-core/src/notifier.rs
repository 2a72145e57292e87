use std::sync::Arc;

use anyhow::Context;
use notify_rust::{Notification, Timeout};
use tracing::{debug, warn};

use crate::audio::{AudioRelay, SoundRef};
use crate::config::Config;
use crate::datastore::DataStore;
use crate::sched;
use crate::task::Task;

pub const STOP_ACTION: &str = "stop";

/// XDG theme sound used when no custom sound is configured.
const DEFAULT_SOUND_NAME: &str = "alarm-clock-elapsed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dismissal {
    StopAction,
    Closed,
}

/// Resolves a fired timer name to its task. A task deleted after its timer
/// was registered resolves to nothing, a race the daemon tolerates
/// silently.
pub fn fired_task<'a>(tasks: &'a [Task], timer: &str) -> Option<&'a Task> {
    let id = sched::parse_timer_name(timer)?;
    tasks.iter().find(|task| task.id == id)
}

/// Timer-fired entry point: resolve the task, start the alert sound, show
/// the notification, and stop the sound once the user dismisses it. Sound
/// failure is non-fatal; the reminder itself is still shown.
pub async fn present(
    store: DataStore,
    cfg: Config,
    relay: Arc<AudioRelay>,
    timer: String,
) -> anyhow::Result<()> {
    let tasks = store.load_tasks()?;
    let Some(task) = fired_task(&tasks, &timer) else {
        debug!(%timer, "timer fired for a task that no longer exists");
        return Ok(());
    };

    let sound = match store.load_custom_sound() {
        Ok(stored) => SoundRef::from_stored(stored),
        Err(err) => {
            warn!(error = %err, "failed to load custom sound; using default");
            SoundRef::Default
        }
    };

    if let Err(err) = relay.play(&sound).await {
        warn!(error = %err, "alert sound unavailable; showing the notification anyway");
    }

    let title = cfg
        .get("notify.title")
        .unwrap_or_else(|| "Brio Reminder".to_string());
    let body = task.text.clone();
    let default_sound = sound.is_default();

    let outcome =
        tokio::task::spawn_blocking(move || show_and_wait(&title, &body, default_sound)).await;

    match outcome {
        Ok(Ok(dismissal)) => debug!(%timer, ?dismissal, "notification dismissed"),
        Ok(Err(err)) => warn!(%timer, error = %err, "failed to show notification"),
        Err(err) => warn!(%timer, error = %err, "notification waiter panicked"),
    }

    relay.stop().await;
    Ok(())
}

/// Shows a persistent notification (no auto-timeout) with a single
/// "Stop Alarm" action and blocks until the user dismisses it.
fn show_and_wait(title: &str, body: &str, default_sound: bool) -> anyhow::Result<Dismissal> {
    let mut notification = Notification::new();
    notification
        .summary(title)
        .body(body)
        .action(STOP_ACTION, "Stop Alarm")
        .timeout(Timeout::Never);
    if default_sound {
        notification.sound_name(DEFAULT_SOUND_NAME);
    }

    let handle = notification
        .show()
        .context("failed to create notification")?;

    let mut dismissal = Dismissal::Closed;
    handle.wait_for_action(|action| dismissal = dismissal_of(action));
    Ok(dismissal)
}

/// The "Stop Alarm" button and a native close both land here; callers
/// treat every dismissal identically, so the two paths are
/// indistinguishable downstream.
pub fn dismissal_of(action: &str) -> Dismissal {
    if action == STOP_ACTION {
        Dismissal::StopAction
    } else {
        Dismissal::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fired_timer_resolves_its_task() {
        let tasks = vec![Task::new(100, "a".into()), Task::new(200, "b".into())];
        let found = fired_task(&tasks, "task-200").expect("resolves");
        assert_eq!(found.text, "b");
    }

    #[test]
    fn fired_timer_for_deleted_task_resolves_to_nothing() {
        let tasks = vec![Task::new(100, "a".into())];
        assert!(fired_task(&tasks, "task-999").is_none());
    }

    #[test]
    fn foreign_timer_names_are_ignored() {
        let tasks = vec![Task::new(100, "a".into())];
        assert!(fired_task(&tasks, "heartbeat").is_none());
        assert!(fired_task(&tasks, "task-").is_none());
    }

    #[test]
    fn action_click_and_native_close_both_count_as_dismissal() {
        assert_eq!(dismissal_of(STOP_ACTION), Dismissal::StopAction);
        assert_eq!(dismissal_of("__closed"), Dismissal::Closed);
        assert_eq!(dismissal_of("anything-else"), Dismissal::Closed);
    }
}
