use std::path::Path;

use anyhow::{Context, anyhow, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::audio::{self, AudioRelay, SoundRef};
use crate::cli::Invocation;
use crate::config::Config;
use crate::daemon;
use crate::datastore::DataStore;
use crate::datetime::{format_local, parse_date_expr};
use crate::render::Renderer;
use crate::sched::pending_fire_time;
use crate::task::{self, DEFAULT_GROUP, Task, View};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add", "list", "modify", "done", "undone", "delete", "groups", "group", "sound", "daemon",
        "help", "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let command = inv.command.as_str();

    debug!(command, args = ?inv.command_args, "dispatching command");

    match command {
        "add" => cmd_add(store, &inv.command_args, now),
        "list" => cmd_list(store, renderer, &inv.command_args, now),
        "modify" => cmd_modify(store, &inv.command_args, now),
        "done" => cmd_set_done(store, &inv.command_args, true),
        "undone" => cmd_set_done(store, &inv.command_args, false),
        "delete" => cmd_delete(store, &inv.command_args),
        "groups" => cmd_groups(store, renderer),
        "group" => cmd_group(store, &inv.command_args),
        "sound" => cmd_sound(store, &inv.command_args),
        "daemon" => daemon::run(store, cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[derive(Debug, Clone)]
enum Mod {
    Due(Option<DateTime<Utc>>),
    Group(String),
    Offset(i64),
}

fn parse_desc_and_mods(
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<(String, Vec<Mod>)> {
    let mut desc_parts = Vec::new();
    let mut mods = Vec::new();

    let mut literal = false;
    for arg in args {
        if arg == "--" {
            literal = true;
            continue;
        }

        if !literal && let Some(one_mod) = parse_one_mod(arg, now)? {
            mods.push(one_mod);
            continue;
        }

        desc_parts.push(arg.clone());
    }

    Ok((desc_parts.join(" "), mods))
}

fn parse_one_mod(tok: &str, now: DateTime<Utc>) -> anyhow::Result<Option<Mod>> {
    let Some((key, value)) = tok.split_once(':').or_else(|| tok.split_once('=')) else {
        return Ok(None);
    };

    match key.to_ascii_lowercase().as_str() {
        "due" => {
            if value.is_empty() {
                Ok(Some(Mod::Due(None)))
            } else {
                Ok(Some(Mod::Due(Some(parse_date_expr(value, now)?))))
            }
        }
        "group" => {
            if value.is_empty() {
                bail!("group name cannot be empty");
            }
            Ok(Some(Mod::Group(value.to_ascii_lowercase())))
        }
        "offset" => {
            let minutes: i64 = value
                .parse()
                .with_context(|| format!("invalid offset minutes: {value}"))?;
            if minutes < 0 {
                bail!("offset must be zero or more minutes");
            }
            Ok(Some(Mod::Offset(minutes)))
        }
        _ => Ok(None),
    }
}

fn apply_mods(task: &mut Task, mods: &[Mod]) {
    for one_mod in mods {
        match one_mod {
            Mod::Due(due) => task.due = *due,
            Mod::Group(group) => task.group = group.clone(),
            Mod::Offset(minutes) => task.alarm_offset = *minutes,
        }
    }
}

fn ensure_group(store: &DataStore, group: &str) -> anyhow::Result<()> {
    let mut groups = store.load_groups()?;
    if !groups.iter().any(|existing| existing == group) {
        groups.push(group.to_string());
        store.save_groups(&groups)?;
        info!(group, "registered new group");
    }
    Ok(())
}

fn parse_task_id(arg: Option<&String>) -> anyhow::Result<i64> {
    let raw = arg.ok_or_else(|| anyhow!("a task id is required"))?;
    raw.parse()
        .with_context(|| format!("invalid task id: {raw}"))
}

#[instrument(skip(store, args, now))]
fn cmd_add(store: &DataStore, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command add");

    let (text, mods) = parse_desc_and_mods(args, now)?;
    if text.is_empty() {
        bail!("add: task text is required");
    }

    let mut tasks = store.load_tasks()?;
    let id = store.next_task_id(&tasks);
    let mut new_task = Task::new(id, text);
    apply_mods(&mut new_task, &mods);
    ensure_group(store, &new_task.group)?;

    let fire = pending_fire_time(&new_task, now);
    tasks.push(new_task);
    store.save_tasks(&tasks)?;

    match fire {
        Some(at) => println!("Added task {id} (reminder at {})", format_local(at)),
        None => println!("Added task {id}"),
    }
    Ok(())
}

#[instrument(skip(store, renderer, args, now))]
fn cmd_list(
    store: &DataStore,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let view = match args.first() {
        Some(arg) => View::parse(arg)?,
        None => View::All,
    };

    let mut tasks: Vec<Task> = store
        .load_tasks()?
        .into_iter()
        .filter(|t| view.matches(t, now))
        .collect();

    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    task::sort_for_display(&mut tasks);
    renderer.print_task_table(&tasks, now)
}

#[instrument(skip(store, args, now))]
fn cmd_modify(store: &DataStore, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    let id = parse_task_id(args.first())?;
    let (text, mods) = parse_desc_and_mods(&args[1..], now)?;
    if text.is_empty() && mods.is_empty() {
        bail!("modify: nothing to change");
    }

    let mut tasks = store.load_tasks()?;
    let found = tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| anyhow!("no task with id {id}"))?;

    if !text.is_empty() {
        found.text = text;
    }
    apply_mods(found, &mods);

    let group = found.group.clone();
    let fire = pending_fire_time(found, now);
    ensure_group(store, &group)?;
    store.save_tasks(&tasks)?;

    match fire {
        Some(at) => println!("Modified task {id} (reminder at {})", format_local(at)),
        None => println!("Modified task {id}"),
    }
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_set_done(store: &DataStore, args: &[String], done: bool) -> anyhow::Result<()> {
    let id = parse_task_id(args.first())?;

    let mut tasks = store.load_tasks()?;
    let found = tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| anyhow!("no task with id {id}"))?;
    found.done = done;
    store.save_tasks(&tasks)?;

    if done {
        println!("Completed task {id}");
    } else {
        println!("Reopened task {id}");
    }
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_delete(store: &DataStore, args: &[String]) -> anyhow::Result<()> {
    let id = parse_task_id(args.first())?;

    let mut tasks = store.load_tasks()?;
    let before = tasks.len();
    tasks.retain(|t| t.id != id);
    if tasks.len() == before {
        bail!("no task with id {id}");
    }
    store.save_tasks(&tasks)?;

    println!("Deleted task {id}");
    Ok(())
}

#[instrument(skip(store, renderer))]
fn cmd_groups(store: &DataStore, renderer: &mut Renderer) -> anyhow::Result<()> {
    let tasks = store.load_tasks()?;
    let groups = store.load_groups()?;

    let counts: Vec<(String, usize)> = groups
        .into_iter()
        .map(|group| {
            let count = tasks.iter().filter(|t| t.group == group).count();
            (group, count)
        })
        .collect();

    renderer.print_group_table(&counts)
}

#[instrument(skip(store, args))]
fn cmd_group(store: &DataStore, args: &[String]) -> anyhow::Result<()> {
    match args.first().map(String::as_str) {
        Some("add") => {
            let name = args
                .get(1)
                .ok_or_else(|| anyhow!("group add: a name is required"))?
                .to_ascii_lowercase();
            ensure_group(store, &name)?;
            println!("Added group {name}");
            Ok(())
        }
        Some("delete") => {
            let name = args
                .get(1)
                .ok_or_else(|| anyhow!("group delete: a name is required"))?
                .to_ascii_lowercase();
            if name == DEFAULT_GROUP {
                bail!("the {DEFAULT_GROUP} group cannot be deleted");
            }

            let mut groups = store.load_groups()?;
            let before = groups.len();
            groups.retain(|g| *g != name);
            if groups.len() == before {
                bail!("no group named {name}");
            }

            let mut tasks = store.load_tasks()?;
            let mut moved = 0usize;
            for found in tasks.iter_mut().filter(|t| t.group == name) {
                found.group = DEFAULT_GROUP.to_string();
                moved += 1;
            }

            store.save_tasks(&tasks)?;
            store.save_groups(&groups)?;

            println!("Deleted group {name}; {moved} task(s) moved to {DEFAULT_GROUP}");
            Ok(())
        }
        _ => bail!("usage: brio group <add|delete> <name>"),
    }
}

#[instrument(skip(store, args))]
fn cmd_sound(store: &DataStore, args: &[String]) -> anyhow::Result<()> {
    match args.first().map(String::as_str) {
        Some("set") => {
            let path = args
                .get(1)
                .ok_or_else(|| anyhow!("sound set: a file path is required"))?;
            let reference = audio::load_sound_file(Path::new(path))?;
            store.save_custom_sound(&reference)?;
            println!("Custom sound saved.");
            Ok(())
        }
        Some("reset") => {
            store.clear_custom_sound()?;
            println!("Sound reset to default.");
            Ok(())
        }
        Some("preview") => cmd_sound_preview(store),
        _ => bail!("usage: brio sound <set FILE|reset|preview>"),
    }
}

fn cmd_sound_preview(store: &DataStore) -> anyhow::Result<()> {
    let Some(stored) = store.load_custom_sound()? else {
        println!("No custom sound set; the default notification sound is used.");
        return Ok(());
    };

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(async {
        let relay = AudioRelay::new();
        relay.play(&SoundRef::Custom(stored)).await?;

        println!("Playing custom sound; press Enter to stop.");
        let _ = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            let _ = std::io::stdin().read_line(&mut line);
        })
        .await;

        relay.stop().await;
        Ok(())
    })
}

fn cmd_help() -> anyhow::Result<()> {
    println!("brio: task reminders with alarms");
    println!();
    println!("  add <text> [due:EXPR] [group:NAME] [offset:MIN]   create a task");
    println!("  list [all|today|upcoming|done|group:NAME]         show tasks");
    println!("  modify <id> [text] [due:EXPR|due:] [group:NAME] [offset:MIN]");
    println!("  done <id> / undone <id>                           toggle completion");
    println!("  delete <id>                                       remove a task");
    println!("  groups / group add <name> / group delete <name>");
    println!("  sound set <file> | sound reset | sound preview    custom alert sound");
    println!("  daemon                                            run the reminder daemon");
    println!();
    println!("Due expressions: now, today, tomorrow, RFC 3339, YYYY-MM-DD[THH:MM],");
    println!("HH:MM (next occurrence), +Nd/+Nh/+Nm.");
    Ok(())
}
