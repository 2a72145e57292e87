use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::task::{DEFAULT_GROUP, Task, TaskRecord};

pub const DEFAULT_GROUPS: [&str; 4] = ["inbox", "work", "personal", "shopping"];

#[derive(Debug, Clone)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub groups_path: PathBuf,
    pub sound_path: PathBuf,
}

impl DataStore {
    pub const TASKS_FILE: &'static str = "tasks.data";
    pub const GROUPS_FILE: &'static str = "groups.data";
    pub const SOUND_FILE: &'static str = "sound.data";

    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join(Self::TASKS_FILE);
        let groups_path = data_dir.join(Self::GROUPS_FILE);
        let sound_path = data_dir.join(Self::SOUND_FILE);

        if !tasks_path.exists() {
            fs::write(&tasks_path, "")?;
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            tasks_path,
            groups_path,
            sound_path,
        })
    }

    /// Loads the task list, normalizing legacy record shapes in one pass.
    /// Records without an id get a fresh creation-timestamp id, bumped past
    /// any id already in use.
    #[tracing::instrument(skip(self))]
    pub fn load_tasks(&self) -> anyhow::Result<Vec<Task>> {
        let file = fs::File::open(&self.tasks_path)
            .with_context(|| format!("failed to open {}", self.tasks_path.display()))?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let record: TaskRecord = serde_json::from_str(trimmed).with_context(|| {
                format!(
                    "failed parsing {} line {}",
                    self.tasks_path.display(),
                    idx + 1
                )
            })?;
            records.push(record);
        }

        let mut used: HashSet<i64> = records
            .iter()
            .filter_map(|record| match record {
                TaskRecord::Fields(raw) => raw.id,
                TaskRecord::Text(_) => None,
            })
            .collect();

        let mut tasks = Vec::with_capacity(records.len());
        let mut fallback = Utc::now().timestamp_millis();
        for record in records {
            while used.contains(&fallback) {
                fallback += 1;
            }
            let task = record.normalize(fallback);
            used.insert(task.id);
            tasks.push(task);
        }

        debug!(count = tasks.len(), "loaded tasks");
        Ok(tasks)
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn save_tasks(&self, tasks: &[Task]) -> anyhow::Result<()> {
        debug!(count = tasks.len(), "saving tasks");
        let dir = self.dir_of(&self.tasks_path);
        let mut temp = NamedTempFile::new_in(dir)?;
        for task in tasks {
            let serialized = serde_json::to_string(task)?;
            writeln!(temp, "{serialized}")?;
        }
        temp.flush()?;
        temp.persist(&self.tasks_path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.tasks_path.display(), err))?;
        Ok(())
    }

    /// Next task id: current time in milliseconds, bumped past collisions
    /// with existing ids (two adds inside one millisecond stay distinct).
    pub fn next_task_id(&self, tasks: &[Task]) -> i64 {
        let mut id = Utc::now().timestamp_millis();
        while tasks.iter().any(|t| t.id == id) {
            id += 1;
        }
        id
    }

    /// The group list; missing file means the default set. "inbox" is always
    /// present, first.
    #[tracing::instrument(skip(self))]
    pub fn load_groups(&self) -> anyhow::Result<Vec<String>> {
        let text = match fs::read_to_string(&self.groups_path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(DEFAULT_GROUPS.iter().map(|g| g.to_string()).collect());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed reading {}", self.groups_path.display())
                });
            }
        };

        let mut groups: Vec<String> = text
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();

        if !groups.iter().any(|g| g == DEFAULT_GROUP) {
            groups.insert(0, DEFAULT_GROUP.to_string());
        }

        Ok(groups)
    }

    #[tracing::instrument(skip(self, groups))]
    pub fn save_groups(&self, groups: &[String]) -> anyhow::Result<()> {
        let dir = self.dir_of(&self.groups_path);
        let mut temp = NamedTempFile::new_in(dir)?;
        for group in groups {
            writeln!(temp, "{group}")?;
        }
        temp.flush()?;
        temp.persist(&self.groups_path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.groups_path.display(), err))?;
        Ok(())
    }

    /// The stored custom-sound reference (a data URI), if any.
    #[tracing::instrument(skip(self))]
    pub fn load_custom_sound(&self) -> anyhow::Result<Option<String>> {
        match fs::read_to_string(&self.sound_path) {
            Ok(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(trimmed.to_string()))
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed reading {}", self.sound_path.display()))
            }
        }
    }

    #[tracing::instrument(skip(self, reference))]
    pub fn save_custom_sound(&self, reference: &str) -> anyhow::Result<()> {
        let dir = self.dir_of(&self.sound_path);
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(reference.as_bytes())?;
        temp.flush()?;
        temp.persist(&self.sound_path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.sound_path.display(), err))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn clear_custom_sound(&self) -> anyhow::Result<()> {
        match fs::remove_file(&self.sound_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed removing {}", self.sound_path.display()))
            }
        }
    }

    fn dir_of<'a>(&'a self, path: &'a Path) -> &'a Path {
        path.parent().unwrap_or(&self.data_dir)
    }
}
