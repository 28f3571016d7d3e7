use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const TASKS_DIR: &str = "tasks";

/// Persisted state of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub user_id: String,
    pub repo_url: String,
    pub agent: String,
    pub sandbox_id: Option<String>,
    pub branch_name: Option<String>,
    #[serde(default)]
    pub keep_alive: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(user_id: &str, repo_url: &str, agent: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            repo_url: repo_url.to_string(),
            agent: agent.to_string(),
            sandbox_id: None,
            branch_name: None,
            keep_alive: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Bumps `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Lookup and persistence of task records.
pub trait TaskStore: Send + Sync {
    /// Finds a live task owned by `user_id`.
    fn find_task(&self, task_id: &str, user_id: &str) -> Result<Option<TaskRecord>>;

    fn save(&self, task: &TaskRecord) -> Result<()>;
}

/// One TOML file per task under `<home>/tasks`.
pub struct FileTaskStore {
    dir: PathBuf,
}

impl FileTaskStore {
    pub fn new(home: &Path) -> Self {
        Self {
            dir: home.join(TASKS_DIR),
        }
    }

    fn path_for(&self, task_id: &str) -> Option<PathBuf> {
        let valid = !task_id.is_empty()
            && task_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| self.dir.join(format!("{task_id}.toml")))
    }
}

impl TaskStore for FileTaskStore {
    fn find_task(&self, task_id: &str, user_id: &str) -> Result<Option<TaskRecord>> {
        let Some(path) = self.path_for(task_id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read task file: {}", path.display()))?;
        let task: TaskRecord = toml::from_str(&content)
            .with_context(|| format!("Failed to parse task file: {}", path.display()))?;

        if task.user_id != user_id || task.is_deleted() {
            return Ok(None);
        }
        Ok(Some(task))
    }

    fn save(&self, task: &TaskRecord) -> Result<()> {
        let Some(path) = self.path_for(&task.id) else {
            bail!("Invalid task id: '{}'", task.id);
        };

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create directory: {}", self.dir.display()))?;

        let content = toml::to_string_pretty(task).context("Failed to serialize task")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write task file: {}", path.display()))?;

        Ok(())
    }
}
