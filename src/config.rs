use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "taskbox.toml";

/// Directory under the user's home holding task records and logs.
const HOME_DIR_NAME: &str = ".taskbox";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub git: GitSettings,
    #[serde(default)]
    pub dev_server: DevServerSettings,
    #[serde(default)]
    pub agent: AgentSettings,
}

/// Sandbox provisioning defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Container image used for new sandboxes
    #[serde(default = "default_image")]
    pub image: String,

    /// Sandbox lifetime when a task does not ask for one
    #[serde(default = "default_timeout")]
    pub timeout_minutes: u32,

    /// Upper bound on any requested sandbox lifetime
    #[serde(default = "default_max_duration")]
    pub max_duration_minutes: u32,

    /// How long sandbox creation may take before it is reported as timed out
    #[serde(default = "default_create_timeout")]
    pub create_timeout_secs: u64,

    /// Ports exposed by the sandbox; the first one is the dev server port
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,

    /// Install project dependencies after cloning
    #[serde(default = "default_true")]
    pub install_dependencies: bool,

    /// Keep the sandbox running after the agent finishes
    #[serde(default)]
    pub keep_alive: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: default_image(),
            timeout_minutes: default_timeout(),
            max_duration_minutes: default_max_duration(),
            create_timeout_secs: default_create_timeout(),
            ports: default_ports(),
            install_dependencies: true,
            keep_alive: false,
        }
    }
}

/// Commit identity used inside the sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevServerSettings {
    /// Start `dev` scripts automatically after installing dependencies
    #[serde(default = "default_true")]
    pub autostart: bool,

    /// Pause after starting the dev server before resolving its hostname
    #[serde(default = "default_startup_delay")]
    pub startup_delay_secs: u64,
}

impl Default for DevServerSettings {
    fn default() -> Self {
        Self {
            autostart: true,
            startup_delay_secs: default_startup_delay(),
        }
    }
}

/// Agent selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Which agent CLI to run: "claude", "codex", "cursor" or "gemini"
    #[serde(default = "default_agent")]
    pub provider: String,

    /// Model passed to the agent CLI (optional)
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            provider: default_agent(),
            model: None,
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_image() -> String {
    "node:22-bookworm".to_string()
}

fn default_timeout() -> u32 {
    60
}

fn default_max_duration() -> u32 {
    300
}

fn default_create_timeout() -> u64 {
    300
}

fn default_ports() -> Vec<u16> {
    vec![3000]
}

fn default_author_name() -> String {
    "Coding Agent".to_string()
}

fn default_author_email() -> String {
    "agent@example.com".to_string()
}

fn default_startup_delay() -> u64 {
    5
}

fn default_agent() -> String {
    "claude".to_string()
}

impl Config {
    /// Load configuration from file, using defaults if not found
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }
}

/// Resolve the taskbox home directory (task records, logs)
pub fn taskbox_home(override_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir.to_path_buf());
    }
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(HOME_DIR_NAME))
}
