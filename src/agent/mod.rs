//! Coding-agent CLIs that run inside a sandbox.
//!
//! Each agent knows its binary, how to install it, which API key it needs
//! and how to run it non-interactively with JSON-line output:
//! - Claude: `claude -p <prompt> --dangerously-skip-permissions --output-format stream-json`
//! - Codex: `codex exec --json <prompt>`
//! - Cursor: `cursor-agent -p <prompt> --force --output-format stream-json`
//! - Gemini: `gemini -p <prompt> --yolo --output-format stream-json`

mod run;

pub(crate) use run::{run_agent, AgentRun};

/// Supported agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Agent {
    /// Claude Code CLI.
    #[default]
    Claude,
    /// OpenAI Codex CLI.
    Codex,
    /// Cursor agent CLI.
    Cursor,
    /// Gemini CLI.
    Gemini,
}

impl Agent {
    /// Executable name inside the sandbox.
    pub fn binary(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Cursor => "cursor-agent",
            Self::Gemini => "gemini",
        }
    }

    /// Environment variable holding the agent's API key.
    pub fn api_key_var(self) -> &'static str {
        match self {
            Self::Claude => "ANTHROPIC_API_KEY",
            Self::Codex => "OPENAI_API_KEY",
            Self::Cursor => "CURSOR_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Command that installs the agent CLI globally.
    pub fn install_command(self) -> (&'static str, Vec<&'static str>) {
        match self {
            Self::Claude => ("npm", vec!["install", "-g", "@anthropic-ai/claude-code"]),
            Self::Codex => ("npm", vec!["install", "-g", "@openai/codex"]),
            Self::Cursor => ("sh", vec!["-c", "curl https://cursor.com/install -fsS | bash"]),
            Self::Gemini => ("npm", vec!["install", "-g", "@google/gemini-cli"]),
        }
    }

    /// Arguments for a non-interactive run.
    pub fn args(self, prompt: &str, model: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = match self {
            Self::Claude => vec![
                "-p".into(),
                prompt.into(),
                "--dangerously-skip-permissions".into(),
                "--output-format".into(),
                "stream-json".into(),
                "--verbose".into(),
            ],
            Self::Codex => vec![
                "exec".into(),
                "--json".into(),
                "--dangerously-bypass-approvals-and-sandbox".into(),
            ],
            Self::Cursor => vec![
                "-p".into(),
                prompt.into(),
                "--force".into(),
                "--output-format".into(),
                "stream-json".into(),
            ],
            Self::Gemini => vec![
                "-p".into(),
                prompt.into(),
                "--yolo".into(),
                "--output-format".into(),
                "stream-json".into(),
            ],
        };

        if let Some(model) = model {
            args.push("--model".into());
            args.push(model.into());
        }

        // Codex takes the prompt as its trailing positional argument
        if self == Self::Codex {
            args.push(prompt.into());
        }

        args
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claude => write!(f, "claude"),
            Self::Codex => write!(f, "codex"),
            Self::Cursor => write!(f, "cursor"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

impl std::str::FromStr for Agent {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "cursor" => Ok(Self::Cursor),
            "gemini" => Ok(Self::Gemini),
            _ => anyhow::bail!("Unknown agent: '{s}'. Supported: claude, codex, cursor, gemini"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_display() {
        assert_eq!(format!("{}", Agent::Claude), "claude");
        assert_eq!(format!("{}", Agent::Cursor), "cursor");
    }

    #[test]
    fn test_agent_from_str() {
        assert_eq!("claude".parse::<Agent>().unwrap(), Agent::Claude);
        assert_eq!("Codex".parse::<Agent>().unwrap(), Agent::Codex);
        assert_eq!("gemini".parse::<Agent>().unwrap(), Agent::Gemini);
        assert!("unknown".parse::<Agent>().is_err());
    }

    #[test]
    fn test_claude_args() {
        let args = Agent::Claude.args("fix the bug", Some("opus"));
        assert_eq!(args[0], "-p");
        assert_eq!(args[1], "fix the bug");
        assert!(args.contains(&"stream-json".to_string()));
        assert_eq!(&args[args.len() - 2..], ["--model", "opus"]);
    }

    #[test]
    fn test_codex_prompt_is_last() {
        let args = Agent::Codex.args("add tests", Some("gpt-5"));
        assert_eq!(args[0], "exec");
        assert_eq!(args.last().unwrap(), "add tests");
    }

    #[test]
    fn test_api_key_vars() {
        assert_eq!(Agent::Claude.api_key_var(), "ANTHROPIC_API_KEY");
        assert_eq!(Agent::Codex.api_key_var(), "OPENAI_API_KEY");
    }
}
