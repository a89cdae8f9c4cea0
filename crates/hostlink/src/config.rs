//! Configuration file, environment and command-line merging.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use hostlink_executor::ScriptConfig;
use hostlink_transport::{ClientConfig, ToolRegistration};
use serde::{Deserialize, Serialize};

pub const URL_ENV: &str = "HOSTLINK_URL";
pub const TOKEN_ENV: &str = "HOSTLINK_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "hostlink", version, about = "Bridge a host application to an agent server")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Server base URL (overrides the file and HOSTLINK_URL)
    #[arg(long)]
    pub url: Option<String>,

    /// Bearer token (overrides the file and HOSTLINK_TOKEN)
    #[arg(long)]
    pub token: Option<String>,

    /// Name to register the tool under
    #[arg(long)]
    pub tool_name: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".into(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tool: ToolRegistration,
    pub client: ClientConfig,
    pub script: ScriptConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// File (or defaults), then environment, then flags.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.apply_cli(cli);
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(URL_ENV).filter(|v| !v.is_empty()) {
            self.server.url = url;
        }
        if let Some(token) = var(TOKEN_ENV).filter(|v| !v.is_empty()) {
            self.server.token = Some(token);
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.url {
            self.server.url.clone_from(url);
        }
        if let Some(token) = &cli.token {
            self.server.token = Some(token.clone());
        }
        if let Some(name) = &cli.tool_name {
            self.tool.name.clone_from(name);
        }
    }

    /// Effective configuration as TOML, token redacted.
    pub fn to_redacted_toml(&self) -> anyhow::Result<String> {
        let mut shown = self.clone();
        if shown.server.token.is_some() {
            shown.server.token = Some("<redacted>".into());
        }
        Ok(toml::to_string_pretty(&shown)?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("hostlink").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.client.backoff_min_secs, 2);
        assert_eq!(config.client.backoff_max_secs, 60);
        assert_eq!(config.tool.name, "hostlink");
        assert_eq!(config.script.default_session, "default");
        assert!(config.script.timeout_secs.is_none());
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
url = "https://agents.example"

[client]
request_timeout_secs = 5

[script]
timeout_secs = 30
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.url, "https://agents.example");
        assert_eq!(config.client.request_timeout_secs, 5);
        assert_eq!(config.client.tool_call_timeout_secs, 120);
        assert_eq!(config.script.timeout_secs, Some(30));
        assert_eq!(config.script.default_session, "default");
    }

    #[test]
    fn test_invalid_file_names_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[client]\nrequest_timeout_secs = \"soon\"").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_precedence_file_env_flags() {
        let mut config = Config::default();
        config.server.url = "http://file".into();
        config.server.token = Some("file-token".into());

        config.apply_env(|name| match name {
            URL_ENV => Some("http://env".into()),
            TOKEN_ENV => Some("env-token".into()),
            _ => None,
        });
        assert_eq!(config.server.url, "http://env");
        assert_eq!(config.server.token.as_deref(), Some("env-token"));

        config.apply_cli(&cli(&["--url", "http://flag", "--tool-name", "cad"]));
        assert_eq!(config.server.url, "http://flag");
        assert_eq!(config.server.token.as_deref(), Some("env-token"));
        assert_eq!(config.tool.name, "cad");
    }

    #[test]
    fn test_print_config_redacts_token() {
        let mut config = Config::default();
        config.server.token = Some("secret".into());
        let text = config.to_redacted_toml().unwrap();
        assert!(!text.contains("secret"));
        assert!(text.contains("<redacted>"));
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.client, config.client);
    }
}
