use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::highlight::palette::DEFAULT_COLOR;
use crate::highlight::serial::RESTORE_BATCH_SIZE;

#[derive(Parser, Debug)]
#[command(name = "hilite")]
#[command(about = "Runs the hilite page highlighting service", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hilite")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    #[serde(default = "default_database")]
    database: String,
    #[serde(default = "default_port")]
    port: i32,
}

fn default_database() -> String {
    "hilite.db".to_string()
}

fn default_port() -> i32 {
    8080
}

impl Default for App {
    fn default() -> Self {
        App {
            database: default_database(),
            port: default_port(),
        }
    }
}

impl App {
    pub fn get_db(&self) -> &str {
        &self.database
    }

    pub fn get_port(&self) -> i32 {
        self.port
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Highlighter {
    #[serde(default = "default_autosave_debounce")]
    pub autosave_debounce_ms: u64,
    #[serde(default = "default_restore_delay")]
    pub restore_delay_ms: u64,
    #[serde(default = "default_batch_size")]
    pub restore_batch_size: usize,
    #[serde(default = "default_color")]
    pub default_color: String,
}

fn default_autosave_debounce() -> u64 {
    1000
}

fn default_restore_delay() -> u64 {
    500
}

fn default_batch_size() -> usize {
    RESTORE_BATCH_SIZE
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

impl Default for Highlighter {
    fn default() -> Self {
        Highlighter {
            autosave_debounce_ms: default_autosave_debounce(),
            restore_delay_ms: default_restore_delay(),
            restore_batch_size: default_batch_size(),
            default_color: default_color(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Export {
    #[serde(default = "default_capture_timeout")]
    pub capture_timeout_seconds: u64,
    #[serde(default = "default_blocked_schemes")]
    pub blocked_schemes: Vec<String>,
}

fn default_capture_timeout() -> u64 {
    12
}

fn default_blocked_schemes() -> Vec<String> {
    vec!["chrome".to_string()]
}

impl Default for Export {
    fn default() -> Self {
        Export {
            capture_timeout_seconds: default_capture_timeout(),
            blocked_schemes: default_blocked_schemes(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub highlighter: Highlighter,
    #[serde(default)]
    pub export: Export,
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let cfg = Config::load_config(path)?;
        Ok(cfg)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }

    fn load_config(path: &str) -> Result<Config> {
        let yaml_str = fs::read_to_string(path)?;
        Config::from_yaml(&yaml_str)
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let var_start = offset + start;
            let Some(len) = result[var_start..].find('}') else {
                break;
            };
            let expr = &result[var_start + 2..var_start + len];

            // ${VAR:-default}
            let value = match expr.split_once(":-") {
                Some((name, default)) => env::var(name).unwrap_or_else(|_| default.to_string()),
                None => env::var(expr).unwrap_or_else(|_| {
                    tracing::warn!(variable = expr, "environment variable not found");
                    String::new()
                }),
            };

            result.replace_range(var_start..var_start + len + 1, &value);
            offset = var_start + value.len();
        }

        Ok(result)
    }
}
