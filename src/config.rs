use serde::Deserialize;
use std::fs;
use std::path::Path;

const DEFAULT_CONFIG: &str = include_str!("default_config.toml");

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub parse: ParseConfig,
    pub decode: DecodeConfig,
    pub runs: RunsConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ParseConfig {
    pub strip_frontmatter: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            strip_frontmatter: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DecodeConfig {
    pub bullet: char,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self { bullet: '-' }
    }
}

impl DecodeConfig {
    /// The bullet marker, falling back to `-` for characters Markdown does
    /// not accept as a bullet.
    pub fn bullet_marker(&self) -> char {
        match self.bullet {
            '-' | '*' | '+' => self.bullet,
            _ => '-',
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RunsConfig {
    pub start_index: usize,
    pub code_font: String,
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            start_index: 0,
            code_font: "Courier New".to_string(),
        }
    }
}

impl Config {
    /// The defaults shipped in `default_config.toml`.
    pub fn compiled_default() -> Self {
        toml::from_str(DEFAULT_CONFIG).unwrap_or_default()
    }

    /// Load config from a TOML file, or return defaults if not found.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
                log::warn!("ignoring invalid config {}: {}", path.display(), e);
                Self::compiled_default()
            }),
            Err(e) => {
                log::debug!("no config at {}: {}", path.display(), e);
                Self::compiled_default()
            }
        }
    }
}
