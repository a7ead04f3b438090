//! Flat `key=value` settings file.
//!
//! The file holds a fixed set of keys. Reading never fails: a missing or
//! unreadable file yields an empty mapping and every absent key falls back to
//! its built-in default. Saving merges the session's changes into whatever is
//! currently on disk so that keys edited by someone else survive.

use directories::ProjectDirs;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Config file name inside the platform config directory.
pub const CONFIG_FILE_NAME: &str = "oclip.conf";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config directory")]
    NoConfigDir,

    #[error("Failed to read config file: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write config file: {0}")]
    WriteError(std::io::Error),
}

/// Raw mapping as parsed from disk. Unknown keys are kept here but never
/// reach [`Config`].
pub type RawConfig = BTreeMap<String, String>;

/// The fixed key set, in the order it is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    Model,
    SysPrompt,
    SysPostfix,
    NotifHotkey,
    MonitorHotkey,
    TriggerHotkey,
    AutoPasteHotkey,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 7] = [
        ConfigKey::Model,
        ConfigKey::SysPrompt,
        ConfigKey::SysPostfix,
        ConfigKey::NotifHotkey,
        ConfigKey::MonitorHotkey,
        ConfigKey::TriggerHotkey,
        ConfigKey::AutoPasteHotkey,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::Model => "model",
            ConfigKey::SysPrompt => "sys_prompt",
            ConfigKey::SysPostfix => "sys_postfix",
            ConfigKey::NotifHotkey => "notif_hotkey",
            ConfigKey::MonitorHotkey => "monitor_hotkey",
            ConfigKey::TriggerHotkey => "trigger_hotkey",
            ConfigKey::AutoPasteHotkey => "auto_paste_hotkey",
        }
    }

    fn comment(&self) -> &'static str {
        match self {
            ConfigKey::Model => "Ollama model used to improve clipboard text",
            ConfigKey::SysPrompt => "System prompt sent with every request",
            ConfigKey::SysPostfix => "Appended to the system prompt on its own line",
            ConfigKey::NotifHotkey => "Hotkey that toggles desktop notifications",
            ConfigKey::MonitorHotkey => "Hotkey that toggles clipboard monitoring",
            ConfigKey::TriggerHotkey => "Hotkey that triggers an improvement of the clipboard",
            ConfigKey::AutoPasteHotkey => "Hotkey that toggles pasting the improved text",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            ConfigKey::Model => "gemma3",
            ConfigKey::SysPrompt => {
                "Improve the following text without significantly changing the word count or meaning."
            }
            ConfigKey::SysPostfix => {
                "Output only the requested text and nothing, this is extremely important."
            }
            ConfigKey::NotifHotkey => "ctrl+alt+n",
            ConfigKey::MonitorHotkey => "ctrl+shift+c",
            ConfigKey::TriggerHotkey => "ctrl+c",
            ConfigKey::AutoPasteHotkey => "ctrl+alt+v",
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub model: String,
    pub sys_prompt: String,
    pub sys_postfix: String,
    pub notif_hotkey: String,
    pub monitor_hotkey: String,
    pub trigger_hotkey: String,
    pub auto_paste_hotkey: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(&RawConfig::new())
    }
}

impl Config {
    /// Build a config from a raw mapping, using defaults for absent keys.
    pub fn from_raw(raw: &RawConfig) -> Self {
        let value = |key: ConfigKey| {
            raw.get(key.as_str())
                .cloned()
                .unwrap_or_else(|| key.default_value().to_string())
        };

        Self {
            model: value(ConfigKey::Model),
            sys_prompt: value(ConfigKey::SysPrompt),
            sys_postfix: value(ConfigKey::SysPostfix),
            notif_hotkey: value(ConfigKey::NotifHotkey),
            monitor_hotkey: value(ConfigKey::MonitorHotkey),
            trigger_hotkey: value(ConfigKey::TriggerHotkey),
            auto_paste_hotkey: value(ConfigKey::AutoPasteHotkey),
        }
    }

    pub fn get(&self, key: ConfigKey) -> &str {
        match key {
            ConfigKey::Model => &self.model,
            ConfigKey::SysPrompt => &self.sys_prompt,
            ConfigKey::SysPostfix => &self.sys_postfix,
            ConfigKey::NotifHotkey => &self.notif_hotkey,
            ConfigKey::MonitorHotkey => &self.monitor_hotkey,
            ConfigKey::TriggerHotkey => &self.trigger_hotkey,
            ConfigKey::AutoPasteHotkey => &self.auto_paste_hotkey,
        }
    }

    pub fn set(&mut self, key: ConfigKey, value: impl Into<String>) {
        let value = value.into();
        match key {
            ConfigKey::Model => self.model = value,
            ConfigKey::SysPrompt => self.sys_prompt = value,
            ConfigKey::SysPostfix => self.sys_postfix = value,
            ConfigKey::NotifHotkey => self.notif_hotkey = value,
            ConfigKey::MonitorHotkey => self.monitor_hotkey = value,
            ConfigKey::TriggerHotkey => self.trigger_hotkey = value,
            ConfigKey::AutoPasteHotkey => self.auto_paste_hotkey = value,
        }
    }

    /// System prompt with the postfix on its own line.
    pub fn system_prompt(&self) -> String {
        if self.sys_postfix.trim().is_empty() {
            self.sys_prompt.clone()
        } else {
            format!("{}\n{}", self.sys_prompt, self.sys_postfix)
        }
    }

    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("com", "oclip", "oclip")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Get the data directory path (logs, downloaded backend)
    pub fn data_dir() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("com", "oclip", "oclip")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }
}

/// Parse `key=value` lines. Blank lines, `#` comments and lines without `=`
/// are skipped.
pub fn parse(contents: &str) -> RawConfig {
    let mut raw = RawConfig::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            debug!("Skipping malformed config line: {}", line);
            continue;
        };
        raw.insert(key.trim().to_string(), unescape(value.trim()));
    }
    raw
}

/// Render the full key set with a comment above each key.
pub fn render(config: &Config) -> String {
    let mut out = String::from("# oclip settings\n");
    for key in ConfigKey::ALL {
        out.push('\n');
        out.push_str("# ");
        out.push_str(key.comment());
        out.push('\n');
        out.push_str(key.as_str());
        out.push('=');
        out.push_str(&escape(config.get(key)));
        out.push('\n');
    }
    out
}

/// Backslash and newline are escaped everywhere. Spaces and tabs are escaped
/// only at the edges, where the reader would otherwise trim them.
fn escape(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\n', "\\n");
    let start = escaped.len() - escaped.trim_start_matches(is_edge_space).len();
    let end = escaped.trim_end_matches(is_edge_space).len().max(start);

    let mut out = String::with_capacity(escaped.len() + 4);
    escaped[..start].chars().for_each(|c| out.push_str(escape_space(c)));
    out.push_str(&escaped[start..end]);
    escaped[end..].chars().for_each(|c| out.push_str(escape_space(c)));
    out
}

fn is_edge_space(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn escape_space(c: char) -> &'static str {
    if c == '\t' {
        "\\t"
    } else {
        "\\s"
    }
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('s') => out.push(' '),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Reads and writes the settings file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform default location.
    pub fn default_location() -> Result<Self, ConfigError> {
        Ok(Self::new(Config::config_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw mapping. Any failure yields an empty mapping.
    pub fn load(&self) -> RawConfig {
        match fs::read_to_string(&self.path) {
            Ok(contents) => parse(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {}, using defaults", self.path.display());
                RawConfig::new()
            }
            Err(e) => {
                warn!("{}", ConfigError::ReadError(e));
                RawConfig::new()
            }
        }
    }

    pub fn load_config(&self) -> Config {
        Config::from_raw(&self.load())
    }

    /// Write `current`, merged against the file as it is right now.
    ///
    /// Keys the session changed relative to `baseline` take the session value;
    /// every other key keeps the latest on-disk value. Returns what was written.
    pub fn save(&self, current: &Config, baseline: &Config) -> Result<Config, ConfigError> {
        let on_disk = self.load();
        let mut merged = current.clone();

        for key in ConfigKey::ALL {
            if current.get(key) == baseline.get(key) {
                if let Some(disk_value) = on_disk.get(key.as_str()) {
                    merged.set(key, disk_value.clone());
                }
            }
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(ConfigError::WriteError)?;
            }
        }
        fs::write(&self.path, render(&merged)).map_err(ConfigError::WriteError)?;

        info!("Config saved to: {}", self.path.display());
        Ok(merged)
    }
}

/// Anything that can persist the session configuration.
pub trait ConfigSink: Send + Sync {
    fn persist(&self) -> Result<(), ConfigError>;
}

struct SettingsState {
    current: Config,
    baseline: Config,
}

/// Session settings: the live config plus the on-disk snapshot it diverged from.
pub struct Settings {
    store: ConfigStore,
    state: Mutex<SettingsState>,
}

impl Settings {
    /// Load from the store; the loaded values become the baseline.
    pub fn load(store: ConfigStore) -> Self {
        let baseline = store.load_config();
        Self {
            store,
            state: Mutex::new(SettingsState {
                current: baseline.clone(),
                baseline,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SettingsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current(&self) -> Config {
        self.lock().current.clone()
    }

    /// Change a value in memory only.
    pub fn set(&self, key: ConfigKey, value: impl Into<String>) {
        self.lock().current.set(key, value);
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let mut state = self.lock();
        let written = self.store.save(&state.current, &state.baseline)?;
        state.current = written.clone();
        state.baseline = written;
        Ok(())
    }
}

impl ConfigSink for Settings {
    fn persist(&self) -> Result<(), ConfigError> {
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ConfigStore {
        ConfigStore::new(dir.path().join(CONFIG_FILE_NAME))
    }

    // ===================
    // Parsing Tests
    // ===================

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let raw = parse("# a comment\n\nmodel=llama3\n   \n#model=ignored\n");
        assert_eq!(raw.len(), 1);
        assert_eq!(raw.get("model").map(String::as_str), Some("llama3"));
    }

    #[test]
    fn test_parse_keeps_equals_in_value() {
        let raw = parse("sys_prompt=a=b=c");
        assert_eq!(raw.get("sys_prompt").map(String::as_str), Some("a=b=c"));
    }

    #[test]
    fn test_parse_skips_lines_without_separator() {
        let raw = parse("garbage\nmodel=phi3");
        assert_eq!(raw.len(), 1);
    }

    #[test]
    fn test_escaped_newline_round_trip() {
        let mut config = Config::default();
        config.sys_prompt = "line one\nline two \\ end".to_string();
        let parsed = Config::from_raw(&parse(&render(&config)));
        assert_eq!(parsed.sys_prompt, config.sys_prompt);
    }

    #[test]
    fn test_edge_whitespace_round_trip() {
        let mut config = Config::default();
        config.sys_postfix = " done".to_string();
        config.sys_prompt = "\tindented and trailing  ".to_string();

        let rendered = render(&config);
        assert!(rendered.contains("sys_postfix=\\sdone\n"));

        let parsed = Config::from_raw(&parse(&rendered));
        assert_eq!(parsed.sys_postfix, " done");
        assert_eq!(parsed.sys_prompt, config.sys_prompt);
    }

    #[test]
    fn test_whitespace_only_value_round_trip() {
        let mut config = Config::default();
        config.sys_postfix = "  ".to_string();
        let parsed = Config::from_raw(&parse(&render(&config)));
        assert_eq!(parsed.sys_postfix, "  ");
    }

    #[test]
    fn test_interior_spaces_not_escaped() {
        assert_eq!(escape("a b"), "a b");
        assert_eq!(escape(" a b "), "\\sa b\\s");
    }

    // ===================
    // Defaults Tests
    // ===================

    #[test]
    fn test_missing_keys_fall_back_to_defaults() {
        let config = Config::from_raw(&parse("model=mistral\nunknown=1"));
        assert_eq!(config.model, "mistral");
        assert_eq!(config.monitor_hotkey, "ctrl+shift+c");
        assert_eq!(config.trigger_hotkey, "ctrl+c");
        assert_eq!(config.sys_prompt, ConfigKey::SysPrompt.default_value());
    }

    #[test]
    fn test_system_prompt_joins_postfix() {
        let mut config = Config::default();
        config.sys_prompt = "Fix it.".into();
        config.sys_postfix = "Only output text.".into();
        assert_eq!(config.system_prompt(), "Fix it.\nOnly output text.");

        config.sys_postfix = String::new();
        assert_eq!(config.system_prompt(), "Fix it.");
    }

    #[test]
    fn test_render_emits_every_key_in_order() {
        let rendered = render(&Config::default());
        let keys: Vec<&str> = rendered
            .lines()
            .filter(|l| !l.starts_with('#') && !l.is_empty())
            .filter_map(|l| l.split_once('=').map(|(k, _)| k))
            .collect();
        let expected: Vec<&str> = ConfigKey::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(keys, expected);
        assert!(rendered.contains("# Ollama model"));
    }

    // ===================
    // Store Tests
    // ===================

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store_in(&dir).load().is_empty());
    }

    #[test]
    fn test_load_unreadable_path_is_empty() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be read as a file
        let store = ConfigStore::new(dir.path());
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("nested").join(CONFIG_FILE_NAME));
        let config = Config::default();
        store.save(&config, &config).unwrap();
        assert_eq!(store.load_config(), config);
    }

    #[test]
    fn test_save_keeps_external_edits_to_untouched_keys() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let baseline = Config::default();
        store.save(&baseline, &baseline).unwrap();

        // Someone edits the file while the session runs
        let external = fs::read_to_string(store.path())
            .unwrap()
            .replace("notif_hotkey=ctrl+alt+n", "notif_hotkey=f9")
            + "\nextra_key=dropped\n";
        fs::write(store.path(), external).unwrap();

        let mut current = baseline.clone();
        current.model = "llama3.2".into();
        let written = store.save(&current, &baseline).unwrap();

        let reloaded = store.load_config();
        assert_eq!(reloaded, written);
        assert_eq!(reloaded.model, "llama3.2");
        assert_eq!(reloaded.notif_hotkey, "f9");
        assert_eq!(reloaded.monitor_hotkey, baseline.monitor_hotkey);
        // Only the fixed key set is ever written
        assert!(!store.load().contains_key("extra_key"));
    }

    #[test]
    fn test_session_change_wins_over_stale_disk_value() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "model=from-disk\n").unwrap();

        let baseline = Config::default();
        let mut current = baseline.clone();
        current.model = "from-session".into();
        store.save(&current, &baseline).unwrap();

        assert_eq!(store.load_config().model, "from-session");
    }

    // ===================
    // Settings Tests
    // ===================

    #[test]
    fn test_settings_set_is_memory_only_until_persist() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(store_in(&dir));
        settings.set(ConfigKey::Model, "qwen2.5");
        assert!(store_in(&dir).load().is_empty());

        settings.persist().unwrap();
        assert_eq!(store_in(&dir).load_config().model, "qwen2.5");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::NoConfigDir;
        assert!(err.to_string().contains("config directory"));

        let err = ConfigError::WriteError(std::io::Error::other("disk full"));
        assert!(err.to_string().contains("disk full"));
    }
}
