use std::{
    collections::HashMap,
    env, fs,
    io::{BufRead, BufReader},
    path::PathBuf,
    time::Duration,
};

use directories::BaseDirs;

/// Layered key/value configuration: built-in defaults, then the rc file, then
/// environment variables (bare `EXECUTION_TIMEOUT` or prefixed
/// `DATACHAT_EXECUTION_TIMEOUT`, the prefixed form winning), then explicit
/// overrides from the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

const ENV_PREFIX: &str = "DATACHAT_";

impl Config {
    pub fn load() -> Self {
        let mut map = default_map();
        let config_path = default_config_path();

        // Read .datachatrc if exists
        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                apply_rc(&mut map, BufReader::new(file));
            }
        }

        // Overlay environment variables (take precedence)
        apply_env(&mut map, env::vars());

        Self { inner: map, config_path }
    }

    /// Defaults only; no rc file and no environment. Used by tests and embedders.
    pub fn defaults() -> Self {
        Self {
            inner: default_map(),
            config_path: default_config_path(),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse::<usize>().ok())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.trim().parse::<f64>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).filter(|v| !v.is_empty()).map(PathBuf::from)
    }

    /// Whole seconds; `0` (or an unparsable value) means "no limit".
    pub fn get_duration_secs(&self, key: &str) -> Option<Duration> {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

fn apply_rc(map: &mut HashMap<String, String>, reader: impl BufRead) {
    for line in reader.lines().map_while(Result::ok) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
}

fn apply_env(map: &mut HashMap<String, String>, vars: impl IntoIterator<Item = (String, String)>) {
    let mut prefixed = Vec::new();
    for (k, v) in vars {
        match k.strip_prefix(ENV_PREFIX) {
            Some(key) if is_config_key(key) => prefixed.push((key.to_string(), v)),
            Some(_) => {}
            None if is_config_key(&k) => {
                map.insert(k, v);
            }
            None => {}
        }
    }
    map.extend(prefixed);
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "INTERPRETER",
        "PYTHON_BIN",
        "STARTUP_TIMEOUT",
        "EXECUTION_TIMEOUT",
        "INTERRUPT_GRACE",
        "DISPLAY_MODE",
        "IGNORE_TARGET",
        "PLOT_WIDTH",
        "PLOT_HEIGHT",
        "PLOT_DPI",
        "TABLE_MAX_ROWS",
        "WORKING_DIR",
        "DOCUMENT_COMPILER",
        "COMPILE_TIMEOUT",
        "PRETTIFY_MARKDOWN",
    ];

    KEYS.contains(&k)
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("datachat").join(".datachatrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    // Interpreter
    m.insert("INTERPRETER".into(), "python".into());
    m.insert("PYTHON_BIN".into(), "python3".into());
    m.insert("WORKING_DIR".into(), String::new());

    // Timeouts (seconds, 0 = none)
    m.insert("STARTUP_TIMEOUT".into(), "30".into());
    m.insert("EXECUTION_TIMEOUT".into(), "0".into());
    m.insert("INTERRUPT_GRACE".into(), "5".into());
    m.insert("COMPILE_TIMEOUT".into(), "300".into());

    // Display
    m.insert("DISPLAY_MODE".into(), "last_expr".into());
    m.insert("IGNORE_TARGET".into(), "_".into());
    m.insert("TABLE_MAX_ROWS".into(), "50".into());

    // Plots: 640x480 pixels at the default size
    m.insert("PLOT_WIDTH".into(), "6.4".into());
    m.insert("PLOT_HEIGHT".into(), "4.8".into());
    m.insert("PLOT_DPI".into(), "100".into());

    // Reports
    m.insert("DOCUMENT_COMPILER".into(), "quarto".into());

    // Bools as strings
    m.insert("PRETTIFY_MARKDOWN".into(), "true".into());

    m
}
