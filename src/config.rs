use std::path::PathBuf;
use colored::Colorize;
use json_comments::StripComments;
use serde::{Serialize, Deserialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub debug: bool,
    pub api_addr: String,
    pub model: String,
    /// Substring a model id must contain to be offered for selection.
    pub model_filter: String,
    /// Where the key, rooms and messages are kept. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
    /// Key supplied through the environment; takes precedence over the stored one.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            api_addr: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            model_filter: "gpt-".to_string(),
            data_dir: None,
            api_key: None,
        }
    }
}

pub fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("CHATR_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let mut config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    config_dir.push("chatr");
    config_dir.push("chatr.config.json");
    config_dir
}

pub fn load_config() -> Config {
    let config_path = get_config_path();
    if !config_path.exists() {
        write_default_config(&config_path);
    }

    let mut config = match std::fs::read_to_string(&config_path) {
        Ok(json) => parse_config(&json).unwrap_or_else(|e| {
            println!(
                "{} {} {}\n{}",
                "Failed to parse".red(),
                config_path.display().to_string().red(),
                format!(": {}", e).red(),
                "Using default config"
            );
            Config::default()
        }),
        Err(_) => Config::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Parses a config file body. `//` and `/* */` comments are allowed.
pub fn parse_config(json: &str) -> Result<Config, serde_json::Error> {
    let stripped = StripComments::new(json.as_bytes());
    serde_json::from_reader(stripped)
}

pub fn apply_env_overrides<F>(config: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(debug) = var("CHATR_DEBUG") { config.debug = debug.to_lowercase() == "true"; }
    if let Some(api_addr) = var("CHATR_API_ADDR") { config.api_addr = api_addr.trim_end_matches('/').to_string(); }
    if let Some(api_key) = var("CHATR_API_KEY") { if !api_key.is_empty() { config.api_key = Some(api_key); } }
    if let Some(model) = var("CHATR_MODEL") { config.model = model; }
    if let Some(filter) = var("CHATR_MODEL_FILTER") { config.model_filter = filter; }
    if let Some(dir) = var("CHATR_DATA_DIR") { config.data_dir = Some(PathBuf::from(dir)); }
}

fn write_default_config(config_path: &std::path::Path) {
    let Some(parent) = config_path.parent() else { return };
    if let Err(e) = std::fs::create_dir_all(parent) {
        println!(
            "{}",
            format!("Failed to create config directory '{}': {}", parent.display(), e).red()
        );
        return;
    }
    let default_json = serde_json::to_string_pretty(&Config::default()).unwrap_or_else(|_| "{}".to_string());
    match std::fs::write(config_path, default_json) {
        Ok(()) => println!(
            "{}",
            format!("Created default config at '{}'", config_path.display()).green()
        ),
        Err(e) => println!(
            "{}",
            format!("Failed to write default config to '{}': {}", config_path.display(), e).red()
        ),
    }
}
