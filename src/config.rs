use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    i18n::{I18n, NamespaceTranslation},
    mode::{set_mode, RuntimeMode},
    registry::Registry,
    store::{FileStorage, MemoryStorage, Store, DEFAULT_STORE_NAME},
    InternalResult,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub mode: RuntimeMode,

    #[serde(default)]
    pub command: CommandConfig,

    #[serde(default)]
    pub i18n: I18nConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommandConfig {
    /// How long `run_command` waits for a response. Absent means forever.
    #[serde(default, with = "option_duration_ms")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct I18nConfig {
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Translation file per language.
    #[serde(default)]
    pub translations: HashMap<String, PathBuf>,
}

impl Default for I18nConfig {
    fn default() -> Self {
        Self {
            default_language: default_language(),
            translations: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Backing file of the default store's local storage. In memory when
    /// absent.
    #[serde(default)]
    pub local_path: Option<PathBuf>,
}

impl SwitchboardConfig {
    // JSONファイルから設定を読み込む
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        from_file(path)
    }

    pub fn from_str(s: &str) -> ConfigResult<Self> {
        from_str(s)
    }

    /// Installs the configured mode, translations and default store into
    /// `registry`.
    pub fn apply(&self, registry: &Arc<Registry>) -> InternalResult<()> {
        set_mode(registry, self.mode);

        if let Some(path) = &self.store.local_path {
            let local = FileStorage::open(path)?;
            registry.get_or_insert_with(DEFAULT_STORE_NAME, || {
                Store::with_storage(Arc::new(local), Arc::new(MemoryStorage::new()))
            })?;
            debug!(path = %path.display(), "Local storage opened");
        }

        let i18n = I18n::new(registry)?;
        for (language, path) in &self.i18n.translations {
            let translations: NamespaceTranslation = from_file(path)?;
            i18n.set_translations(translations, language);
            debug!(language = %language, path = %path.display(), "Translations loaded");
        }
        i18n.change_language(&self.i18n.default_language);

        info!(mode = %self.mode, "Configuration applied");
        Ok(())
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> ConfigResult<T> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|source| ConfigError::Parse {
        origin: path.display().to_string(),
        source,
    })
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> ConfigResult<T> {
    serde_json::from_str(s).map_err(|source| ConfigError::Parse {
        origin: "<string>".to_string(),
        source,
    })
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to open {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

fn default_language() -> String {
    crate::i18n::ENGLISH_ISO2.to_string()
}

// Option<Duration> をミリ秒で扱う
mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::get_mode;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = SwitchboardConfig::from_str("{}").unwrap();
        assert_eq!(config.mode, RuntimeMode::Production);
        assert_eq!(config.command.timeout, None);
        assert_eq!(config.i18n.default_language, "en");
        assert!(config.i18n.translations.is_empty());
        assert_eq!(config.store.local_path, None);
    }

    #[test]
    fn test_parse_full_config() {
        let config = SwitchboardConfig::from_str(
            r#"{
                "mode": "development",
                "command": { "timeout": 1500 },
                "i18n": { "default_language": "de", "translations": { "de": "de.json" } },
                "store": { "local_path": "store.json" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.mode, RuntimeMode::Development);
        assert_eq!(config.command.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.i18n.default_language, "de");
        assert_eq!(
            config.i18n.translations.get("de"),
            Some(&PathBuf::from("de.json"))
        );
        assert_eq!(config.store.local_path, Some(PathBuf::from("store.json")));
    }

    #[test]
    fn test_timeout_round_trip() {
        let config = CommandConfig {
            timeout: Some(Duration::from_secs(2)),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"timeout":2000}"#);
    }

    #[test]
    fn test_invalid_config() {
        let result = SwitchboardConfig::from_str(r#"{ "mode": "staging" }"#);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = SwitchboardConfig::from_file("/nonexistent/switchboard.json");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_apply() {
        let dir = tempfile::tempdir().unwrap();
        let de_path = dir.path().join("de.json");
        let mut de = File::create(&de_path).unwrap();
        write!(de, r#"{{ "Hello world": "Hallo Welt" }}"#).unwrap();

        let config = SwitchboardConfig {
            mode: RuntimeMode::Development,
            i18n: I18nConfig {
                default_language: "de".to_string(),
                translations: HashMap::from([("de".to_string(), de_path)]),
            },
            store: StoreConfig {
                local_path: Some(dir.path().join("store.json")),
            },
            ..Default::default()
        };

        let registry = Arc::new(Registry::new());
        config.apply(&registry).unwrap();

        assert_eq!(get_mode(&registry), RuntimeMode::Development);
        let i18n = I18n::new(&registry).unwrap();
        assert_eq!(i18n.language(), "de");
        assert_eq!(i18n.t("Hello world", &[]), "Hallo Welt");
        assert!(registry.contains(DEFAULT_STORE_NAME));
    }
}
