//! # Translation lookup
//!
//! Translations are grouped by language. A language table maps a key either
//! directly to a text, or to a namespace which in turn maps keys to texts:
//!
//! ```json
//! {
//!   "Hello world {name}": "Hallo {name} Welt",
//!   "ns": { "Max length {length}": "Maximale Länge {length}" }
//! }
//! ```
//!
//! Texts may contain `{option}` placeholders. Every occurrence of a
//! placeholder is replaced by the option of that name, or by nothing when the
//! option is missing. Lookups never fail: a missing language, key or namespace
//! falls back to the key itself. In development mode each fallback and every
//! missing or unused option is logged.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    event::bus::{Bus, SubscriberId},
    mode::get_mode,
    registry::{Registry, RegistryError},
};

/// Registry identifier of the translation state.
pub const I18N_STORE: &str = "_I18N_STORE";
/// Registry identifier of the bus carrying language changes.
pub const I18N_BUS_NAME: &str = "_I18N_BUS";
/// Topic emitted with the new language whenever it changes.
pub const LANGUAGE_CHANGE_TOPIC: &str = "languageChange";
pub const ENGLISH_ISO2: &str = "en";

lazy_static! {
    static ref VARIABLE_REGEX: Regex = Regex::new(r"\{([^}]*)\}").expect("valid placeholder pattern");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entry {
    Text(String),
    Namespace(HashMap<String, String>),
}

/// One language's table.
pub type NamespaceTranslation = HashMap<String, Entry>;

pub type LanguageBus = Bus<String, String>;

#[derive(Debug)]
struct I18nState {
    language: String,
    translations: HashMap<String, NamespaceTranslation>,
}

impl Default for I18nState {
    fn default() -> Self {
        Self {
            language: ENGLISH_ISO2.to_string(),
            translations: HashMap::from([(ENGLISH_ISO2.to_string(), HashMap::new())]),
        }
    }
}

/// Handle on the translations of one registry.
#[derive(Clone)]
pub struct I18n {
    state: Arc<RwLock<I18nState>>,
    bus: Arc<LanguageBus>,
    registry: Arc<Registry>,
}

impl I18n {
    pub fn new(registry: &Arc<Registry>) -> I18nResult<Self> {
        Ok(Self {
            state: registry.get_or_insert_with(I18N_STORE, RwLock::<I18nState>::default)?,
            bus: LanguageBus::shared(registry, I18N_BUS_NAME)?,
            registry: registry.clone(),
        })
    }

    /// Same as [`I18n::new`]; every handle of a registry shares one state.
    pub fn shared(registry: &Arc<Registry>) -> I18nResult<Self> {
        Self::new(registry)
    }

    pub fn global() -> I18nResult<Self> {
        Self::new(&Registry::global())
    }

    pub fn language(&self) -> String {
        self.state.read().language.clone()
    }

    /// Switches the current language and emits [`LANGUAGE_CHANGE_TOPIC`] on the
    /// language bus. The language does not need translations yet.
    pub fn change_language(&self, language: &str) {
        self.state.write().language = language.to_string();
        debug!(language, "Language changed");
        self.bus.emit(LANGUAGE_CHANGE_TOPIC, &language.to_string());
    }

    /// Subscribes to language changes.
    pub fn on_language_change<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.bus.on(LANGUAGE_CHANGE_TOPIC, handler)
    }

    pub fn bus(&self) -> &Arc<LanguageBus> {
        &self.bus
    }

    /// Replaces the table of `language`.
    pub fn set_translations(&self, translations: NamespaceTranslation, language: &str) {
        self.state
            .write()
            .translations
            .insert(language.to_string(), translations);
    }

    pub fn has_language(&self, language: &str) -> bool {
        self.state.read().translations.contains_key(language)
    }

    /// Translates a key of the current language that is not in a namespace.
    pub fn t(&self, key: &str, options: &[(&str, &str)]) -> String {
        let lookup = {
            let state = self.state.read();
            match state.translations.get(&state.language) {
                None => Lookup::MissingLanguage(state.language.clone()),
                Some(table) => match table.get(key) {
                    Some(Entry::Text(text)) => Lookup::Found(state.language.clone(), text.clone()),
                    Some(Entry::Namespace(_)) => Lookup::IsNamespace(state.language.clone()),
                    None => Lookup::MissingKey(state.language.clone()),
                },
            }
        };
        self.resolve(None, key, lookup, options)
    }

    /// A translator for the keys of namespace `namespace`.
    ///
    /// # Errors
    ///
    /// `I18nError::UnknownNamespace` if the current language has no such
    /// namespace.
    pub fn namespace(&self, namespace: &str) -> I18nResult<Namespace> {
        let state = self.state.read();
        let known = state
            .translations
            .get(&state.language)
            .and_then(|table| table.get(namespace))
            .is_some_and(|entry| matches!(entry, Entry::Namespace(_)));
        if !known {
            return Err(I18nError::UnknownNamespace {
                language: state.language.clone(),
                namespace: namespace.to_string(),
            });
        }
        Ok(Namespace {
            i18n: self.clone(),
            namespace: namespace.to_string(),
        })
    }

    fn t_namespaced(&self, namespace: &str, key: &str, options: &[(&str, &str)]) -> String {
        let lookup = {
            let state = self.state.read();
            let language = state.language.clone();
            match state.translations.get(&language) {
                None => Lookup::MissingLanguage(language),
                Some(table) => match table.get(namespace) {
                    Some(Entry::Namespace(pairs)) => match pairs.get(key) {
                        Some(text) => Lookup::Found(language, text.clone()),
                        None => Lookup::MissingKey(language),
                    },
                    _ => Lookup::MissingNamespace(language),
                },
            }
        };
        self.resolve(Some(namespace), key, lookup, options)
    }

    fn resolve(
        &self,
        namespace: Option<&str>,
        key: &str,
        lookup: Lookup,
        options: &[(&str, &str)],
    ) -> String {
        let development = get_mode(&self.registry).is_development();
        let ns = namespace.unwrap_or_default();
        let (language, text) = match lookup {
            Lookup::Found(language, text) => (language, text),
            Lookup::MissingLanguage(language) => {
                if development {
                    warn!(lng = %language, "(i18n) Missing language");
                    // Report the options the key itself would need.
                    interpolate(key, options, &language, ns, key, development);
                }
                return key.to_string();
            }
            Lookup::IsNamespace(language) => {
                if development {
                    warn!(lng = %language, key, "(i18n) Key is a namespace");
                }
                return key.to_string();
            }
            Lookup::MissingNamespace(language) => {
                if development {
                    warn!(lng = %language, ns, "(i18n) Missing namespace");
                }
                (language, key.to_string())
            }
            Lookup::MissingKey(language) => {
                if development {
                    warn!(lng = %language, ns, key, "(i18n) Missing key");
                }
                (language, key.to_string())
            }
        };
        interpolate(&text, options, &language, ns, key, development)
    }
}

impl std::fmt::Debug for I18n {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("I18n").field("state", &*self.state.read()).finish()
    }
}

/// Translator bound to one namespace. Lookups use the language current at
/// the time of each call.
#[derive(Debug, Clone)]
pub struct Namespace {
    i18n: I18n,
    namespace: String,
}

impl Namespace {
    pub fn name(&self) -> &str {
        &self.namespace
    }

    pub fn t(&self, key: &str, options: &[(&str, &str)]) -> String {
        self.i18n.t_namespaced(&self.namespace, key, options)
    }
}

enum Lookup {
    Found(String, String),
    MissingLanguage(String),
    MissingNamespace(String),
    MissingKey(String),
    IsNamespace(String),
}

fn interpolate(
    text: &str,
    options: &[(&str, &str)],
    language: &str,
    ns: &str,
    key: &str,
    development: bool,
) -> String {
    let mut unused: HashMap<&str, &str> = options.iter().copied().collect();
    let mut seen = HashSet::new();
    let mut translation = text.to_string();

    for captures in VARIABLE_REGEX.captures_iter(text) {
        let name = captures.get(1).map_or("", |m| m.as_str());
        if !seen.insert(name) {
            continue;
        }
        let value = options
            .iter()
            .find(|(option, _)| *option == name)
            .map(|(_, value)| *value);
        if value.is_none() && development {
            warn!(lng = language, ns, key, opt = name, "(i18n) Missing option");
        }
        unused.remove(name);
        translation = translation.replace(&format!("{{{name}}}"), value.unwrap_or_default());
    }

    if development {
        for option in unused.keys() {
            info!(lng = language, ns, key, opt = *option, "(i18n) Unknown option");
        }
    }
    translation
}

#[derive(Error, Debug)]
pub enum I18nError {
    #[error("Unknown namespace {namespace} for language {language}")]
    UnknownNamespace { language: String, namespace: String },

    #[error("I18n registry error: {0}")]
    Registry(#[from] RegistryError),
}

pub type I18nResult<T> = Result<T, I18nError>;
