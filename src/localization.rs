//! Localized user-facing messages for the bot, backed by Fluent catalogs
//! under `./locales/<lang>/main.ftl`. Russian is the primary deployment
//! language; English is the fallback.

use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource, FluentValue};
use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, LazyLock};
use unic_langid::LanguageIdentifier;

const SUPPORTED_LANGUAGES: [&str; 2] = ["en", "ru"];
const FALLBACK_LANGUAGE: &str = "en";

/// Localization manager holding one bundle per supported language.
pub struct LocalizationManager {
    bundles: HashMap<String, Arc<FluentBundle<FluentResource>>>,
}

impl LocalizationManager {
    /// Load every supported catalog. Missing or malformed catalog files are
    /// tolerated — lookups then fall back to the missing-translation form.
    pub fn new() -> Self {
        let mut bundles = HashMap::new();
        for lang in SUPPORTED_LANGUAGES {
            if let Ok(locale) = lang.parse::<LanguageIdentifier>() {
                bundles.insert(lang.to_string(), Arc::new(Self::create_bundle(&locale)));
            }
        }
        Self { bundles }
    }

    fn create_bundle(locale: &LanguageIdentifier) -> FluentBundle<FluentResource> {
        let mut bundle = FluentBundle::new_concurrent(vec![locale.clone()]);
        // Keep button labels and captions free of bidi isolate marks so
        // reply-keyboard text can be compared against catalog values.
        bundle.set_use_isolating(false);

        let resource_path = format!("./locales/{locale}/main.ftl");
        if let Ok(content) = fs::read_to_string(&resource_path) {
            if let Ok(resource) = FluentResource::try_new(content) {
                let _ = bundle.add_resource(resource);
            }
        }
        bundle
    }

    pub fn is_language_supported(&self, lang: &str) -> bool {
        self.bundles.contains_key(lang)
    }

    /// Resolve a message in the given language, falling back to English.
    pub fn get_message_in_language(
        &self,
        key: &str,
        lang: &str,
        args: Option<&FluentArgs>,
    ) -> String {
        let bundle = self
            .bundles
            .get(lang)
            .or_else(|| self.bundles.get(FALLBACK_LANGUAGE));

        let bundle = match bundle {
            Some(b) => b,
            None => return format!("Missing translation: {key}"),
        };

        let msg = match bundle.get_message(key) {
            Some(msg) => msg,
            None => return format!("Missing translation: {key}"),
        };

        let pattern = match msg.value() {
            Some(pattern) => pattern,
            None => return format!("Missing value for key: {key}"),
        };

        let mut errors = vec![];
        bundle
            .format_pattern(pattern, args, &mut errors)
            .into_owned()
    }
}

impl Default for LocalizationManager {
    fn default() -> Self {
        Self::new()
    }
}

static LOCALIZATION_MANAGER: LazyLock<LocalizationManager> =
    LazyLock::new(LocalizationManager::new);

/// Get the global localization manager
pub fn get_localization_manager() -> &'static LocalizationManager {
    &LOCALIZATION_MANAGER
}

/// Map an optional language code ("ru", "ru-RU", ...) onto a supported one.
pub fn detect_language(language_code: Option<&str>) -> &'static str {
    let base = language_code
        .unwrap_or(FALLBACK_LANGUAGE)
        .split('-')
        .next()
        .unwrap_or(FALLBACK_LANGUAGE);
    SUPPORTED_LANGUAGES
        .iter()
        .find(|l| **l == base)
        .copied()
        .unwrap_or(FALLBACK_LANGUAGE)
}

/// Convenience function to get a localized message
pub fn t_lang(key: &str, language_code: Option<&str>) -> String {
    get_localization_manager().get_message_in_language(key, detect_language(language_code), None)
}

/// Convenience function to get a localized message with arguments
pub fn t_args_lang(key: &str, args: &[(&str, &str)], language_code: Option<&str>) -> String {
    let mut fluent_args = FluentArgs::new();
    for (k, v) in args {
        fluent_args.set(*k, FluentValue::from(*v));
    }
    get_localization_manager().get_message_in_language(
        key,
        detect_language(language_code),
        Some(&fluent_args),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language(Some("ru")), "ru");
        assert_eq!(detect_language(Some("ru-RU")), "ru");
        assert_eq!(detect_language(Some("en-US")), "en");
        assert_eq!(detect_language(Some("de")), "en");
        assert_eq!(detect_language(None), "en");
    }

    #[test]
    fn test_supported_languages() {
        let manager = get_localization_manager();
        assert!(manager.is_language_supported("en"));
        assert!(manager.is_language_supported("ru"));
        assert!(!manager.is_language_supported("es"));
    }
}
