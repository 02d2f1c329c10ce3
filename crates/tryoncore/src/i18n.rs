use std::collections::HashMap;

use fluent_templates::{
    fluent_bundle::{FluentArgs, FluentValue},
    static_loader, Loader,
};
use once_cell::sync::Lazy;
use unic_langid::LanguageIdentifier;

use crate::core::types::Language;

static_loader! {
    static LOCALES = {
        locales: "./locales",
        fallback_language: "uz",
        customise: |bundle| bundle.set_use_isolating(false),
    };
}

static UZ: Lazy<LanguageIdentifier> = Lazy::new(|| "uz".parse().unwrap_or_default());
static RU: Lazy<LanguageIdentifier> = Lazy::new(|| "ru".parse().unwrap_or_default());
static EN: Lazy<LanguageIdentifier> = Lazy::new(|| "en".parse().unwrap_or_default());

fn lang_id(lang: Language) -> &'static LanguageIdentifier {
    match lang {
        Language::Uz => &*UZ,
        Language::Ru => &*RU,
        Language::En => &*EN,
    }
}

/// Returns a localized string for the given key.
/// Converts literal `\n` sequences to actual newlines for proper Telegram formatting.
pub fn t(lang: Language, key: &str) -> String {
    let text = LOCALES
        .lookup(lang_id(lang), key)
        .unwrap_or_else(|| LOCALES.lookup(&UZ, key).unwrap_or_else(|| key.to_string()));
    text.replace("\\n", "\n")
}

/// Returns a localized string with arguments for interpolation.
pub fn t_args(lang: Language, key: &str, args: &FluentArgs) -> String {
    let args_map: HashMap<String, FluentValue> = args.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();

    let text = LOCALES
        .lookup_with_args(lang_id(lang), key, &args_map)
        .unwrap_or_else(|| {
            LOCALES
                .lookup_with_args(&UZ, key, &args_map)
                .unwrap_or_else(|| key.to_string())
        });
    text.replace("\\n", "\n")
}

/// Shorthand for `t_args` with `(name, value)` pairs
pub fn tf(lang: Language, key: &str, pairs: &[(&str, FluentValue<'static>)]) -> String {
    let mut args = FluentArgs::new();
    for (name, value) in pairs {
        args.set(name.to_string(), value.clone());
    }
    t_args(lang, key, &args)
}

/// Is `text` the localized (or English) "generate" word?
pub fn is_generate_word(text: &str) -> bool {
    let text = text.trim().to_lowercase();
    text == "generate"
        || Language::ALL
            .iter()
            .any(|&lang| t(lang, "generate-word").to_lowercase() == text)
}
