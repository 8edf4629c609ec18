/*
Simple i18n helper for the backend.

This module provides:
- A tiny embedded translations store for ES/EN (compile-time embedded JSON).
- A simple `tr` function to lookup translations by key + optional params.
- A `t` convenience wrapper using the default language (DEFAULT_LANG).

Usage:
    use crate::i18n;
    let msg = i18n::t("push.not_subscribed");
    let body = i18n::tr(Some("en"), "reminder.test.evening.body", Some(&[("app", "enfoCAR")]));

Notes:
- Placeholders in translation strings use single-brace format: `{name}`.
- Default language is `es`. If a key is missing for the requested language,
  the fallback language will be used.
*/

use std::collections::HashMap;
use std::sync::OnceLock;

pub const DEFAULT_LANG: &str = "es";

static TRANSLATIONS: OnceLock<HashMap<String, HashMap<String, String>>> = OnceLock::new();

const ES_JSON: &str = r#"
{
  "reminder.daily_log.evening.title": "🚗 ¿Cómo le fue hoy a tu vehículo?",
  "reminder.daily_log.evening.body": "Registra los ingresos y gastos del día en {app} antes de que se te olviden.",
  "reminder.daily_log.late.title": "🌙 Último recordatorio del día",
  "reminder.daily_log.late.body": "Aún estás a tiempo de registrar los movimientos de hoy en {app}.",
  "reminder.test.evening.title": "🔔 Notificación de prueba",
  "reminder.test.evening.body": "Las notificaciones de {app} están funcionando correctamente ✅",
  "reminder.test.late.title": "🔔 Notificación de prueba",
  "reminder.test.late.body": "Las notificaciones de {app} están funcionando correctamente. ¡Buenas noches! ✅",
  "push.not_subscribed": "No tienes suscripciones activas a notificaciones",
  "push.not_configured": "Las notificaciones push no están configuradas en el servidor",
  "push.invalid_endpoint": "El endpoint de la suscripción no es una URL https válida",
  "push.missing_keys": "La suscripción no incluye las llaves p256dh y auth",
  "error.unsupported_language": "Idioma no soportado: {lang}",
  "app.name": "enfoCAR"
}
"#;

const EN_JSON: &str = r#"
{
  "reminder.daily_log.evening.title": "🚗 How did your vehicle do today?",
  "reminder.daily_log.evening.body": "Log today's income and expenses in {app} before you forget them.",
  "reminder.daily_log.late.title": "🌙 Last reminder of the day",
  "reminder.daily_log.late.body": "There is still time to log today's movements in {app}.",
  "reminder.test.evening.title": "🔔 Test notification",
  "reminder.test.evening.body": "{app} notifications are working correctly ✅",
  "reminder.test.late.title": "🔔 Test notification",
  "reminder.test.late.body": "{app} notifications are working correctly. Good night! ✅",
  "push.not_subscribed": "You have no active notification subscriptions",
  "push.not_configured": "Push notifications are not configured on the server",
  "push.invalid_endpoint": "Subscription endpoint is not a valid https URL",
  "push.missing_keys": "Subscription is missing the p256dh and auth keys",
  "error.unsupported_language": "Unsupported language: {lang}",
  "app.name": "enfoCAR"
}
"#;

/// Initialize translations map (lazy).
fn build_translations() -> HashMap<String, HashMap<String, String>> {
    let mut out: HashMap<String, HashMap<String, String>> = HashMap::new();

    let es_map: HashMap<String, String> = serde_json::from_str(ES_JSON).unwrap_or_else(|e| {
        panic!("failed to parse ES_JSON in i18n module: {}", e);
    });
    out.insert("es".to_string(), es_map);

    let en_map: HashMap<String, String> = serde_json::from_str(EN_JSON).unwrap_or_else(|e| {
        panic!("failed to parse EN_JSON in i18n module: {}", e);
    });
    out.insert("en".to_string(), en_map);

    out
}

/// Returns the global translations map (lang -> (key -> message)).
fn translations() -> &'static HashMap<String, HashMap<String, String>> {
    TRANSLATIONS.get_or_init(build_translations)
}

/// Normalize a language tag into a short, lowercase code (e.g. "es-CO" -> "es").
pub fn normalize_language(lang: &str) -> String {
    lang.split('-').next().unwrap_or(lang).trim().to_lowercase()
}

/// Returns true if the given language code is supported by the embedded
/// translations (e.g. "es", "en").
pub fn is_supported_language(lang: &str) -> bool {
    translations().contains_key(lang)
}

/// Translate a key using an explicit language (or default if None).
///
/// - `lang`: optional language code (`"es"`, `"en"`). If None, DEFAULT_LANG is used.
/// - `key`: translation key (flat string, e.g. "reminder.daily_log.late.title").
/// - `params`: optional slice of (name, value) for placeholder replacement. Replacements use single-brace placeholders `{name}`.
///
/// If no translation is found, returns the default language value or the key itself.
pub fn tr(lang: Option<&str>, key: &str, params: Option<&[(&str, &str)]>) -> String {
    let map = translations();

    let desired = lang.unwrap_or(DEFAULT_LANG);

    let val = map
        .get(desired)
        .and_then(|m| m.get(key))
        .cloned()
        .or_else(|| map.get(DEFAULT_LANG).and_then(|m| m.get(key)).cloned())
        // If still missing, return the key itself (useful in logs)
        .unwrap_or_else(|| key.to_string());

    if let Some(params) = params {
        let mut s = val;
        for (k, v) in params {
            s = s.replace(&format!("{{{}}}", k), v);
        }
        s
    } else {
        val
    }
}

/// Convenience wrapper: translate using default language (DEFAULT_LANG).
pub fn t(key: &str) -> String {
    tr(None, key, None)
}

/// Convenience wrapper with params (default language).
pub fn t_with(key: &str, params: &[(&str, &str)]) -> String {
    tr(None, key, Some(params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tr_basic() {
        let s = tr(Some("es"), "push.not_subscribed", None);
        assert!(s.contains("suscripciones"));
    }

    #[test]
    fn test_t_with_params() {
        let s = t_with("reminder.daily_log.late.body", &[("app", "enfoCAR")]);
        assert!(s.contains("enfoCAR"));
        assert!(!s.contains("{app}"));
    }

    #[test]
    fn test_fallback_to_default() {
        // Unknown language falls back to default (es)
        let s = tr(Some("fr"), "push.not_subscribed", None);
        assert_eq!(s, t("push.not_subscribed"));
    }

    #[test]
    fn missing_key_returns_key() {
        let k = "non.existent.key";
        let s = t(k);
        assert_eq!(s, k.to_string());
    }

    #[test]
    fn test_is_supported_language() {
        assert!(is_supported_language("es"));
        assert!(is_supported_language("en"));
        assert!(!is_supported_language("ru"));
    }

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language("es-CO"), "es");
        assert_eq!(normalize_language("en"), "en");
        assert_eq!(normalize_language("EN-us"), "en");
    }

    #[test]
    fn every_key_has_both_languages() {
        let map = translations();
        let es = &map["es"];
        let en = &map["en"];
        for key in es.keys() {
            assert!(en.contains_key(key), "missing EN translation for {key}");
        }
        assert_eq!(es.len(), en.len());
    }
}
