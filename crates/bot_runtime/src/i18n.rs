//! Localization seam
//!
//! The runtime resolves a subject's locale from conversation state and asks a
//! [`Localizer`] for message text. [`BuiltinCatalog`] ships the strings the
//! built-in handlers use.

use std::collections::HashMap;

pub const DEFAULT_LOCALE: &str = "en";

pub trait Localizer: Send + Sync {
    fn default_locale(&self) -> &str;

    fn supports(&self, locale: &str) -> bool;

    /// Supported locale codes, sorted.
    fn available(&self) -> Vec<String>;

    /// Text for `key` in `locale`, with `{name}` placeholders filled from `args`.
    /// Falls back to the default locale, then to the key itself.
    fn translate(&self, locale: &str, key: &str, args: &[(&str, String)]) -> String;
}

const EN: &[(&str, &str)] = &[
    ("start.greeting", "Hello, {name}! Send /help to see what I can do."),
    (
        "help.text",
        "Available commands:\n/start - greeting\n/help - this message\n/echo <text> - repeat text\n/info - who and where you are\n/language [code] - change language\n/cancel - reset the conversation\n/test - check backends",
    ),
    ("echo.no_text", "Nothing to echo. Usage: /echo <text>"),
    (
        "info.text",
        "User ID: {user_id}\nName: {user_name}\nUsername: {username}\nChat ID: {chat_id}\nChat type: {chat_type}\nLanguage: {locale}\nState: {state}",
    ),
    ("info.no_username", "not set"),
    ("info.no_state", "none"),
    ("language.prompt", "Send a language code. Available: {available}"),
    ("language.changed", "Language set to {locale}."),
    ("language.unsupported", "Unsupported language '{locale}'. Available: {available}"),
    ("cancel.done", "Cancelled."),
    ("cancel.nothing", "Nothing to cancel."),
    ("throttle.notice", "Too many requests. Try again in {seconds}s."),
    (
        "test.results",
        "State store: {store_status} ({store_time})\nEligibility source: {eligibility_status} ({eligibility_time})",
    ),
    ("test.ok", "OK"),
    ("test.mismatch", "Data mismatch"),
    ("test.error", "Error: {error}"),
    ("error.generic", "Something went wrong. Please try again."),
];

const ES: &[(&str, &str)] = &[
    ("start.greeting", "¡Hola, {name}! Envía /help para ver lo que puedo hacer."),
    (
        "help.text",
        "Comandos disponibles:\n/start - saludo\n/help - este mensaje\n/echo <texto> - repetir texto\n/info - quién y dónde estás\n/language [código] - cambiar idioma\n/cancel - reiniciar la conversación\n/test - comprobar servicios",
    ),
    ("echo.no_text", "Nada que repetir. Uso: /echo <texto>"),
    (
        "info.text",
        "ID de usuario: {user_id}\nNombre: {user_name}\nUsuario: {username}\nID de chat: {chat_id}\nTipo de chat: {chat_type}\nIdioma: {locale}\nEstado: {state}",
    ),
    ("info.no_username", "sin definir"),
    ("info.no_state", "ninguno"),
    ("language.prompt", "Envía un código de idioma. Disponibles: {available}"),
    ("language.changed", "Idioma cambiado a {locale}."),
    ("language.unsupported", "Idioma '{locale}' no soportado. Disponibles: {available}"),
    ("cancel.done", "Cancelado."),
    ("cancel.nothing", "No hay nada que cancelar."),
    ("throttle.notice", "Demasiadas solicitudes. Inténtalo de nuevo en {seconds}s."),
    (
        "test.results",
        "Almacén de estado: {store_status} ({store_time})\nFuente de elegibilidad: {eligibility_status} ({eligibility_time})",
    ),
    ("test.ok", "OK"),
    ("test.mismatch", "Datos no coinciden"),
    ("test.error", "Error: {error}"),
    ("error.generic", "Algo salió mal. Inténtalo de nuevo."),
];

pub struct BuiltinCatalog {
    default_locale: String,
    messages: HashMap<&'static str, HashMap<&'static str, &'static str>>,
}

impl Default for BuiltinCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinCatalog {
    pub fn new() -> Self {
        let mut messages = HashMap::new();
        messages.insert("en", EN.iter().copied().collect());
        messages.insert("es", ES.iter().copied().collect());
        Self {
            default_locale: DEFAULT_LOCALE.to_string(),
            messages,
        }
    }

    fn lookup(&self, locale: &str, key: &str) -> Option<&'static str> {
        self.messages.get(locale)?.get(key).copied()
    }
}

impl Localizer for BuiltinCatalog {
    fn default_locale(&self) -> &str {
        &self.default_locale
    }

    fn supports(&self, locale: &str) -> bool {
        self.messages.contains_key(locale)
    }

    fn available(&self) -> Vec<String> {
        let mut locales: Vec<String> = self.messages.keys().map(|l| l.to_string()).collect();
        locales.sort_unstable();
        locales
    }

    fn translate(&self, locale: &str, key: &str, args: &[(&str, String)]) -> String {
        let template = self
            .lookup(locale, key)
            .or_else(|| self.lookup(&self.default_locale, key));
        match template {
            Some(template) => fill(template, args),
            None => {
                tracing::warn!(locale, key, "missing translation");
                key.to_string()
            }
        }
    }
}

fn fill(template: &str, args: &[(&str, String)]) -> String {
    args.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_with_placeholders() {
        let catalog = BuiltinCatalog::new();
        assert_eq!(
            catalog.translate("en", "throttle.notice", &[("seconds", "2".into())]),
            "Too many requests. Try again in 2s."
        );
        assert_eq!(
            catalog.translate("es", "language.changed", &[("locale", "es".into())]),
            "Idioma cambiado a es."
        );
    }

    #[test]
    fn test_fallbacks() {
        let catalog = BuiltinCatalog::new();
        assert!(!catalog.supports("de"));
        assert_eq!(catalog.translate("de", "cancel.done", &[]), "Cancelled.");
        assert_eq!(catalog.translate("en", "no.such.key", &[]), "no.such.key");
    }

    #[test]
    fn test_catalogs_have_the_same_keys() {
        let catalog = BuiltinCatalog::new();
        let mut en: Vec<_> = catalog.messages["en"].keys().collect();
        let mut es: Vec<_> = catalog.messages["es"].keys().collect();
        en.sort();
        es.sort();
        assert_eq!(en, es);
        assert_eq!(catalog.available(), vec!["en", "es"]);
    }
}
