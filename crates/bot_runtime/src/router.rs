//! Event routing
//!
//! Maps an inbound event to at most one handler: commands by name, plain
//! messages by the subject's current FSM state, callbacks by data prefix.
//! Every route carries the throttle tag (and optional rule) the admission
//! layer charges the event against.

use async_trait::async_trait;
use bot_admission::RateLimitRule;
use bot_session::SessionError;
use bot_storage::Subject;
use std::sync::Arc;
use thiserror::Error;

use crate::context::BotContext;
use crate::event::{EventPayload, IncomingEvent};
use crate::transport::{OutgoingMessage, TransportError};

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type HandlerResult<T> = Result<T, HandlerError>;

/// Everything a handler may touch while processing one event.
pub struct HandlerContext<'a> {
    pub bot: &'a BotContext,
    pub event: &'a IncomingEvent,
    pub subject: Subject,
    /// Command arguments, or the full text for state and callback routes.
    pub args: &'a str,
    pub locale: String,
}

impl HandlerContext<'_> {
    pub fn t(&self, key: &str, args: &[(&str, String)]) -> String {
        self.bot.localizer.translate(&self.locale, key, args)
    }

    pub async fn reply(&self, text: impl Into<String>) -> HandlerResult<()> {
        self.bot
            .transport
            .send(OutgoingMessage::reply_to(self.event, text))
            .await?;
        Ok(())
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `/name`, matched case-insensitively.
    Command(String),
    /// Plain text while the subject is in this FSM state.
    State(String),
    /// Callback data starting with this prefix.
    Callback(String),
}

pub struct RouteEntry {
    pub name: &'static str,
    pub route: Route,
    pub throttle_tag: String,
    pub rule: Option<RateLimitRule>,
    pub handler: Arc<dyn Handler>,
}

/// A resolved route plus the text its handler should see.
pub struct RouteMatch<'a> {
    pub entry: &'a RouteEntry,
    pub args: &'a str,
}

#[derive(Default)]
pub struct Router {
    routes: Vec<RouteEntry>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, name: &'static str, route: Route, handler: Arc<dyn Handler>) -> Self {
        self.routes.push(RouteEntry {
            name,
            route,
            throttle_tag: name.to_string(),
            rule: None,
            handler,
        });
        self
    }

    pub fn command(self, name: &'static str, handler: Arc<dyn Handler>) -> Self {
        self.add(name, Route::Command(name.to_ascii_lowercase()), handler)
    }

    pub fn state(self, name: &'static str, state: &str, handler: Arc<dyn Handler>) -> Self {
        self.add(name, Route::State(state.to_string()), handler)
    }

    pub fn callback(self, name: &'static str, prefix: &str, handler: Arc<dyn Handler>) -> Self {
        self.add(name, Route::Callback(prefix.to_string()), handler)
    }

    /// Charge the last added route against `tag` instead of its own name.
    pub fn throttle_tag(mut self, tag: impl Into<String>) -> Self {
        if let Some(last) = self.routes.last_mut() {
            last.throttle_tag = tag.into();
        }
        self
    }

    /// Give the last added route its own rate limit.
    pub fn rule(mut self, rule: RateLimitRule) -> Self {
        if let Some(last) = self.routes.last_mut() {
            last.rule = Some(rule);
        }
        self
    }

    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// Whether plain messages need the subject's FSM state to be routed.
    pub fn has_state_routes(&self) -> bool {
        self.routes
            .iter()
            .any(|entry| matches!(entry.route, Route::State(_)))
    }

    /// Route `event`. `state` is the subject's current FSM state and is only
    /// consulted for plain messages.
    pub fn resolve<'a>(
        &'a self,
        event: &'a IncomingEvent,
        state: Option<&str>,
    ) -> Option<RouteMatch<'a>> {
        if let Some(command) = event.command() {
            let name = command.name.to_ascii_lowercase();
            return self
                .routes
                .iter()
                .find(|entry| matches!(&entry.route, Route::Command(c) if *c == name))
                .map(|entry| RouteMatch {
                    entry,
                    args: command.args,
                });
        }

        match &event.payload {
            EventPayload::Message { text } => {
                let state = state?;
                self.routes
                    .iter()
                    .find(|entry| matches!(&entry.route, Route::State(s) if s == state))
                    .map(|entry| RouteMatch {
                        entry,
                        args: text.trim(),
                    })
            }
            EventPayload::Callback { data } => self
                .routes
                .iter()
                .find(|entry| matches!(&entry.route, Route::Callback(p) if data.starts_with(p.as_str())))
                .map(|entry| RouteMatch {
                    entry,
                    args: data.as_str(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn handle(&self, _ctx: &HandlerContext<'_>) -> HandlerResult<()> {
            Ok(())
        }
    }

    fn router() -> Router {
        let noop: Arc<dyn Handler> = Arc::new(Noop);
        Router::new()
            .command("echo", noop.clone())
            .rule(RateLimitRule::new(1, 5))
            .command("help", noop.clone())
            .throttle_tag("docs")
            .state("language_reply", "awaiting_language", noop.clone())
            .callback("pick", "pick:", noop)
    }

    #[test]
    fn test_command_routes() {
        let router = router();
        let event = IncomingEvent::message(1, 1, "/ECHO@bot some text");
        let matched = router.resolve(&event, None).unwrap();
        assert_eq!(matched.entry.name, "echo");
        assert_eq!(matched.args, "some text");
        assert_eq!(matched.entry.throttle_tag, "echo");
        assert_eq!(matched.entry.rule, Some(RateLimitRule::new(1, 5)));

        let help = IncomingEvent::message(1, 1, "/help");
        let matched = router.resolve(&help, None).unwrap();
        assert_eq!(matched.entry.throttle_tag, "docs");
        assert_eq!(matched.entry.rule, None);
    }

    #[test]
    fn test_unknown_command_is_not_routed_by_state() {
        let router = router();
        let event = IncomingEvent::message(1, 1, "/unknown");
        assert!(router.resolve(&event, Some("awaiting_language")).is_none());
    }

    #[test]
    fn test_state_routes() {
        let router = router();
        assert!(router.has_state_routes());
        let event = IncomingEvent::message(1, 1, "  es ");

        assert!(router.resolve(&event, None).is_none());
        assert!(router.resolve(&event, Some("other")).is_none());
        let matched = router.resolve(&event, Some("awaiting_language")).unwrap();
        assert_eq!(matched.entry.name, "language_reply");
        assert_eq!(matched.args, "es");
    }

    #[test]
    fn test_callback_routes() {
        let router = router();
        let event = IncomingEvent::callback(1, 1, "pick:3");
        let matched = router.resolve(&event, None).unwrap();
        assert_eq!(matched.entry.name, "pick");
        assert_eq!(matched.args, "pick:3");

        let other = IncomingEvent::callback(1, 1, "drop:3");
        assert!(router.resolve(&other, None).is_none());
    }
}
