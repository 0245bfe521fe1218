//! Built-in command handlers

use async_trait::async_trait;
use bot_admission::RateLimitRule;
use bot_storage::{Feature, StoreResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::router::{Handler, HandlerContext, HandlerResult, Router};

/// FSM state while `/language` waits for a code.
pub const AWAITING_LANGUAGE: &str = "awaiting_language";

/// Router with the full built-in command set.
pub fn default_router() -> Router {
    Router::new()
        .command("start", Arc::new(StartHandler))
        .command("help", Arc::new(HelpHandler))
        .command("echo", Arc::new(EchoHandler))
        .command("info", Arc::new(InfoHandler))
        .command("language", Arc::new(LanguageHandler))
        .state("language_reply", AWAITING_LANGUAGE, Arc::new(LanguageReplyHandler))
        .throttle_tag("language")
        .command("cancel", Arc::new(CancelHandler))
        .command("test", Arc::new(BackendTestHandler))
        .rule(RateLimitRule::new(1, 10))
}

pub struct StartHandler;

#[async_trait]
impl Handler for StartHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        let name = ctx
            .event
            .user_name
            .clone()
            .or_else(|| ctx.event.username.clone())
            .unwrap_or_else(|| ctx.event.user_id.to_string());
        ctx.reply(ctx.t("start.greeting", &[("name", name)])).await
    }
}

pub struct HelpHandler;

#[async_trait]
impl Handler for HelpHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        tracing::info!(user_id = ctx.subject.user_id, "help requested");
        ctx.reply(ctx.t("help.text", &[])).await
    }
}

pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        let text = if ctx.args.is_empty() {
            ctx.t("echo.no_text", &[])
        } else {
            ctx.args.to_string()
        };
        tracing::info!(user_id = ctx.subject.user_id, "echo");
        ctx.reply(text).await
    }
}

pub struct InfoHandler;

#[async_trait]
impl Handler for InfoHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        let event = ctx.event;
        let username = match &event.username {
            Some(username) => format!("@{username}"),
            None => ctx.t("info.no_username", &[]),
        };
        let state = match ctx.bot.state.get_state(&ctx.subject, None).await {
            Some(state) => state,
            None => ctx.t("info.no_state", &[]),
        };
        let text = ctx.t(
            "info.text",
            &[
                ("user_id", event.user_id.to_string()),
                ("user_name", event.user_name.clone().unwrap_or_default()),
                ("username", username),
                ("chat_id", event.chat_id.to_string()),
                ("chat_type", event.chat_type.clone()),
                ("locale", ctx.locale.clone()),
                ("state", state),
            ],
        );
        ctx.reply(text).await
    }
}

/// `/language es` switches immediately; `/language` asks for a code and
/// waits in [`AWAITING_LANGUAGE`].
pub struct LanguageHandler;

#[async_trait]
impl Handler for LanguageHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        if ctx.args.is_empty() {
            ctx.bot
                .state
                .set_state(&ctx.subject, AWAITING_LANGUAGE, None)
                .await?;
            let available = ctx.bot.localizer.available().join(", ");
            return ctx
                .reply(ctx.t("language.prompt", &[("available", available)]))
                .await;
        }
        switch_locale(ctx, ctx.args).await?;
        Ok(())
    }
}

pub struct LanguageReplyHandler;

#[async_trait]
impl Handler for LanguageReplyHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        if switch_locale(ctx, ctx.args).await? {
            ctx.bot.state.reset_state(&ctx.subject, None).await?;
        }
        Ok(())
    }
}

/// Returns whether the locale was changed.
async fn switch_locale(ctx: &HandlerContext<'_>, code: &str) -> HandlerResult<bool> {
    let code = code.trim().to_ascii_lowercase();
    let localizer = &ctx.bot.localizer;

    if !localizer.supports(&code) {
        let available = localizer.available().join(", ");
        ctx.reply(ctx.t(
            "language.unsupported",
            &[("locale", code), ("available", available)],
        ))
        .await?;
        return Ok(false);
    }

    ctx.bot.state.set_locale(&ctx.subject, &code).await?;
    tracing::info!(subject = %ctx.subject, locale = %code, "locale changed");
    let text = localizer.translate(&code, "language.changed", &[("locale", code.clone())]);
    ctx.reply(text).await?;
    Ok(true)
}

pub struct CancelHandler;

#[async_trait]
impl Handler for CancelHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        let state = &ctx.bot.state;
        let active = state.get_state(&ctx.subject, None).await.is_some()
            || state
                .get_data(&ctx.subject, None)
                .await
                .is_some_and(|data| !data.is_empty());

        if !active {
            return ctx.reply(ctx.t("cancel.nothing", &[])).await;
        }
        state.clear(&ctx.subject, None).await?;
        ctx.reply(ctx.t("cancel.done", &[])).await
    }
}

/// Round-trips the state store and the eligibility source and reports
/// how each went.
pub struct BackendTestHandler;

struct Probe {
    status: String,
    elapsed_ms: f64,
}

impl BackendTestHandler {
    async fn probe_store(ctx: &HandlerContext<'_>) -> Probe {
        let started = Instant::now();
        let key = ctx
            .bot
            .keys
            .for_subject(&ctx.subject, &Feature::custom("healthcheck"), None);
        let payload = chrono::Utc::now().to_rfc3339().into_bytes();

        let outcome: StoreResult<Option<Vec<u8>>> = async {
            ctx.bot
                .store
                .set(&key, &payload, Some(Duration::from_secs(60)))
                .await?;
            ctx.bot.store.get(&key).await
        }
        .await;

        let status = match outcome {
            Ok(Some(read)) if read == payload => ctx.t("test.ok", &[]),
            Ok(_) => ctx.t("test.mismatch", &[]),
            Err(e) => {
                tracing::error!(%key, error = %e, "state store test failed");
                ctx.t("test.error", &[("error", e.to_string())])
            }
        };
        Probe {
            status,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    async fn probe_eligibility(ctx: &HandlerContext<'_>) -> Probe {
        let started = Instant::now();
        let status = match ctx
            .bot
            .eligibility
            .lookup(ctx.subject.user_id, ctx.subject.chat_id)
            .await
        {
            Ok(_) => ctx.t("test.ok", &[]),
            Err(e) => {
                tracing::error!(subject = %ctx.subject, error = %e, "eligibility test failed");
                ctx.t("test.error", &[("error", e.to_string())])
            }
        };
        Probe {
            status,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

#[async_trait]
impl Handler for BackendTestHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        tracing::info!(user_id = ctx.subject.user_id, "backend test requested");
        let store = Self::probe_store(ctx).await;
        let eligibility = Self::probe_eligibility(ctx).await;

        let text = ctx.t(
            "test.results",
            &[
                ("store_status", store.status),
                ("store_time", format!("{:.2}ms", store.elapsed_ms)),
                ("eligibility_status", eligibility.status),
                ("eligibility_time", format!("{:.2}ms", eligibility.elapsed_ms)),
            ],
        );
        ctx.reply(text).await
    }
}
