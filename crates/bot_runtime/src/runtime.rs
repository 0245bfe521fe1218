//! Event loop
//!
//! Per event: route, admit, take the subject's isolation lease, run the
//! handler, release. Denied events never reach a handler. Each event runs in
//! its own task so one slow subject never holds up another.
//!
//! Commands and callbacks are routed without touching the backend. Plain
//! messages are routed by the subject's FSM state, so the access gate runs
//! before that read and ineligible subjects cost no store round-trip.
//!
//! When the isolation lease cannot be taken because the backend is down,
//! the configured isolation policy decides: fail-open runs the handler
//! unlocked, fail-closed denies. Lock contention always drops the event.

use bot_admission::{AccessDecision, AdmissionRequest, DenyReason, FailPolicy};
use bot_storage::Subject;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use crate::context::BotContext;
use crate::event::{decode_event, EventPayload, IncomingEvent};
use crate::router::HandlerContext;
use crate::transport::OutgoingMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Handled { route: &'static str },
    /// No route matched.
    Ignored,
    Denied(DenyReason),
    /// Another event held the subject's isolation lease past the wait limit.
    Dropped { route: &'static str },
    /// The handler returned an error.
    Failed { route: &'static str },
}

async fn resolve_locale(ctx: &BotContext, subject: &Subject) -> String {
    ctx.state
        .get_locale(subject)
        .await
        .filter(|locale| ctx.localizer.supports(locale))
        .unwrap_or_else(|| ctx.localizer.default_locale().to_string())
}

async fn send_notice(ctx: &BotContext, event: &IncomingEvent, text: String) {
    if let Err(e) = ctx
        .transport
        .send(OutgoingMessage::reply_to(event, text))
        .await
    {
        tracing::warn!(error = %e, "failed to send notice");
    }
}

async fn notify_throttled(
    ctx: &BotContext,
    event: &IncomingEvent,
    subject: &Subject,
    reason: &DenyReason,
) {
    let DenyReason::RateLimited { retry_after, .. } = reason else {
        return;
    };
    let locale = resolve_locale(ctx, subject).await;
    let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    let text = ctx
        .localizer
        .translate(&locale, "throttle.notice", &[("seconds", seconds.max(1).to_string())]);
    send_notice(ctx, event, text).await;
}

/// Run one event through routing, admission, isolation and its handler.
pub async fn process_event(ctx: &BotContext, event: IncomingEvent) -> EventOutcome {
    let subject = event.subject(ctx.bot_id);

    let needs_state = matches!(event.payload, EventPayload::Message { .. })
        && event.command().is_none()
        && ctx.router.has_state_routes();

    let state = if needs_state {
        if let AccessDecision::Deny(reason) = ctx.gate.check(&subject).await {
            return EventOutcome::Denied(reason);
        }
        ctx.state.get_state(&subject, None).await
    } else {
        None
    };

    let Some(matched) = ctx.router.resolve(&event, state.as_deref()) else {
        tracing::debug!("no route for event");
        return EventOutcome::Ignored;
    };
    let route = matched.entry.name;

    let mut request = AdmissionRequest::new(subject, matched.entry.throttle_tag.clone());
    request.rule = matched.entry.rule;

    if let AccessDecision::Deny(reason) = ctx.admission.admit(&request).await {
        if ctx.notify_throttled && reason.is_first_throttle() {
            notify_throttled(ctx, &event, &subject, &reason).await;
        }
        return EventOutcome::Denied(reason);
    }

    let guard = match &ctx.isolation {
        Some(isolation) => match isolation.lock(&subject).await {
            Ok(guard) => Some(guard),
            Err(e) if e.is_unavailable() => match ctx.isolation_policy {
                FailPolicy::Open => {
                    tracing::warn!(
                        route,
                        error = %e,
                        "subject lock unavailable, running unlocked"
                    );
                    None
                }
                FailPolicy::Closed => {
                    tracing::warn!(
                        route,
                        error = %e,
                        "subject lock unavailable, denying"
                    );
                    return EventOutcome::Denied(DenyReason::BackendUnavailable);
                }
            },
            Err(e) => {
                tracing::warn!(route, error = %e, "could not isolate event, dropping");
                return EventOutcome::Dropped { route };
            }
        },
        None => None,
    };

    let locale = resolve_locale(ctx, &subject).await;
    let handler_ctx = HandlerContext {
        bot: ctx,
        event: &event,
        subject,
        args: matched.args,
        locale,
    };

    let outcome = match matched.entry.handler.handle(&handler_ctx).await {
        Ok(()) => EventOutcome::Handled { route },
        Err(e) => {
            tracing::warn!(route, error = %e, "handler failed");
            send_notice(ctx, &event, handler_ctx.t("error.generic", &[])).await;
            EventOutcome::Failed { route }
        }
    };

    if let Some(guard) = guard {
        if let Err(e) = guard.release().await {
            tracing::warn!(route, error = %e, "failed to release subject lock");
        }
    }
    outcome
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub received: usize,
    pub malformed: usize,
    pub handled: usize,
    pub ignored: usize,
    pub denied: usize,
    pub dropped: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, result: Result<EventOutcome, JoinError>) {
        match result {
            Ok(EventOutcome::Handled { .. }) => self.handled += 1,
            Ok(EventOutcome::Ignored) => self.ignored += 1,
            Ok(EventOutcome::Denied(_)) => self.denied += 1,
            Ok(EventOutcome::Dropped { .. }) => self.dropped += 1,
            Ok(EventOutcome::Failed { .. }) => self.failed += 1,
            Err(e) => {
                tracing::error!(error = %e, "event task panicked");
                self.failed += 1;
            }
        }
    }
}

/// Read JSON-lines events from `input` until EOF or `shutdown` resolves,
/// then wait for every in-flight event.
pub async fn run<R, S>(ctx: Arc<BotContext>, input: R, shutdown: S) -> RunSummary
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let mut summary = RunSummary::default();
    let mut lines = input.lines();
    let mut tasks: JoinSet<EventOutcome> = JoinSet::new();
    tokio::pin!(shutdown);

    tracing::info!(bot_id = ctx.bot_id, "Bot started");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested, no longer reading events");
                break;
            }
            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                summary.record(result);
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match decode_event(&line) {
                    Ok(event) => {
                        summary.received += 1;
                        let span = tracing::info_span!(
                            "event",
                            bot_id = ctx.bot_id,
                            chat_id = event.chat_id,
                            user_id = event.user_id
                        );
                        let ctx = ctx.clone();
                        tasks.spawn(
                            async move { process_event(&ctx, event).await }.instrument(span),
                        );
                    }
                    Err(e) => {
                        summary.malformed += 1;
                        tracing::warn!(error = %e, "skipping malformed event");
                    }
                },
                Ok(None) => {
                    tracing::info!("Event stream closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to read event stream");
                    break;
                }
            }
        }
    }

    tracing::info!(in_flight = tasks.len(), "Waiting for in-flight events");
    while let Some(result) = tasks.join_next().await {
        summary.record(result);
    }
    tracing::info!(
        received = summary.received,
        handled = summary.handled,
        denied = summary.denied,
        "Bot stopped"
    );
    summary
}
