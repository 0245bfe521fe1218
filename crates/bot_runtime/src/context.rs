//! Explicit bot context
//!
//! Every shared component the runtime and handlers use lives here and is
//! passed down by reference. Nothing is reached through globals.

use bot_admission::{
    AccessGate, AdmissionPipeline, Clock, EligibilitySource, FailPolicy, RateLimiter,
    StaticEligibility, SystemClock, ThrottleCheck,
};
use bot_session::{ConversationState, EventIsolation};
use bot_storage::{
    KeyBuilder, MemoryStateStore, RedisStateStore, SharedStore, StoreError, TimeoutStore,
};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{BackendKind, BotConfig};
use crate::eligibility::SqliteEligibility;
use crate::handlers;
use crate::i18n::{BuiltinCatalog, Localizer};
use crate::router::Router;
use crate::transport::{StdoutTransport, Transport};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Failed to create state store backend: {0}")]
    Backend(#[from] StoreError),
}

pub struct BotContext {
    pub bot_id: i64,
    pub keys: KeyBuilder,
    pub store: SharedStore,
    pub state: ConversationState,
    /// `None` when per-subject isolation is switched off.
    pub isolation: Option<EventIsolation>,
    /// Applied when the isolation lock fails because the backend is down.
    pub isolation_policy: FailPolicy,
    /// Also the first check of `admission`; shares its cache.
    pub gate: Arc<AccessGate>,
    pub admission: AdmissionPipeline,
    pub eligibility: Arc<dyn EligibilitySource>,
    pub localizer: Arc<dyn Localizer>,
    pub transport: Arc<dyn Transport>,
    pub router: Arc<Router>,
    pub notify_throttled: bool,
}

impl BotContext {
    pub fn builder(config: BotConfig) -> BotContextBuilder {
        BotContextBuilder::new(config)
    }
}

/// Wires a [`BotContext`] from configuration. Every part can be replaced
/// before `build`.
pub struct BotContextBuilder {
    config: BotConfig,
    store: Option<SharedStore>,
    eligibility: Option<Arc<dyn EligibilitySource>>,
    localizer: Option<Arc<dyn Localizer>>,
    transport: Option<Arc<dyn Transport>>,
    router: Option<Router>,
    clock: Option<Arc<dyn Clock>>,
}

impl BotContextBuilder {
    pub fn new(config: BotConfig) -> Self {
        Self {
            config,
            store: None,
            eligibility: None,
            localizer: None,
            transport: None,
            router: None,
            clock: None,
        }
    }

    /// Use this store as-is, without the configured timeout bound.
    pub fn store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn eligibility(mut self, source: Arc<dyn EligibilitySource>) -> Self {
        self.eligibility = Some(source);
        self
    }

    pub fn localizer(mut self, localizer: Arc<dyn Localizer>) -> Self {
        self.localizer = Some(localizer);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<BotContext, BuildError> {
        let config = self.config;
        let keys = KeyBuilder::new(config.bot.key_prefix.clone()).with_scope(config.bot.key_scope);

        let store = match self.store {
            Some(store) => store,
            None => create_store(&config)?,
        };

        let eligibility = self
            .eligibility
            .unwrap_or_else(|| create_eligibility(&config));

        let state = ConversationState::new(store.clone(), keys.clone())
            .with_ttl(config.state_ttl(), config.data_ttl());

        let isolation = config.session.isolate_events.then(|| {
            EventIsolation::new(store.clone(), keys.clone(), config.isolation_config())
        });

        let gate = Arc::new(AccessGate::new(
            eligibility.clone(),
            config.access_gate_config(),
        ));
        let limiter = RateLimiter::new(store.clone(), keys.clone())
            .with_clock(self.clock.unwrap_or_else(|| Arc::new(SystemClock)))
            .with_fail_policy(config.rate_limit_policy());
        let admission = AdmissionPipeline::new()
            .with_check(gate.clone())
            .with_check(Arc::new(ThrottleCheck::new(limiter, config.rate_limit_rule())));

        Ok(BotContext {
            bot_id: config.bot.bot_id,
            keys,
            store,
            state,
            isolation,
            isolation_policy: config.isolation_policy(),
            gate,
            admission,
            eligibility,
            localizer: self
                .localizer
                .unwrap_or_else(|| Arc::new(BuiltinCatalog::new())),
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(StdoutTransport::stdout())),
            router: Arc::new(self.router.unwrap_or_else(handlers::default_router)),
            notify_throttled: config.rate_limit.notify,
        })
    }
}

fn create_store(config: &BotConfig) -> Result<SharedStore, StoreError> {
    let timeout = config.backend_timeout();
    let store: SharedStore = match config.backend.kind {
        BackendKind::Memory => {
            tracing::info!("Using in-memory state store");
            Arc::new(TimeoutStore::new(MemoryStateStore::new(), timeout))
        }
        BackendKind::Redis => {
            tracing::info!(url = %config.backend.redis_url, "Using Redis state store");
            let redis = RedisStateStore::connect(&config.backend.redis_url)?;
            Arc::new(TimeoutStore::new(redis, timeout))
        }
    };
    Ok(store)
}

fn create_eligibility(config: &BotConfig) -> Arc<dyn EligibilitySource> {
    match &config.access_gate.database_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Using SQLite eligibility source");
            Arc::new(SqliteEligibility::new(path))
        }
        None => {
            tracing::info!(
                blocked_users = config.access_gate.blocked_users.len(),
                denied_chats = config.access_gate.denied_chats.len(),
                "Using static eligibility lists"
            );
            Arc::new(StaticEligibility::new(
                config.access_gate.blocked_users.iter().copied(),
                config.access_gate.denied_chats.iter().copied(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use bot_storage::Subject;

    #[tokio::test]
    async fn test_build_from_defaults() {
        let ctx = BotContext::builder(BotConfig::default())
            .transport(Arc::new(MemoryTransport::new()))
            .build()
            .unwrap();

        assert_eq!(ctx.bot_id, 0);
        assert_eq!(ctx.admission.len(), 2);
        assert!(ctx.isolation.is_some());
        assert_eq!(ctx.isolation_policy, FailPolicy::Open);
        assert!(ctx.notify_throttled);
        assert!(ctx.store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_static_lists_feed_the_gate() {
        let mut config = BotConfig::default();
        config.access_gate.blocked_users = vec![7];
        config.session.isolate_events = false;
        let ctx = BotContext::builder(config)
            .transport(Arc::new(MemoryTransport::new()))
            .build()
            .unwrap();

        assert!(ctx.isolation.is_none());
        let eligibility = ctx.eligibility.lookup(7, 7).await.unwrap();
        assert!(eligibility.user_blocked);

        let request = bot_admission::AdmissionRequest::new(Subject::new(0, 7, 7), "start");
        assert!(!ctx.admission.admit(&request).await.is_allowed());
    }
}
