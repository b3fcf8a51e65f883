//! The shared side of the engine: store, index and the current rules.
//!
//! A [`Repository`] is created once per content tree and shared between
//! threads. Every login yields an independent [`Session`].

use std::sync::Arc;

use facetgate_domain::cache::register_decision_cache_metrics;
use facetgate_domain::model::{LoadDiagnostic, PrincipalContext, RuleLoader};
use facetgate_domain::{CompiledRules, DomainResult};
use facetgate_storage::{ChangeReceiver, ContentStore, SearchIndex};
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::session::Session;

/// Holds the compiled rules and recompiles them when a committed change
/// touches the rule configuration or a referenced node.
///
/// The registry drains its own change queue lazily, on the next call to
/// [`current`](Self::current).
pub struct RuleRegistry {
    store: Arc<dyn ContentStore>,
    index: Arc<dyn SearchIndex>,
    config_root: String,
    rules: RwLock<Arc<CompiledRules>>,
    state: Mutex<RegistryState>,
}

struct RegistryState {
    receiver: ChangeReceiver,
    next_version: u64,
    /// A reload failed; retry on every call until it succeeds.
    pending: bool,
    diagnostics: Vec<LoadDiagnostic>,
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("config_root", &self.config_root)
            .field("version", &self.rules.read().version())
            .finish()
    }
}

impl RuleRegistry {
    /// Loads the rules found below `config_root`.
    ///
    /// Fails when the configuration is invalid: authorization is never
    /// started without rules.
    pub fn load(
        store: Arc<dyn ContentStore>,
        index: Arc<dyn SearchIndex>,
        config_root: impl Into<String>,
    ) -> DomainResult<Self> {
        let config_root = config_root.into();
        // Observe first so no commit slips between load and subscription.
        let receiver = store.observe();
        let (rules, diagnostics) = compile(store.as_ref(), index.as_ref(), &config_root, 1)?;
        Ok(Self {
            store,
            index,
            config_root,
            rules: RwLock::new(Arc::new(rules)),
            state: Mutex::new(RegistryState {
                receiver,
                next_version: 2,
                pending: false,
                diagnostics,
            }),
        })
    }

    /// The rules as of the last committed change.
    ///
    /// When a reload fails the previous rules stay in place and the error is
    /// returned; callers must not serve reads against a configuration they
    /// know to be broken.
    pub fn current(&self) -> DomainResult<Arc<CompiledRules>> {
        let mut state = self.state.lock();
        let mut affected = state.pending;
        while let Ok(batch) = state.receiver.try_recv() {
            if affected {
                continue;
            }
            let rules = self.rules.read().clone();
            affected = batch
                .events
                .iter()
                .any(|event| rules.is_affected_by(event, self.store.as_ref()));
        }

        if affected {
            self.reload(&mut state)?;
        }
        Ok(self.rules.read().clone())
    }

    /// Non-fatal problems of the last successful load.
    pub fn diagnostics(&self) -> Vec<LoadDiagnostic> {
        self.state.lock().diagnostics.clone()
    }

    pub fn config_root(&self) -> &str {
        &self.config_root
    }

    #[instrument(skip(self, state), fields(config_root = %self.config_root))]
    fn reload(&self, state: &mut RegistryState) -> DomainResult<()> {
        let version = state.next_version;
        match compile(
            self.store.as_ref(),
            self.index.as_ref(),
            &self.config_root,
            version,
        ) {
            Ok((rules, diagnostics)) => {
                info!(version, domains = rules.domains().len(), "rules recompiled");
                *self.rules.write() = Arc::new(rules);
                state.next_version += 1;
                state.pending = false;
                state.diagnostics = diagnostics;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "rule reload failed, keeping previous rules");
                state.pending = true;
                Err(e)
            }
        }
    }
}

fn compile(
    store: &dyn ContentStore,
    index: &dyn SearchIndex,
    config_root: &str,
    version: u64,
) -> DomainResult<(CompiledRules, Vec<LoadDiagnostic>)> {
    let loaded = RuleLoader::new(store, index)
        .with_config_root(config_root)
        .load()?;
    let rules = CompiledRules::compile(&loaded.snapshot, version, store)
        .with_sources(config_root, loaded.source_paths);
    counter!("facetgate_rules_compiled_total").increment(1);
    debug!(
        version,
        referenced = rules.referenced_paths().count(),
        "rules compiled"
    );
    Ok((rules, loaded.diagnostics))
}

/// Entry point of the engine.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn ContentStore>,
    index: Arc<dyn SearchIndex>,
    rules: Arc<RuleRegistry>,
    config: Arc<EngineConfig>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("generation", &self.store.generation())
            .field("rules", &self.rules)
            .finish()
    }
}

impl Repository {
    /// Opens a repository over `store` and `index`, loading the rules.
    pub fn open(
        store: Arc<dyn ContentStore>,
        index: Arc<dyn SearchIndex>,
        config: EngineConfig,
    ) -> DomainResult<Self> {
        register_decision_cache_metrics();
        let rules = RuleRegistry::load(
            store.clone(),
            index.clone(),
            config.rules.configuration_root.clone(),
        )?;
        Ok(Self {
            store,
            index,
            rules: Arc::new(rules),
            config: Arc::new(config),
        })
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Starts a session for `principal`. The principal is fixed for the
    /// lifetime of the session.
    #[instrument(skip(self, principal), fields(user = %principal.user_id))]
    pub fn login(&self, principal: PrincipalContext) -> DomainResult<Session> {
        Session::open(
            self.store.clone(),
            self.index.clone(),
            self.rules.clone(),
            principal,
            &self.config,
        )
    }
}
