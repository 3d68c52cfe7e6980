//! Agent Orchestrator
//!
//! Routes a request to one worker and runs it:
//!
//! 1. the preferred-agent hint, if registered and willing
//! 2. agents whose capabilities match, highest `priority_weight` first,
//!    each confirmed with `can_handle`
//! 3. the configured default agent
//!
//! Instances are created lazily through the factory, initialized once and
//! kept until [`AgentOrchestrator::shutdown_all`].

use super::agent::{Agent, AgentHealth};
use super::factory::AgentFactory;
use super::registry::AgentRegistry;
use crate::cache::{fingerprint, SingleFlightCache};
use crate::error::{Error, Result};
use crate::processor::TaskHandler;
use crate::request::{AgentResult, Request};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Agent orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOrchestratorConfig {
    /// Share one run among identical requests to the same agent that
    /// overlap in time; nothing is kept once they have all returned
    #[serde(default = "default_coalesce_requests")]
    pub coalesce_requests: bool,
    /// Agent used when nothing else matches
    #[serde(default)]
    pub default_agent: Option<String>,
}

fn default_coalesce_requests() -> bool {
    true
}

impl Default for AgentOrchestratorConfig {
    fn default() -> Self {
        Self {
            coalesce_requests: default_coalesce_requests(),
            default_agent: None,
        }
    }
}

impl AgentOrchestratorConfig {
    /// Set the fallback agent
    #[must_use]
    pub fn with_default_agent(mut self, name: impl Into<String>) -> Self {
        self.default_agent = Some(name.into());
        self
    }

    /// Enable or disable coalescing of identical in-flight requests
    #[must_use]
    pub fn with_coalesce_requests(mut self, enabled: bool) -> Self {
        self.coalesce_requests = enabled;
        self
    }
}

/// Routes requests to agents and runs them
pub struct AgentOrchestrator {
    registry: Arc<AgentRegistry>,
    factory: AgentFactory,
    instances: DashMap<String, Arc<dyn Agent>>,
    /// Per-name locks so `initialize` runs once per agent
    instantiating: DashMap<String, Arc<Mutex<()>>>,
    cache: Arc<SingleFlightCache<AgentResult>>,
    config: AgentOrchestratorConfig,
}

impl AgentOrchestrator {
    /// Create an orchestrator
    pub fn new(
        factory: AgentFactory,
        cache: Arc<SingleFlightCache<AgentResult>>,
        config: AgentOrchestratorConfig,
    ) -> Self {
        Self {
            registry: factory.registry().clone(),
            factory,
            instances: DashMap::new(),
            instantiating: DashMap::new(),
            cache,
            config,
        }
    }

    /// Registry used for routing
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Result cache
    pub fn cache(&self) -> &Arc<SingleFlightCache<AgentResult>> {
        &self.cache
    }

    /// Names of instantiated agents, sorted
    pub fn live_agents(&self) -> Vec<String> {
        let mut names: Vec<_> = self.instances.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// The live instance for `name`, creating and initializing it on first use
    pub async fn instance(&self, name: &str) -> Result<Arc<dyn Agent>> {
        if let Some(agent) = self.instances.get(name) {
            return Ok(agent.value().clone());
        }

        let lock = self
            .instantiating
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        if let Some(agent) = self.instances.get(name) {
            return Ok(agent.value().clone());
        }

        let agent = self.factory.try_create(name)?;
        agent.initialize().await.map_err(|e| Error::AgentUnavailable {
            name: name.to_string(),
            reason: format!("initialization failed: {}", e),
        })?;
        self.instances.insert(name.to_string(), agent.clone());
        info!(agent = %name, "Agent instantiated");
        Ok(agent)
    }

    /// Pick the agent for a request.
    ///
    /// # Errors
    ///
    /// `AgentNotFound` when no candidate is available and willing.
    pub async fn route(&self, request: &Request) -> Result<Arc<dyn Agent>> {
        if let Some(preferred) = request.preferred_agent.as_deref() {
            if self.registry.contains(preferred) {
                if let Some(agent) = self.willing(preferred, request).await {
                    debug!(agent = %preferred, "Routed by preference");
                    return Ok(agent);
                }
            } else {
                debug!(agent = %preferred, "Preferred agent is not registered");
            }
        }

        let mut candidates = self.registry.find(|e| e.capabilities.matches(request));
        candidates.sort_by(|a, b| {
            b.capabilities
                .priority_weight
                .cmp(&a.capabilities.priority_weight)
                .then_with(|| a.name.cmp(&b.name))
        });
        for candidate in &candidates {
            if let Some(agent) = self.willing(&candidate.name, request).await {
                debug!(agent = %candidate.name, "Routed by capability");
                return Ok(agent);
            }
        }

        if let Some(default) = self.config.default_agent.as_deref() {
            match self.instance(default).await {
                Ok(agent) => {
                    debug!(agent = %default, "Routed to default agent");
                    return Ok(agent);
                }
                Err(e) => warn!(agent = %default, error = %e, "Default agent not available"),
            }
        }

        Err(Error::AgentNotFound(format!(
            "no agent available for request {}",
            request.id
        )))
    }

    async fn willing(&self, name: &str, request: &Request) -> Option<Arc<dyn Agent>> {
        match self.instance(name).await {
            Ok(agent) if agent.can_handle(request) => Some(agent),
            Ok(_) => None,
            Err(e) => {
                warn!(agent = %name, error = %e, "Agent not available");
                None
            }
        }
    }

    /// Route and run a request. Never fails: errors become failure results.
    pub async fn process(&self, request: &Request, cancel: &CancellationToken) -> AgentResult {
        let started = Instant::now();
        let result = match self.route(request).await {
            Ok(agent) => self.run(agent, request, cancel).await,
            Err(e) => AgentResult::from_error(&e),
        };
        result.with_processing_time(started.elapsed().as_millis() as u64)
    }

    async fn run(
        &self,
        agent: Arc<dyn Agent>,
        request: &Request,
        cancel: &CancellationToken,
    ) -> AgentResult {
        let name = agent.name().to_string();
        self.registry.touch(&name);

        let execute = || async {
            let outcome = tokio::select! {
                outcome = agent.handle(request, cancel) => outcome,
                _ = cancel.cancelled() => Err(Error::Cancelled),
            };
            let result = match outcome {
                Ok(result) => result,
                Err(e) if e.is_cancellation() => {
                    debug!(agent = %name, request_id = %request.id, "Request cancelled");
                    AgentResult::from_error(&e)
                }
                Err(e) => {
                    warn!(agent = %name, request_id = %request.id, error = %e, "Agent failed");
                    AgentResult::from_error(&e)
                }
            };
            let result = result.with_agent(name.as_str());
            if result.success {
                Ok(result)
            } else {
                Err(result)
            }
        };

        let outcome = if self.config.coalesce_requests {
            let key = cache_key(&name, request);
            self.cache.coalesce(&key, execute).await
        } else {
            execute().await
        };
        outcome.unwrap_or_else(|failed| failed)
    }

    /// Check every live agent and record the outcome in the registry
    pub async fn check_agent_health(&self) -> HashMap<String, AgentHealth> {
        let agents: Vec<(String, Arc<dyn Agent>)> = self
            .instances
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let checks = agents.into_iter().map(|(name, agent)| async move {
            let health = if agent.health_check().await {
                AgentHealth::Healthy
            } else {
                AgentHealth::Unhealthy
            };
            (name, health)
        });

        let results: HashMap<String, AgentHealth> = join_all(checks).await.into_iter().collect();
        for (name, health) in &results {
            self.registry.set_health(name, *health);
            if *health == AgentHealth::Unhealthy {
                warn!(agent = %name, "Agent health check failed");
            }
        }
        results
    }

    /// Shut down and drop every live instance
    pub async fn shutdown_all(&self) {
        let names = self.live_agents();
        for name in names {
            let Some((_, agent)) = self.instances.remove(&name) else {
                continue;
            };
            if let Err(e) = agent.shutdown().await {
                warn!(agent = %name, error = %e, "Agent shutdown failed");
            }
        }
        info!("All agents shut down");
    }
}

#[async_trait]
impl TaskHandler for AgentOrchestrator {
    async fn handle_task(&self, request: &Request, cancel: &CancellationToken) -> AgentResult {
        self.process(request, cancel).await
    }
}

/// Identity of a request for result coalescing. Excludes the request id.
fn cache_key(agent: &str, request: &Request) -> String {
    let context: BTreeMap<_, _> = request.context.iter().collect();
    let context = serde_json::to_string(&context).unwrap_or_default();
    fingerprint([
        agent,
        request.prompt.as_str(),
        request.content.as_deref().unwrap_or_default(),
        request.file_path.as_deref().unwrap_or_default(),
        context.as_str(),
    ])
}
