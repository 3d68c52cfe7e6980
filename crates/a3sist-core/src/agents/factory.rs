//! Agent Factory
//!
//! Builds agent instances from registry entries. Dependencies come from an
//! explicit bag of named services instead of a container; a missing
//! dependency or a failing constructor makes the agent "not available"
//! rather than an error for the caller.

use super::agent::{Agent, AgentKind};
use super::registry::{AgentRegistration, AgentRegistry};
use crate::error::{Error, Result};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Named services available to agent constructors
#[derive(Clone, Default)]
pub struct AgentDependencies {
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for AgentDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.services.keys().collect();
        names.sort();
        f.debug_struct("AgentDependencies")
            .field("services", &names)
            .finish()
    }
}

impl AgentDependencies {
    /// Create an empty bag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide a service under a name
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(mut self, name: impl Into<String>, service: Arc<T>) -> Self {
        self.insert(name, service);
        self
    }

    /// Provide a service under a name, replacing any previous one
    pub fn insert<T: Send + Sync + 'static>(&mut self, name: impl Into<String>, service: Arc<T>) {
        self.services.insert(name.into(), service);
    }

    /// Whether a service name is provided
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Resolve a service by name and type
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.services
            .get(name)
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Resolve a service or fail with `AgentUnavailable` for `agent`
    pub fn require<T: Send + Sync + 'static>(&self, agent: &str, name: &str) -> Result<Arc<T>> {
        self.get(name).ok_or_else(|| Error::AgentUnavailable {
            name: agent.to_string(),
            reason: format!("dependency '{}' is not provided", name),
        })
    }
}

/// Instantiates registered agents
pub struct AgentFactory {
    registry: Arc<AgentRegistry>,
    dependencies: AgentDependencies,
}

impl AgentFactory {
    /// Create a factory over a registry
    pub fn new(registry: Arc<AgentRegistry>, dependencies: AgentDependencies) -> Self {
        Self {
            registry,
            dependencies,
        }
    }

    /// Registry this factory builds from
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Build the agent registered under `name`.
    ///
    /// # Errors
    ///
    /// `AgentNotFound` for unknown names; `AgentUnavailable` when a declared
    /// dependency is missing or the constructor fails or panics.
    pub fn try_create(&self, name: &str) -> Result<Arc<dyn Agent>> {
        let registration = self
            .registry
            .get(name)
            .ok_or_else(|| Error::AgentNotFound(name.to_string()))?;
        self.construct(&registration)
    }

    /// Build the agent registered under `name`, or `None` if it is unknown
    /// or cannot be built.
    pub fn create(&self, name: &str) -> Option<Arc<dyn Agent>> {
        match self.try_create(name) {
            Ok(agent) => Some(agent),
            Err(e) => {
                warn!(agent = %name, error = %e, "Agent not available");
                None
            }
        }
    }

    /// Build the highest-weighted constructible agent of a kind
    pub fn create_by_kind(&self, kind: AgentKind) -> Option<Arc<dyn Agent>> {
        let mut candidates = self.registry.find_by_kind(kind);
        candidates.sort_by(|a, b| {
            b.capabilities
                .priority_weight
                .cmp(&a.capabilities.priority_weight)
        });
        candidates
            .iter()
            .find_map(|registration| self.create(&registration.name))
    }

    fn construct(&self, registration: &AgentRegistration) -> Result<Arc<dyn Agent>> {
        let name = registration.name.as_str();
        if let Some(missing) = registration
            .dependencies
            .iter()
            .find(|d| !self.dependencies.contains(d))
        {
            return Err(Error::AgentUnavailable {
                name: name.to_string(),
                reason: format!("dependency '{}' is not provided", missing),
            });
        }

        let constructor = registration.constructor.clone();
        let dependencies = &self.dependencies;
        match catch_unwind(AssertUnwindSafe(|| constructor(name, dependencies))) {
            Ok(Ok(agent)) => {
                debug!(agent = %name, kind = %registration.kind, "Agent constructed");
                Ok(agent)
            }
            Ok(Err(e)) => Err(Error::AgentUnavailable {
                name: name.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::AgentUnavailable {
                name: name.to_string(),
                reason: "constructor panicked".to_string(),
            }),
        }
    }
}
