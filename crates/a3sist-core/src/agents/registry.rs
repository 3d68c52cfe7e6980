//! Agent Registry
//!
//! Registration is an explicit table: each entry names an agent type, its
//! capabilities, the dependencies its constructor needs and the constructor
//! itself. There is no runtime discovery.
//!
//! Entries live in a single concurrent map keyed by name, so registering an
//! existing name replaces the entry and unregistering is one atomic remove.

use super::agent::{Agent, AgentCapabilities, AgentHealth, AgentKind};
use super::factory::AgentDependencies;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds an agent instance from resolved dependencies
pub type AgentConstructor =
    Arc<dyn Fn(&str, &AgentDependencies) -> Result<Arc<dyn Agent>> + Send + Sync>;

/// A registrable agent type
#[derive(Clone)]
pub struct AgentType {
    /// Type name; the default registration name
    pub type_name: String,
    /// Work category
    pub kind: AgentKind,
    /// Routing capabilities
    pub capabilities: AgentCapabilities,
    /// Names of dependencies the constructor resolves
    pub dependencies: Vec<String>,
    constructor: Option<AgentConstructor>,
}

impl std::fmt::Debug for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentType")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .field("capabilities", &self.capabilities)
            .field("dependencies", &self.dependencies)
            .field("constructible", &self.constructor.is_some())
            .finish()
    }
}

impl AgentType {
    /// Describe an agent type with no constructor yet
    pub fn new(type_name: impl Into<String>, kind: AgentKind) -> Self {
        Self {
            type_name: type_name.into(),
            kind,
            capabilities: AgentCapabilities::default(),
            dependencies: Vec::new(),
            constructor: None,
        }
    }

    /// Set routing capabilities
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: AgentCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Declare a constructor dependency
    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    /// Set the constructor. It receives the registration name.
    #[must_use]
    pub fn with_constructor<F>(mut self, constructor: F) -> Self
    where
        F: Fn(&str, &AgentDependencies) -> Result<Arc<dyn Agent>> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(constructor));
        self
    }
}

/// A registered agent
#[derive(Clone)]
pub struct AgentRegistration {
    /// Unique name
    pub name: String,
    /// Type this entry was registered from
    pub type_name: String,
    /// Work category
    pub kind: AgentKind,
    /// Routing capabilities
    pub capabilities: AgentCapabilities,
    /// Constructor dependencies
    pub dependencies: Vec<String>,
    /// Last observed health
    pub health: AgentHealth,
    /// When the agent last handled a request
    pub last_activity: Option<DateTime<Utc>>,
    /// When the entry was registered
    pub registered_at: DateTime<Utc>,
    pub(crate) constructor: AgentConstructor,
}

impl std::fmt::Debug for AgentRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistration")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .field("capabilities", &self.capabilities)
            .field("dependencies", &self.dependencies)
            .field("health", &self.health)
            .field("last_activity", &self.last_activity)
            .finish()
    }
}

/// Concurrent registry of agent types
#[derive(Default)]
pub struct AgentRegistry {
    entries: DashMap<String, AgentRegistration>,
}

impl AgentRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent type under `name`, or under its type name.
    ///
    /// Fails if the type has no constructor or a name is blank.
    /// Re-registering a name replaces the previous entry.
    pub fn register(&self, agent_type: AgentType, name: Option<&str>) -> Result<String> {
        let name = name.unwrap_or(&agent_type.type_name).trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidRegistration(
                "agent name must not be empty".to_string(),
            ));
        }
        if agent_type.dependencies.iter().any(|d| d.trim().is_empty()) {
            return Err(Error::InvalidRegistration(format!(
                "agent '{}' declares a blank dependency",
                name
            )));
        }
        let Some(constructor) = agent_type.constructor else {
            return Err(Error::InvalidRegistration(format!(
                "agent type '{}' has no constructor",
                agent_type.type_name
            )));
        };

        let registration = AgentRegistration {
            name: name.clone(),
            type_name: agent_type.type_name,
            kind: agent_type.kind,
            capabilities: agent_type.capabilities,
            dependencies: agent_type.dependencies,
            health: AgentHealth::Unknown,
            last_activity: None,
            registered_at: Utc::now(),
            constructor,
        };

        if self.entries.insert(name.clone(), registration).is_some() {
            info!(agent = %name, "Agent registration replaced");
        } else {
            info!(agent = %name, "Agent registered");
        }
        Ok(name)
    }

    /// Remove an entry; returns whether it existed
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.entries.remove(name).is_some();
        if removed {
            debug!(agent = %name, "Agent unregistered");
        }
        removed
    }

    /// Look up by exact name
    pub fn get(&self, name: &str) -> Option<AgentRegistration> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    /// Whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All entries of one kind, sorted by name
    pub fn find_by_kind(&self, kind: AgentKind) -> Vec<AgentRegistration> {
        self.find(|e| e.kind == kind)
    }

    /// All entries matching a predicate, sorted by name
    pub fn find<P>(&self, predicate: P) -> Vec<AgentRegistration>
    where
        P: Fn(&AgentRegistration) -> bool,
    {
        let mut found: Vec<_> = self
            .entries
            .iter()
            .filter(|e| predicate(e.value()))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    /// All registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a health observation
    pub fn set_health(&self, name: &str, health: AgentHealth) {
        if let Some(mut entry) = self.entries.get_mut(name) {
            entry.health = health;
        }
    }

    /// Stamp the last-activity time
    pub fn touch(&self, name: &str) {
        if let Some(mut entry) = self.entries.get_mut(name) {
            entry.last_activity = Some(Utc::now());
        }
    }
}
