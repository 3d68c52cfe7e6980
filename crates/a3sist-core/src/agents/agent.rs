//! Worker contract

use crate::error::Result;
use crate::request::{AgentResult, Request};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Category of work an agent performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Language-specific assistance
    Language,
    /// Code analysis
    Analysis,
    /// Refactoring
    Refactoring,
    /// Test generation and validation
    Testing,
    /// Documentation and knowledge lookup
    Knowledge,
    /// Remote tool execution
    Tooling,
    /// Coordinates other agents
    Coordination,
    /// Anything else
    General,
}

impl AgentKind {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Language => "language",
            Self::Analysis => "analysis",
            Self::Refactoring => "refactoring",
            Self::Testing => "testing",
            Self::Knowledge => "knowledge",
            Self::Tooling => "tooling",
            Self::Coordination => "coordination",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declared capabilities used for routing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    /// Keywords that suggest this agent (case-insensitive substring match)
    #[serde(default)]
    pub keywords: Vec<String>,
    /// File extensions this agent understands, without the dot
    #[serde(default)]
    pub file_extensions: Vec<String>,
    /// Higher weight wins when several agents match
    #[serde(default)]
    pub priority_weight: u32,
}

impl AgentCapabilities {
    /// Create empty capabilities
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set routing keywords
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Set supported file extensions
    #[must_use]
    pub fn with_file_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// Set the routing weight
    #[must_use]
    pub fn with_priority_weight(mut self, weight: u32) -> Self {
        self.priority_weight = weight;
        self
    }

    /// Whether the request mentions a keyword or targets a supported file type
    pub fn matches(&self, request: &Request) -> bool {
        let prompt = request.prompt.to_lowercase();
        if self
            .keywords
            .iter()
            .any(|k| !k.is_empty() && prompt.contains(&k.to_lowercase()))
        {
            return true;
        }
        request
            .file_extension()
            .is_some_and(|ext| self.file_extensions.iter().any(|e| *e == ext))
    }
}

/// Agent health as last observed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealth {
    /// Never checked
    #[default]
    Unknown,
    /// Last check succeeded
    Healthy,
    /// Last check failed
    Unhealthy,
}

/// Worker contract
///
/// Implementations must be cheap to share: the orchestrator keeps one
/// instance per registered name and calls it concurrently.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Registered name
    fn name(&self) -> &str;

    /// Work category
    fn kind(&self) -> AgentKind;

    /// Whether this agent is willing to take the request
    fn can_handle(&self, request: &Request) -> bool;

    /// Process the request; cancellation is cooperative
    async fn handle(&self, request: &Request, cancel: &CancellationToken) -> Result<AgentResult>;

    /// Called once before the first request
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Called once when the orchestrator shuts down
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Lightweight liveness check
    async fn health_check(&self) -> bool {
        true
    }
}
