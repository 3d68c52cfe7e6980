//! Request and Result data model
//!
//! A [`Request`] is immutable once dispatched; every completed attempt
//! produces exactly one [`AgentResult`].

use crate::error::Error;
use a3sist_tools::ToolRequest;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use uuid::Uuid;

/// Context key carrying the id of the task a control request targets
pub const TASK_ID_KEY: &str = "taskId";

/// A unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Unique id
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Free-text intent
    pub prompt: String,
    /// Optional payload
    #[serde(default)]
    pub content: Option<String>,
    /// Optional file or project path
    #[serde(default)]
    pub file_path: Option<String>,
    /// Name of the agent the caller would like to handle this
    #[serde(default)]
    pub preferred_agent: Option<String>,
    /// Open key/value context
    #[serde(default)]
    pub context: HashMap<String, Value>,
    /// Creation time
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Request {
    /// Create a request from a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            content: None,
            file_path: None,
            preferred_agent: None,
            context: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a content payload
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Attach a file path
    #[must_use]
    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Set the preferred agent
    #[must_use]
    pub fn with_preferred_agent(mut self, agent: impl Into<String>) -> Self {
        self.preferred_agent = Some(agent.into());
        self
    }

    /// Add a context entry
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Read a string context value
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    /// The `taskId` context value parsed as a task id
    pub fn target_task_id(&self) -> Option<Uuid> {
        self.context_str(TASK_ID_KEY)
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
    }

    /// Lowercased extension of the file path, if any
    pub fn file_extension(&self) -> Option<String> {
        self.file_path
            .as_deref()
            .and_then(|p| Path::new(p).extension())
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }

    /// Tool-facing view of this request
    pub fn to_tool_request(&self) -> ToolRequest {
        ToolRequest {
            prompt: self.prompt.clone(),
            content: self.content.clone(),
            file_path: self.file_path.clone(),
            context: self.context.clone(),
        }
    }
}

/// Request priority, lowest to highest
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Priority {
    /// Background work
    Low,
    /// Default
    #[default]
    Normal,
    /// Important work
    High,
    /// Urgent work
    Critical,
}

static PRIORITY_RULES: LazyLock<Vec<(Regex, Priority)>> = LazyLock::new(|| {
    [
        (r"(?i)\b(urgent|critical|emergency)\b", Priority::Critical),
        (r"(?i)\b(important|high\s+priority)\b", Priority::High),
        (r"(?i)\b(low\s+priority|background)\b", Priority::Low),
    ]
    .into_iter()
    .map(|(pattern, priority)| {
        (
            Regex::new(pattern).expect("priority pattern is a compile-time constant"),
            priority,
        )
    })
    .collect()
});

impl Priority {
    /// All priorities, highest first
    pub const ALL: [Priority; 4] = [Self::Critical, Self::High, Self::Normal, Self::Low];

    /// Derive a priority from intent text; first matching rule wins.
    #[must_use]
    pub fn from_prompt(prompt: &str) -> Self {
        PRIORITY_RULES
            .iter()
            .find(|(pattern, _)| pattern.is_match(prompt))
            .map(|(_, priority)| *priority)
            .unwrap_or_default()
    }

    /// One level up, saturating at `Critical`
    #[must_use]
    pub fn promoted(self) -> Self {
        match self {
            Self::Low => Self::Normal,
            Self::Normal => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Normal => "Normal",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one completed attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    /// Whether the attempt succeeded
    pub success: bool,
    /// Human-readable message
    pub message: String,
    /// Optional payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Open metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    /// Confidence in the result, 0.0 to 1.0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Whether a human should review the result
    #[serde(default)]
    pub requires_review: bool,
    /// Follow-up suggestions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    /// Machine-readable error code (failures only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Error details (failures only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    /// Agent that produced the result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Processing duration in milliseconds
    #[serde(default)]
    pub processing_time_ms: u64,
}

impl AgentResult {
    /// Create a successful result
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    /// Create a failed result with an error code
    #[must_use]
    pub fn failure(message: impl Into<String>, code: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            error_details: Some(message.clone()),
            message,
            error_code: Some(code.into()),
            ..Default::default()
        }
    }

    /// Convert an error into a failed result carrying its summary and code
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self::failure(error.to_string(), error.code())
    }

    /// Attach a content payload
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Add a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Record the producing agent
    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent_name = Some(agent.into());
        self
    }

    /// Set the confidence score, clamped to 0.0..=1.0
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    /// Flag the result for human review
    #[must_use]
    pub fn with_review_required(mut self) -> Self {
        self.requires_review = true;
        self
    }

    /// Add a follow-up suggestion
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Set the processing time
    #[must_use]
    pub fn with_processing_time(mut self, ms: u64) -> Self {
        self.processing_time_ms = ms;
        self
    }

    /// Whether this result records a cancellation
    pub fn is_cancelled(&self) -> bool {
        self.error_code.as_deref() == Some(crate::error::CANCELLED_CODE)
    }
}
