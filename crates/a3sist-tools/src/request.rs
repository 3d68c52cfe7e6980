//! Tool-facing view of a unit of work

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// The subset of a request the tool subsystem needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Free-text intent
    pub prompt: String,
    /// Optional payload (usually source code)
    #[serde(default)]
    pub content: Option<String>,
    /// Optional file or project path
    #[serde(default)]
    pub file_path: Option<String>,
    /// Open key/value context
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl ToolRequest {
    /// Create a request from a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Attach a content payload
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Attach a file path
    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Add a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Read a string context value
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }

    /// Language of the payload: explicit `language` context, else inferred
    /// from the file extension, else `"unknown"`.
    pub fn language(&self) -> String {
        if let Some(language) = self.context_str("language") {
            return language.to_string();
        }
        self.file_path
            .as_deref()
            .and_then(|p| Path::new(p).extension())
            .and_then(|e| e.to_str())
            .map(language_for_extension)
            .unwrap_or("unknown")
            .to_string()
    }
}

fn language_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "rs" => "rust",
        "cs" => "csharp",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "go" => "go",
        "cpp" | "cc" | "cxx" | "hpp" | "h" => "cpp",
        "c" => "c",
        "rb" => "ruby",
        _ => "unknown",
    }
}
