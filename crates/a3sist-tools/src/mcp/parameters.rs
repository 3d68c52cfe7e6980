//! Per-tool parameter payloads

use crate::request::ToolRequest;
use serde_json::{json, Value};
use std::path::Path;

/// Build the parameter object sent with `tool`.
///
/// Unrecognized tools get an empty object.
pub fn build_parameters(tool: &str, request: &ToolRequest) -> Value {
    match tool {
        "code_analysis" => json!({
            "code": code_of(request),
            "language": request.language(),
            "analysisLevel": request.context_str("analysisLevel").unwrap_or("full"),
        }),
        "project_analysis" => json!({
            "projectPath": project_path(request),
            "analysisType": request.context_str("analysisType").unwrap_or("full"),
        }),
        "documentation_search" => json!({
            "query": request.prompt,
            "scope": request.context_str("scope").unwrap_or("all"),
        }),
        "git_operations" => json!({
            "operation": request.context_str("gitOperation").unwrap_or("status"),
            "repositoryPath": repository_path(request),
        }),
        "test_generation" => json!({
            "code": code_of(request),
            "language": request.language(),
            "testFramework": request.context_str("testFramework").unwrap_or("auto"),
        }),
        _ => json!({}),
    }
}

fn code_of(request: &ToolRequest) -> &str {
    request.content.as_deref().unwrap_or_default()
}

fn project_path(request: &ToolRequest) -> String {
    request
        .context_str("projectPath")
        .map(str::to_string)
        .or_else(|| request.file_path.clone())
        .unwrap_or_else(|| ".".to_string())
}

fn repository_path(request: &ToolRequest) -> String {
    if let Some(path) = request.context_str("repositoryPath") {
        return path.to_string();
    }
    request
        .file_path
        .as_deref()
        .and_then(|p| Path::new(p).parent())
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| ".".to_string())
}
