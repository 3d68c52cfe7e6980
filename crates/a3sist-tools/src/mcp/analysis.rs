//! Tool analysis
//!
//! Maps a request to the `(server, tool)` pairs it needs. Rules are an
//! ordered table; each rule is evaluated independently and every match
//! contributes its pair, so one request can span several servers.

use crate::request::ToolRequest;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Content longer than this (in characters) triggers code analysis
pub const DEFAULT_LONG_CONTENT_THRESHOLD: usize = 500;

/// A tool selected for a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolSelection {
    /// Owning server
    pub server: String,
    /// Tool identifier
    pub tool: String,
}

impl ToolSelection {
    fn new(server: &str, tool: &str) -> Self {
        Self {
            server: server.to_string(),
            tool: tool.to_string(),
        }
    }
}

/// Condition under which a rule fires
#[derive(Debug)]
enum Trigger {
    /// Prompt matches the pattern
    Prompt(Regex),
    /// Content is longer than the analyzer threshold
    LongContent,
    /// Request carries a file path
    FilePath,
}

impl Trigger {
    fn prompt(pattern: &str) -> Self {
        Self::Prompt(Regex::new(pattern).expect("rule pattern is a compile-time constant"))
    }
}

#[derive(Debug)]
struct ToolRule {
    server: &'static str,
    tool: &'static str,
    triggers: Vec<Trigger>,
}

impl ToolRule {
    fn new(server: &'static str, tool: &'static str, triggers: Vec<Trigger>) -> Self {
        Self {
            server,
            tool,
            triggers,
        }
    }
}

static RULES: LazyLock<Vec<ToolRule>> = LazyLock::new(|| {
    vec![
        ToolRule::new(
            "core-development",
            "code_analysis",
            vec![Trigger::prompt(r"(?i)\banaly[sz]"), Trigger::LongContent],
        ),
        ToolRule::new(
            "core-development",
            "refactor_suggestions",
            vec![Trigger::prompt(r"(?i)\brefactor")],
        ),
        ToolRule::new(
            "project-analysis",
            "project_analysis",
            vec![
                Trigger::FilePath,
                Trigger::prompt(r"(?i)\b(project|solution)s?\b"),
            ],
        ),
        ToolRule::new(
            "project-analysis",
            "dependency_analysis",
            vec![Trigger::prompt(r"(?i)\bdependenc(y|ies)\b")],
        ),
        ToolRule::new(
            "knowledge",
            "documentation_search",
            vec![Trigger::prompt(r"(?i)\bdocumentation\b|\bdocs\b")],
        ),
        ToolRule::new(
            "knowledge",
            "best_practices",
            vec![Trigger::prompt(r"(?i)\bbest[ -]practices?\b")],
        ),
        ToolRule::new(
            "git-devops",
            "git_operations",
            vec![Trigger::prompt(r"(?i)\bgit\b")],
        ),
        ToolRule::new(
            "git-devops",
            "deployment_pipeline",
            vec![Trigger::prompt(r"(?i)\bdeploy")],
        ),
        ToolRule::new(
            "testing-quality",
            "test_generation",
            vec![Trigger::prompt(r"(?i)\btests?\b|\btesting\b")],
        ),
        ToolRule::new(
            "testing-quality",
            "quality_metrics",
            vec![Trigger::prompt(r"(?i)\bquality\b")],
        ),
        ToolRule::new(
            "testing-quality",
            "performance_analysis",
            vec![Trigger::prompt(r"(?i)\bperformance\b")],
        ),
    ]
});

/// Rule-table tool analyzer
#[derive(Debug, Clone)]
pub struct ToolAnalyzer {
    long_content_threshold: usize,
}

impl Default for ToolAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_LONG_CONTENT_THRESHOLD)
    }
}

impl ToolAnalyzer {
    /// Create an analyzer with a custom long-content threshold
    pub fn new(long_content_threshold: usize) -> Self {
        Self {
            long_content_threshold,
        }
    }

    /// Select the tools a request needs, in rule-table order, without duplicates.
    pub fn analyze(&self, request: &ToolRequest) -> Vec<ToolSelection> {
        RULES
            .iter()
            .filter(|rule| rule.triggers.iter().any(|t| self.fires(t, request)))
            .map(|rule| ToolSelection::new(rule.server, rule.tool))
            .collect()
    }

    /// Whether any rule fires for this request
    pub fn requires_tools(&self, request: &ToolRequest) -> bool {
        RULES
            .iter()
            .any(|rule| rule.triggers.iter().any(|t| self.fires(t, request)))
    }

    fn fires(&self, trigger: &Trigger, request: &ToolRequest) -> bool {
        match trigger {
            Trigger::Prompt(pattern) => pattern.is_match(&request.prompt),
            Trigger::LongContent => request
                .content
                .as_deref()
                .is_some_and(|c| c.chars().count() > self.long_content_threshold),
            Trigger::FilePath => request
                .file_path
                .as_deref()
                .is_some_and(|p| !p.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn tools_of(selections: &[ToolSelection]) -> Vec<&str> {
        selections.iter().map(|s| s.tool.as_str()).collect()
    }

    #[test]
    fn test_no_rules_fire() {
        let analyzer = ToolAnalyzer::default();
        assert!(analyzer.analyze(&ToolRequest::new("hello there")).is_empty());
        assert!(!analyzer.requires_tools(&ToolRequest::new("hello there")));
    }

    #[test]
    fn test_analyze_keyword() {
        let analyzer = ToolAnalyzer::default();
        let selected = analyzer.analyze(&ToolRequest::new("Please analyze this function"));
        assert_eq!(tools_of(&selected), vec!["code_analysis"]);
        assert_eq!(selected[0].server, "core-development");
    }

    #[test]
    fn test_long_content_triggers_analysis() {
        let analyzer = ToolAnalyzer::new(10);
        let request = ToolRequest::new("look at this").with_content("fn main() { println!(); }");
        assert_eq!(tools_of(&analyzer.analyze(&request)), vec!["code_analysis"]);

        let short = ToolRequest::new("look at this").with_content("x");
        assert!(analyzer.analyze(&short).is_empty());
    }

    #[test]
    fn test_file_path_triggers_project_analysis() {
        let analyzer = ToolAnalyzer::default();
        let request = ToolRequest::new("look").with_file_path("src/lib.rs");
        assert_eq!(tools_of(&analyzer.analyze(&request)), vec!["project_analysis"]);
    }

    #[test]
    fn test_rules_are_additive() {
        let analyzer = ToolAnalyzer::default();
        let analyze_only: HashSet<_> = analyzer
            .analyze(&ToolRequest::new("analyze it"))
            .into_iter()
            .collect();
        let git_only: HashSet<_> = analyzer
            .analyze(&ToolRequest::new("git it"))
            .into_iter()
            .collect();
        let both: HashSet<_> = analyzer
            .analyze(&ToolRequest::new("analyze and git it"))
            .into_iter()
            .collect();

        assert!(both.is_superset(&analyze_only));
        assert!(both.is_superset(&git_only));
        assert_eq!(both, analyze_only.union(&git_only).cloned().collect());
    }

    #[test]
    fn test_multi_server_request() {
        let analyzer = ToolAnalyzer::default();
        let request = ToolRequest::new(
            "Refactor the project, check documentation and run performance tests before deploy",
        );
        let servers: HashSet<_> = analyzer
            .analyze(&request)
            .into_iter()
            .map(|s| s.server)
            .collect();

        for expected in [
            "core-development",
            "project-analysis",
            "knowledge",
            "git-devops",
            "testing-quality",
        ] {
            assert!(servers.contains(expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_keywords_are_case_insensitive_and_whole_word() {
        let analyzer = ToolAnalyzer::default();
        assert_eq!(
            tools_of(&analyzer.analyze(&ToolRequest::new("GIT push"))),
            vec!["git_operations"]
        );
        // "latest" must not trigger the test rule
        assert!(analyzer.analyze(&ToolRequest::new("the latest news")).is_empty());
    }

    #[test]
    fn test_rule_order_is_stable() {
        let analyzer = ToolAnalyzer::default();
        let selected = analyzer.analyze(&ToolRequest::new("test quality and performance"));
        assert_eq!(
            tools_of(&selected),
            vec!["test_generation", "quality_metrics", "performance_analysis"]
        );
    }
}
