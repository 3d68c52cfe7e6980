//! Agents
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  AgentOrchestrator                   │
//! │  ├─ routing (preferred → capabilities → default)     │
//! │  ├─ lazy instances, initialize / shutdown            │
//! │  └─ coalescing of identical in-flight requests       │
//! └──────────────────────────────────────────────────────┘
//!            │ create(name)
//!            ▼
//! ┌──────────────────┐      ┌──────────────────────────┐
//! │   AgentFactory   │─────▶│      AgentRegistry       │
//! │  + dependencies  │      │ name → type, caps, ctor  │
//! └──────────────────┘      └──────────────────────────┘
//! ```

mod agent;
mod factory;
mod orchestrator;
mod registry;
mod tool_agent;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{Agent, AgentCapabilities, AgentHealth, AgentKind};
pub use factory::{AgentDependencies, AgentFactory};
pub use orchestrator::{AgentOrchestrator, AgentOrchestratorConfig};
pub use registry::{AgentConstructor, AgentRegistration, AgentRegistry, AgentType};
pub use tool_agent::{ToolAgent, TOOL_AGENT_NAME, TOOL_ORCHESTRATOR};
