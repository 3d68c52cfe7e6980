//! Test agents shared by unit tests across the crate

use super::agent::{Agent, AgentKind};
use crate::error::{Error, Result};
use crate::request::{AgentResult, Request};
use crate::workflow::PREVIOUS_RESULT_KEY;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Agent that echoes the prompt, with knobs for delay, failures and health
pub(crate) struct EchoAgent {
    name: String,
    pub delay: Duration,
    pub init_delay: Duration,
    /// Fail this many calls before succeeding
    pub fail_first: AtomicU32,
    pub willing: bool,
    pub healthy: AtomicBool,
    pub calls: AtomicUsize,
    pub init_calls: AtomicUsize,
    pub shutdown_calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl EchoAgent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            init_delay: Duration::ZERO,
            fail_first: AtomicU32::new(0),
            willing: true,
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            init_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn shared(name: &str) -> Arc<dyn Agent> {
        Arc::new(Self::new(name))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn failing(self, times: u32) -> Self {
        self.fail_first.store(times, Ordering::SeqCst);
        self
    }

    pub fn unwilling(mut self) -> Self {
        self.willing = false;
        self
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AgentKind {
        AgentKind::General
    }

    fn can_handle(&self, _request: &Request) -> bool {
        self.willing
    }

    async fn handle(&self, request: &Request, cancel: &CancellationToken) -> Result<AgentResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let outcome = tokio::select! {
            _ = tokio::time::sleep(self.delay) => Ok(()),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome?;

        let should_fail = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(Error::Internal(format!("{} failed", self.name)));
        }

        let mut content = format!("{}: {}", self.name, request.prompt);
        if let Some(previous) = request.context_str(PREVIOUS_RESULT_KEY) {
            content.push_str(&format!(" (after {})", previous));
        }
        Ok(AgentResult::success("echoed").with_content(content))
    }

    async fn initialize(&self) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
