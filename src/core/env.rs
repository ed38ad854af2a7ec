//! core::env
//!
//! Explicit environment abstraction.
//!
//! # Design
//!
//! The orchestrator never reads `std::env` ad hoc. Every environment
//! input flows through [`Env`], so tests can inject approvals and
//! capability hints without mutating process state.
//!
//! # Recognized inputs
//!
//! - `ORCH_ALLOW_FULL_AUTONOMY` - gates `--mode full`
//! - `ORCH_APPROVED_MEDIUM` / `ORCH_APPROVED_HIGH` - tier approvals
//! - `ORCH_EXECUTOR_PROVIDER` - selects a named executor template
//! - `DOCKER_HOST` - Docker socket override for the capability probe

use std::collections::HashMap;

/// Environment inputs, captured once and passed into each component.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: HashMap<String, String>,
}

impl Env {
    /// Capture the current process environment.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Build from explicit variables (test injection).
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Raw variable lookup.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    fn flag(&self, name: &str) -> bool {
        self.var(name) == Some("1")
    }

    /// Whether `--mode full` is permitted for this process.
    pub fn allow_full_autonomy(&self) -> bool {
        self.flag("ORCH_ALLOW_FULL_AUTONOMY")
    }

    /// Whether medium-tier plans are approved to execute.
    pub fn approved_medium(&self) -> bool {
        self.flag("ORCH_APPROVED_MEDIUM")
    }

    /// Whether high-tier plans are approved to execute.
    pub fn approved_high(&self) -> bool {
        self.flag("ORCH_APPROVED_HIGH")
    }

    /// Named executor provider override, if any.
    pub fn executor_provider(&self) -> Option<&str> {
        self.var("ORCH_EXECUTOR_PROVIDER").filter(|v| !v.is_empty())
    }

    /// `DOCKER_HOST` as configured for this process.
    pub fn docker_host(&self) -> Option<&str> {
        self.var("DOCKER_HOST").filter(|v| !v.is_empty())
    }
}
