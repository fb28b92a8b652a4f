//! Static analysis and isolated execution of model-generated Python.

pub mod analyzer;
mod capture;
mod engine;
mod fake;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ExecutionConfig;

pub use analyzer::{AnalyzerPolicy, ApprovedRequest, Capability, DenyReason, StaticAnalyzer, Verdict};
pub use engine::ProcessExecutor;
pub use fake::FakeExecutor;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub timeout_seconds: u64,
    pub memory_limit_mb: u64,
}

impl ExecutionRequest {
    pub fn new(source_code: impl Into<String>, timeout_seconds: u64, memory_limit_mb: u64) -> Self {
        Self {
            source_code: source_code.into(),
            timeout_seconds,
            memory_limit_mb,
        }
    }

    pub fn with_limits(source_code: impl Into<String>, config: &ExecutionConfig) -> Self {
        Self::new(source_code, config.timeout_seconds, config.memory_limit_mb)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Completed,
    Timeout,
    MemoryExceeded,
    RuntimeError,
    RejectedByAnalyzer,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Timeout => "timeout",
            Self::MemoryExceeded => "memory_exceeded",
            Self::RuntimeError => "runtime_error",
            Self::RejectedByAnalyzer => "rejected_by_analyzer",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_reason: ExitReason,
    pub exit_code: Option<i32>,
    pub truncated: bool,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_path: Option<PathBuf>,
}

impl ExecutionResult {
    pub fn rejected(reason: &DenyReason) -> Self {
        Self {
            stdout: String::new(),
            stderr: reason.to_string(),
            success: false,
            exit_reason: ExitReason::RejectedByAnalyzer,
            exit_code: None,
            truncated: false,
            elapsed_ms: 0,
            saved_path: None,
        }
    }

    pub(crate) fn failed_to_start(err: impl fmt::Display, started: Instant) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("failed to start interpreter: {err}"),
            success: false,
            exit_reason: ExitReason::RuntimeError,
            exit_code: None,
            truncated: false,
            elapsed_ms: elapsed_ms(started),
            saved_path: None,
        }
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Runs one approved snippet in isolation. Every call is independent: nothing
/// the snippet defines or imports survives into the next call.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: &ApprovedRequest) -> ExecutionResult;
}

/// Analyzer in front of an executor. Denied snippets never reach the executor.
#[derive(Clone)]
pub struct Sandbox {
    analyzer: StaticAnalyzer,
    executor: Arc<dyn Executor>,
}

impl Sandbox {
    pub fn new(analyzer: StaticAnalyzer, executor: Arc<dyn Executor>) -> Self {
        Self { analyzer, executor }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        let policy =
            AnalyzerPolicy::default().with_denied_modules(config.extra_denied_modules.iter().cloned());
        let executor = ProcessExecutor::new(config.clone(), &policy);
        Self::new(StaticAnalyzer::new(policy), Arc::new(executor))
    }

    pub fn analyzer(&self) -> &StaticAnalyzer {
        &self.analyzer
    }

    pub async fn run(&self, request: ExecutionRequest) -> ExecutionResult {
        let approved = match self.analyzer.approve(request) {
            Ok(approved) => approved,
            Err(reason) => {
                warn!(%reason, "snippet rejected before execution");
                return ExecutionResult::rejected(&reason);
            }
        };
        let result = self.executor.execute(&approved).await;
        info!(
            exit_reason = %result.exit_reason,
            exit_code = ?result.exit_code,
            elapsed_ms = result.elapsed_ms,
            truncated = result.truncated,
            "snippet executed"
        );
        result
    }
}
