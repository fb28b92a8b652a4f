use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{ApprovedRequest, ExecutionResult, Executor, ExitReason};

/// In-memory executor for tests. Returns scripted results keyed by source, or a
/// successful empty run, and counts how often it was invoked.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    invocations: AtomicUsize,
    scripted: Mutex<HashMap<String, ExecutionResult>>,
    seen: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, source: impl Into<String>, result: ExecutionResult) {
        self.scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.into(), result);
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Sources in the order they were executed.
    pub fn executed(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn completed(stdout: impl Into<String>) -> ExecutionResult {
        ExecutionResult {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            exit_reason: ExitReason::Completed,
            exit_code: Some(0),
            truncated: false,
            elapsed_ms: 0,
            saved_path: None,
        }
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(&self, request: &ApprovedRequest) -> ExecutionResult {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.source().to_owned());
        self.scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request.source())
            .cloned()
            .unwrap_or_else(|| Self::completed(""))
    }
}
