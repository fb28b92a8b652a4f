use std::time::Instant;

use tracing::info;

use crate::llm::Message;
use crate::output::RenderedOutput;
use crate::sandbox::ExitReason;
use crate::utils::{truncate, truncate_middle};

const TRANSCRIPT: &str = "assist::transcript";

#[derive(Clone, Debug)]
pub struct ExecutionRecord {
    pub code: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_reason: ExitReason,
    pub execution_number: usize,
    pub elapsed_ms: u64,
}

/// Per-conversation transcript of queries, model responses and executions.
/// Events go to the `assist::transcript` tracing target, only when enabled.
#[derive(Clone, Debug)]
pub struct Logger {
    enabled: bool,
    conversation_step: usize,
    query_start_time: Option<Instant>,
    executions: Vec<ExecutionRecord>,
    max_output_length: usize,
}

impl Logger {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            conversation_step: 0,
            query_start_time: None,
            executions: Vec::new(),
            max_output_length: 2000,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn log_query_start(&mut self, query: &str) {
        self.conversation_step += 1;
        self.query_start_time = Some(Instant::now());
        if !self.enabled {
            return;
        }
        info!(target: TRANSCRIPT, step = self.conversation_step, query = %truncate(query, 500), "query started");
    }

    pub fn log_context_window(&self, messages: &[Message]) {
        if !self.enabled {
            return;
        }
        for (idx, msg) in messages.iter().enumerate() {
            info!(
                target: TRANSCRIPT,
                position = idx + 1,
                role = %msg.role,
                content = %truncate(&msg.content, 300),
                "context message"
            );
        }
    }

    pub fn log_model_response(&self, response: &str, has_code: bool) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self
            .query_start_time
            .map(|start| u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        info!(
            target: TRANSCRIPT,
            step = self.conversation_step,
            has_code,
            elapsed_ms,
            response = %truncate(response, 500),
            "model responded"
        );
    }

    pub fn log_execution(&mut self, code: &str, rendered: &RenderedOutput) {
        let result = &rendered.result;
        let record = ExecutionRecord {
            code: code.to_owned(),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            exit_reason: result.exit_reason,
            execution_number: self.executions.len() + 1,
            elapsed_ms: result.elapsed_ms,
        };
        if self.enabled {
            self.display(&record);
        }
        self.executions.push(record);
    }

    pub fn executions(&self) -> &[ExecutionRecord] {
        &self.executions
    }

    pub fn clear(&mut self) {
        self.executions.clear();
        self.conversation_step = 0;
        self.query_start_time = None;
    }

    fn display(&self, record: &ExecutionRecord) {
        let output = if !record.stderr.is_empty() {
            truncate_middle(&record.stderr, self.max_output_length)
        } else if !record.stdout.is_empty() {
            truncate_middle(&record.stdout, self.max_output_length)
        } else {
            "No output".to_owned()
        };
        info!(
            target: TRANSCRIPT,
            execution = record.execution_number,
            exit_reason = %record.exit_reason,
            elapsed_ms = record.elapsed_ms,
            code = %truncate_middle(&record.code, self.max_output_length),
            output = %output,
            "code executed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputConfig;
    use crate::output::OutputHandler;
    use crate::sandbox::FakeExecutor;

    #[test]
    fn records_executions_even_when_quiet() {
        let handler = OutputHandler::new(OutputConfig {
            auto_save: false,
            ..OutputConfig::default()
        });
        let rendered = handler.handle(FakeExecutor::completed("5\n"), "print(5)");
        let mut logger = Logger::new(false);
        logger.log_query_start("run it");
        logger.log_execution("print(5)", &rendered);
        logger.log_execution("print(5)", &rendered);
        assert_eq!(logger.executions().len(), 2);
        assert_eq!(logger.executions()[1].execution_number, 2);
        assert_eq!(logger.executions()[0].stdout, "5\n");
        logger.clear();
        assert!(logger.executions().is_empty());
    }
}
