//! The conversation facade used by both front ends.
//!
//! `submit_message`, `request_execution`, `clear_session` and `get_history`
//! are the whole surface the terminal and web shells need.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::categorize::{CodeCategorizer, CodeCategory};
use crate::config::{AssistConfig, ConfigError};
use crate::context::{
    ContextManager, ConversationTurn, HistoryIoError, Role, ScoredTurn, TopicLabel,
};
use crate::llm::{LlmClient, LlmClientImpl, LlmError};
use crate::logger::Logger;
use crate::output::{OutputHandler, RenderedOutput};
use crate::prompts::build_messages;
use crate::sandbox::{
    AnalyzerPolicy, ExecutionRequest, Executor, ProcessExecutor, Sandbox, StaticAnalyzer,
};
use crate::utils::extract_code;

#[derive(Debug, Error)]
pub enum AssistError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    History(#[from] HistoryIoError),
    #[error("there is no code to execute")]
    NothingToExecute,
}

#[derive(Clone, Debug, Serialize)]
pub struct AssistantReply {
    pub content: String,
    /// Code extracted from the reply, if it contains any.
    pub code: Option<String>,
    pub topic: TopicLabel,
}

pub struct Assistant {
    config: AssistConfig,
    llm: Arc<dyn LlmClient>,
    sandbox: Sandbox,
    output: OutputHandler,
    categorizer: CodeCategorizer,
    context: ContextManager,
    logger: Mutex<Logger>,
    last_code: Mutex<Option<String>>,
}

impl Assistant {
    /// Production wiring: HTTP model client and subprocess executor.
    pub fn new(config: AssistConfig, verbose: bool) -> Result<Self, AssistError> {
        config.validate()?;
        let llm = LlmClientImpl::from_config(&config.api)?;
        let sandbox = Sandbox::from_config(&config.execution);
        Ok(Self::with_sandbox(config, Arc::new(llm), sandbox, verbose))
    }

    /// Same analyzer policy as production, with caller-supplied collaborators.
    pub fn with_components(
        config: AssistConfig,
        llm: Arc<dyn LlmClient>,
        executor: Arc<dyn Executor>,
        verbose: bool,
    ) -> Self {
        let policy = policy_for(&config);
        let sandbox = Sandbox::new(StaticAnalyzer::new(policy), executor);
        Self::with_sandbox(config, llm, sandbox, verbose)
    }

    /// Production executor, caller-supplied model client.
    pub fn with_llm(config: AssistConfig, llm: Arc<dyn LlmClient>, verbose: bool) -> Self {
        let policy = policy_for(&config);
        let executor = ProcessExecutor::new(config.execution.clone(), &policy);
        let sandbox = Sandbox::new(StaticAnalyzer::new(policy), Arc::new(executor));
        Self::with_sandbox(config, llm, sandbox, verbose)
    }

    fn with_sandbox(
        config: AssistConfig,
        llm: Arc<dyn LlmClient>,
        sandbox: Sandbox,
        verbose: bool,
    ) -> Self {
        let context = ContextManager::new(config.context.clone(), config.relevance.clone());
        let output = OutputHandler::new(config.output.clone());
        Self {
            config,
            llm,
            sandbox,
            output,
            categorizer: CodeCategorizer::new(),
            context,
            logger: Mutex::new(Logger::new(verbose)),
            last_code: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AssistConfig {
        &self.config
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    /// Records the user turn, sends the selected window to the model and records
    /// the reply. On a model failure the user turn stays and no reply is added.
    pub async fn submit_message(&self, text: &str) -> Result<AssistantReply, AssistError> {
        self.logger().log_query_start(text);
        let user_turn = self.context.add_turn(Role::User, text);
        let window = self.context.build_context(text);
        let messages = build_messages(&window);
        self.logger().log_context_window(&messages);
        debug!(
            topic = %user_turn.topic,
            window = window.len(),
            "sending conversation window"
        );

        let content = self
            .llm
            .completion(&messages, Some(self.config.api.temperature))
            .await?;

        let code = extract_code(&content);
        self.logger().log_model_response(&content, code.is_some());
        let reply_turn = self.context.add_turn(Role::Assistant, content.clone());
        if let Some(code) = &code {
            *lock(&self.last_code) = Some(code.clone());
        }
        Ok(AssistantReply {
            content,
            code,
            topic: reply_turn.topic,
        })
    }

    /// Analyzes, runs and renders `code`. The rendered outcome is appended as a
    /// `system` turn so the model sees it on the next request.
    pub async fn request_execution(&self, code: &str) -> RenderedOutput {
        let request = ExecutionRequest::with_limits(code, &self.config.execution);
        let result = self.sandbox.run(request).await;
        let rendered = self.output.handle(result, code);
        self.context
            .add_turn(Role::System, format!("Execution result:\n{}", rendered.text));
        self.logger().log_execution(code, &rendered);
        info!(
            exit_reason = %rendered.result.exit_reason,
            saved = rendered.result.saved_path.is_some(),
            "execution request handled"
        );
        rendered
    }

    /// Runs the code extracted from the most recent reply that had any.
    pub async fn run_last_code(&self) -> Result<RenderedOutput, AssistError> {
        let code = lock(&self.last_code)
            .clone()
            .ok_or(AssistError::NothingToExecute)?;
        Ok(self.request_execution(&code).await)
    }

    pub fn last_code(&self) -> Option<String> {
        lock(&self.last_code).clone()
    }

    pub fn clear_session(&self) {
        self.context.clear();
        *lock(&self.last_code) = None;
        self.logger().clear();
        info!("session cleared");
    }

    pub fn get_history(&self) -> Vec<ConversationTurn> {
        self.context.history()
    }

    /// The window `query` would be answered with, without recording anything.
    pub fn preview_context(&self, query: &str) -> Vec<ScoredTurn> {
        self.context.build_context_scored(query)
    }

    pub fn categorize(&self, code: &str, top_n: usize) -> Vec<(CodeCategory, f64)> {
        self.categorizer.suggestions(code, top_n)
    }

    pub fn export_history(&self, path: &Path) -> Result<usize, AssistError> {
        Ok(self.context.export_json(path)?)
    }

    pub fn import_history(&self, path: &Path) -> Result<usize, AssistError> {
        let imported = self.context.import_json(path)?;
        *lock(&self.last_code) = None;
        Ok(imported)
    }

    pub fn execution_count(&self) -> usize {
        self.logger().executions().len()
    }

    fn logger(&self) -> MutexGuard<'_, Logger> {
        lock(&self.logger)
    }
}

fn policy_for(config: &AssistConfig) -> AnalyzerPolicy {
    AnalyzerPolicy::default().with_denied_modules(config.execution.extra_denied_modules.iter().cloned())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use super::*;
    use crate::llm::Message;
    use crate::sandbox::{ExitReason, FakeExecutor};

    #[derive(Default)]
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedLlm {
        fn new(replies: impl IntoIterator<Item = &'static str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_owned())).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn completion(
            &self,
            messages: &[Message],
            _temperature: Option<f32>,
        ) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::InvalidResponse))
        }
    }

    fn config(dir: &Path) -> AssistConfig {
        let mut config = AssistConfig::default();
        config.output.save_folder = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn reply_carries_extracted_code_and_topic() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new([
            "Here you go:\n```python\ndef add(a,b): return a+b\nprint(add(2,3))\n```",
        ]));
        let assistant =
            Assistant::with_components(config(dir.path()), llm, Arc::new(FakeExecutor::new()), false);
        let reply = assistant.submit_message("write a function to add two numbers").await.unwrap();
        assert_eq!(reply.topic, TopicLabel::CodeGeneration);
        assert_eq!(
            reply.code.as_deref(),
            Some("def add(a,b): return a+b\nprint(add(2,3))")
        );
        let history = assistant.get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].topic, TopicLabel::CodeGeneration);
    }

    #[tokio::test]
    async fn execution_outcome_becomes_a_system_turn() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeExecutor::new());
        fake.script("print(add(2,3))", FakeExecutor::completed("5\n"));
        let llm = Arc::new(ScriptedLlm::new([]));
        let assistant = Assistant::with_components(config(dir.path()), llm, fake.clone(), false);

        let rendered = assistant.request_execution("print(add(2,3))").await;
        assert!(rendered.success());
        assert_eq!(rendered.result.stdout, "5\n");
        assert!(rendered.result.saved_path.is_some());

        let history = assistant.get_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].topic, TopicLabel::General);
        assert!(history[0].content.contains("Output:\n5"));
        assert_eq!(assistant.execution_count(), 1);
    }

    #[tokio::test]
    async fn rejected_code_is_reported_not_run() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeExecutor::new());
        let assistant = Assistant::with_components(
            config(dir.path()),
            Arc::new(ScriptedLlm::new([])),
            fake.clone(),
            false,
        );
        let rendered = assistant.request_execution("import os; os.system('rm -rf /')").await;
        assert_eq!(rendered.result.exit_reason, ExitReason::RejectedByAnalyzer);
        assert!(rendered.summary.starts_with("Not executed: import of `os`"));
        assert_eq!(fake.invocations(), 0);
    }

    #[tokio::test]
    async fn model_failure_adds_no_reply() {
        let dir = tempfile::tempdir().unwrap();
        let assistant = Assistant::with_components(
            config(dir.path()),
            Arc::new(ScriptedLlm::new([])),
            Arc::new(FakeExecutor::new()),
            false,
        );
        let err = assistant.submit_message("hello").await.unwrap_err();
        assert!(matches!(err, AssistError::Llm(LlmError::InvalidResponse)));
        let history = assistant.get_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn follow_up_sees_previous_code_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let first = "```python\nfrom flask import Flask\napp = Flask(__name__)\n```";
        let llm = Arc::new(ScriptedLlm::new([first, "```python\n# with auth\n```"]));
        let assistant = Assistant::with_components(
            config(dir.path()),
            llm.clone(),
            Arc::new(FakeExecutor::new()),
            false,
        );
        assistant.submit_message("create a Flask app").await.unwrap();
        assistant.submit_message("add authentication to it").await.unwrap();

        let seen = llm.seen.lock().unwrap();
        let second_call = &seen[1];
        assert_eq!(second_call[0].role, "system");
        assert!(second_call.iter().any(|msg| msg.content == first));
        assert_eq!(second_call.last().unwrap().content, "add authentication to it");
    }

    #[tokio::test]
    async fn clear_resets_history_and_last_code() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new(["```python\nprint(1)\n```"]));
        let assistant =
            Assistant::with_components(config(dir.path()), llm, Arc::new(FakeExecutor::new()), false);
        assistant.submit_message("print one").await.unwrap();
        assert_eq!(assistant.last_code().as_deref(), Some("print(1)"));
        assistant.clear_session();
        assert!(assistant.get_history().is_empty());
        assert!(matches!(
            assistant.run_last_code().await,
            Err(AssistError::NothingToExecute)
        ));
    }
}
