use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use assist::config::{ContextConfig, ExecutionConfig, RelevanceWeights};
use assist::context::ContextManager;
use assist::llm::{LlmClient, LlmError, Message};
use assist::sandbox::{FakeExecutor, Sandbox};
use assist::{AssistConfig, Assistant, ExecutionRequest, ExitReason, Role};
use async_trait::async_trait;

struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedLlm {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|reply| (*reply).to_owned()).collect()),
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn completion(
        &self,
        _messages: &[Message],
        _temperature: Option<f32>,
    ) -> Result<String, LlmError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(LlmError::InvalidResponse)
    }
}

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

fn config_in(dir: &Path) -> AssistConfig {
    let mut config = AssistConfig::default();
    config.output.save_folder = dir.to_path_buf();
    config
}

const ADD_REPLY: &str = "Here is a function that adds two numbers:\n\n```python\ndef add(a,b): return a+b\nprint(add(2,3))\n```\n";

#[tokio::test]
async fn writes_and_runs_an_add_function() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let assistant = Assistant::with_llm(config_in(dir.path()), ScriptedLlm::new(&[ADD_REPLY]), false);

    let reply = assistant
        .submit_message("Write a function to add two numbers")
        .await
        .unwrap();
    let code = reply.code.expect("reply should carry a code block");
    assert_eq!(code, "def add(a,b): return a+b\nprint(add(2,3))");

    let rendered = assistant.request_execution(&code).await;
    assert_eq!(rendered.result.stdout, "5\n");
    assert!(rendered.result.success);
    assert_eq!(rendered.result.exit_reason, ExitReason::Completed);
    assert!(rendered.result.saved_path.is_some());

    let history = assistant.get_history();
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].role, Role::System);
    assert!(history[2].content.contains("5"));
}

#[tokio::test]
async fn shell_out_is_rejected_before_execution() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(FakeExecutor::new());
    let assistant = Assistant::with_components(
        config_in(dir.path()),
        ScriptedLlm::new(&[]),
        executor.clone(),
        false,
    );

    let rendered = assistant
        .request_execution("import os; os.system('rm -rf /')")
        .await;
    assert!(!rendered.result.success);
    assert_eq!(rendered.result.exit_reason, ExitReason::RejectedByAnalyzer);
    assert!(rendered.result.stdout.is_empty());
    assert_eq!(executor.invocations(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn infinite_loop_times_out() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let sandbox = Sandbox::from_config(&ExecutionConfig::default());
    let started = Instant::now();
    let result = sandbox
        .run(ExecutionRequest::new("while True: pass", 2, 256))
        .await;
    assert_eq!(result.exit_reason, ExitReason::Timeout);
    assert!(!result.success);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn large_allocation_hits_the_memory_limit() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let sandbox = Sandbox::from_config(&ExecutionConfig::default());
    let result = sandbox
        .run(ExecutionRequest::new("data = bytearray(1024 ** 3)\nprint(len(data))", 5, 256))
        .await;
    assert_eq!(result.exit_reason, ExitReason::MemoryExceeded);
    assert!(!result.success);
    assert!(result.stdout.is_empty());
}

#[tokio::test]
async fn repeated_runs_do_not_share_state() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let sandbox = Sandbox::from_config(&ExecutionConfig::default());
    let source = "import math\nmath.tau = 1\ncounter = 0\ncounter += 1\nprint(counter, math.tau)";
    let first = sandbox.run(ExecutionRequest::new(source, 5, 256)).await;
    let second = sandbox.run(ExecutionRequest::new(source, 5, 256)).await;
    assert_eq!(first.exit_reason, ExitReason::Completed);
    assert_eq!(first.stdout, "1 1\n");
    assert_eq!(first.stdout, second.stdout);
    assert_eq!(first.exit_reason, second.exit_reason);
}

#[test]
fn follow_up_sees_the_earlier_turn_verbatim() {
    let context = ContextManager::new(ContextConfig::default(), RelevanceWeights::default());
    let flask = "```python\nfrom flask import Flask\napp = Flask(__name__)\n\n@app.route('/')\ndef index():\n    return 'hi'\n```";
    context.add_turn(Role::User, "create a Flask app");
    context.add_turn(Role::Assistant, flask);

    let window = context.build_context("add authentication to it");
    let contents: Vec<&str> = window.iter().map(|turn| turn.content.as_str()).collect();
    assert_eq!(contents, vec!["create a Flask app", flask]);
}

#[test]
fn history_keeps_only_the_newest_turns() {
    let config = ContextConfig {
        max_turns: 3,
        ..ContextConfig::default()
    };
    let context = ContextManager::new(config, RelevanceWeights::default());
    for n in 1..=4 {
        context.add_turn(Role::User, format!("turn {n}"));
    }
    let history = context.history();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].content, "turn 2");
    assert_eq!(history[2].content, "turn 4");
    assert!(
        context
            .build_context("turn")
            .iter()
            .all(|turn| turn.content != "turn 1")
    );
}
