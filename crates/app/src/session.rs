use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use assist::assistant::{AssistError, Assistant, AssistantReply};
use assist::categorize::CodeCategory;
use assist::context::{ConversationTurn, ScoredTurn};
use assist::output::RenderedOutput;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const CATEGORY_SUGGESTIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    Overloaded,
    Upstream,
    BadRequest,
    Internal,
}

#[derive(Debug, Clone)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn overloaded(message: impl Into<String>) -> Self {
        Self {
            kind: SessionErrorKind::Overloaded,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SessionErrorKind::Internal,
            message: message.into(),
        }
    }
}

impl From<AssistError> for SessionError {
    fn from(err: AssistError) -> Self {
        let kind = match err {
            AssistError::Llm(_) => SessionErrorKind::Upstream,
            AssistError::NothingToExecute => SessionErrorKind::BadRequest,
            AssistError::Config(_) | AssistError::History(_) => SessionErrorKind::Internal,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// One operation on a conversation.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Chat { message: String },
    Execute { code: String },
    History,
    Clear,
    Categorize { code: String },
    Context { query: String },
}

#[derive(Debug)]
pub enum SessionOutcome {
    Reply(AssistantReply),
    Executed(RenderedOutput),
    History(Vec<ConversationTurn>),
    Cleared,
    Categories(Vec<(CodeCategory, f64)>),
    Context(Vec<ScoredTurn>),
}

#[derive(Debug)]
pub struct SessionRequest {
    pub session_id: String,
    pub command: SessionCommand,
    pub respond_to: oneshot::Sender<Result<SessionOutcome, SessionError>>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub ingress_capacity: usize,
}

/// Builds the assistant that backs a new session.
pub type AssistantFactory = Arc<dyn Fn() -> Assistant + Send + Sync>;

#[derive(Clone)]
pub struct SessionManagerHandle {
    sender: Sender<SessionRequest>,
}

impl SessionManagerHandle {
    pub fn try_dispatch(&self, request: SessionRequest) -> Result<(), SessionError> {
        match self.sender.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SessionError::overloaded(
                "request queue is full; retry later",
            )),
            Err(TrySendError::Closed(_)) => {
                Err(SessionError::internal("session manager unavailable"))
            }
        }
    }

    /// Dispatches `command` and waits for the session's answer.
    pub async fn call(
        &self,
        session_id: &str,
        command: SessionCommand,
    ) -> Result<SessionOutcome, SessionError> {
        let (respond_to, response) = oneshot::channel();
        self.try_dispatch(SessionRequest {
            session_id: session_id.to_owned(),
            command,
            respond_to,
        })?;
        response
            .await
            .map_err(|_| SessionError::internal("session response channel closed"))?
    }
}

struct ActorEntry {
    sender: UnboundedSender<ActorRequest>,
    pending: usize,
}

struct ActorRequest {
    command: SessionCommand,
    respond_to: oneshot::Sender<Result<SessionOutcome, SessionError>>,
}

struct ActorFinished {
    session_id: String,
}

/// Starts the manager task. Must be called inside a tokio runtime.
pub fn spawn_session_manager(
    config: SessionConfig,
    factory: AssistantFactory,
) -> SessionManagerHandle {
    let (request_sender, request_receiver) =
        mpsc::channel::<SessionRequest>(config.ingress_capacity.max(1));
    let (finished_sender, finished_receiver) = mpsc::unbounded_channel::<ActorFinished>();

    tokio::spawn(run_session_manager_loop(
        config,
        factory,
        request_receiver,
        finished_receiver,
        finished_sender,
    ));

    SessionManagerHandle {
        sender: request_sender,
    }
}

async fn run_session_manager_loop(
    config: SessionConfig,
    factory: AssistantFactory,
    mut request_receiver: Receiver<SessionRequest>,
    mut finished_receiver: UnboundedReceiver<ActorFinished>,
    finished_sender: UnboundedSender<ActorFinished>,
) {
    let session_capacity = config.max_sessions.max(1);
    let mut actors: HashMap<String, ActorEntry> = HashMap::with_capacity(session_capacity);
    let mut idle_lru: VecDeque<String> = VecDeque::with_capacity(session_capacity);
    let mut idle_index: HashSet<String> = HashSet::with_capacity(session_capacity);

    while let Some(request) = request_receiver.recv().await {
        drain_finished_events(
            &mut finished_receiver,
            &mut actors,
            &mut idle_lru,
            &mut idle_index,
            4096,
        );
        let SessionRequest {
            session_id,
            command,
            respond_to,
        } = request;

        if !actors.contains_key(&session_id) {
            if !evict_until_capacity(&mut actors, &mut idle_lru, &mut idle_index, session_capacity)
            {
                warn!(session_id = %session_id, "session limit reached with no idle session");
                let _ = respond_to.send(Err(SessionError::overloaded(
                    "max sessions reached; no idle session available",
                )));
                continue;
            }
            let sender = spawn_session_actor(
                session_id.clone(),
                factory(),
                finished_sender.clone(),
            );
            info!(session_id = %session_id, active = actors.len() + 1, "session started");
            actors.insert(
                session_id.clone(),
                ActorEntry { sender, pending: 0 },
            );
        }

        let Some(entry) = actors.get_mut(&session_id) else {
            let _ = respond_to.send(Err(SessionError::internal("session actor missing")));
            continue;
        };
        idle_index.remove(&session_id);
        entry.pending += 1;

        if let Err(err) = entry.sender.send(ActorRequest {
            command,
            respond_to,
        }) {
            let _ = err
                .0
                .respond_to
                .send(Err(SessionError::internal("failed to dispatch to actor")));
            actors.remove(&session_id);
            idle_index.remove(&session_id);
        }
        drain_finished_events(
            &mut finished_receiver,
            &mut actors,
            &mut idle_lru,
            &mut idle_index,
            512,
        );
    }

    actors.clear();
}

fn evict_until_capacity(
    actors: &mut HashMap<String, ActorEntry>,
    idle_lru: &mut VecDeque<String>,
    idle_index: &mut HashSet<String>,
    max_sessions: usize,
) -> bool {
    while actors.len() >= max_sessions {
        if !evict_oldest_idle_actor(actors, idle_lru, idle_index) {
            return false;
        }
    }
    true
}

fn drain_finished_events(
    finished_receiver: &mut UnboundedReceiver<ActorFinished>,
    actors: &mut HashMap<String, ActorEntry>,
    idle_lru: &mut VecDeque<String>,
    idle_index: &mut HashSet<String>,
    max_batch: usize,
) {
    let mut drained = 0usize;
    while drained < max_batch {
        let Ok(finished) = finished_receiver.try_recv() else {
            break;
        };
        drained += 1;
        let Some(entry) = actors.get_mut(&finished.session_id) else {
            continue;
        };
        entry.pending = entry.pending.saturating_sub(1);
        if entry.pending == 0 && idle_index.insert(finished.session_id.clone()) {
            idle_lru.push_back(finished.session_id);
        }
    }
}

fn evict_oldest_idle_actor(
    actors: &mut HashMap<String, ActorEntry>,
    idle_lru: &mut VecDeque<String>,
    idle_index: &mut HashSet<String>,
) -> bool {
    while let Some(session_id) = idle_lru.pop_front() {
        if !idle_index.remove(&session_id) {
            continue;
        }
        let is_idle = actors
            .get(&session_id)
            .is_some_and(|entry| entry.pending == 0);
        if !is_idle {
            continue;
        }
        actors.remove(&session_id);
        info!(session_id = %session_id, "evicted idle session");
        return true;
    }
    false
}

fn spawn_session_actor(
    session_id: String,
    assistant: Assistant,
    finished_sender: UnboundedSender<ActorFinished>,
) -> UnboundedSender<ActorRequest> {
    let (sender, receiver) = mpsc::unbounded_channel::<ActorRequest>();
    tokio::spawn(run_session_actor_loop(
        session_id,
        assistant,
        receiver,
        finished_sender,
    ));
    sender
}

/// Owns one conversation; requests are handled strictly one at a time.
async fn run_session_actor_loop(
    session_id: String,
    assistant: Assistant,
    mut receiver: UnboundedReceiver<ActorRequest>,
    finished_sender: UnboundedSender<ActorFinished>,
) {
    while let Some(request) = receiver.recv().await {
        let outcome = run_command(&assistant, request.command).await;
        if let Err(err) = &outcome {
            debug!(session_id = %session_id, kind = ?err.kind, error = %err.message, "session command failed");
        }
        // Reported before replying, so a caller holding the reply sees the actor idle.
        let _ = finished_sender.send(ActorFinished {
            session_id: session_id.clone(),
        });
        let _ = request.respond_to.send(outcome);
    }
    debug!(session_id = %session_id, "session actor stopped");
}

async fn run_command(
    assistant: &Assistant,
    command: SessionCommand,
) -> Result<SessionOutcome, SessionError> {
    match command {
        SessionCommand::Chat { message } => {
            let reply = assistant.submit_message(&message).await?;
            Ok(SessionOutcome::Reply(reply))
        }
        SessionCommand::Execute { code } => {
            Ok(SessionOutcome::Executed(assistant.request_execution(&code).await))
        }
        SessionCommand::History => Ok(SessionOutcome::History(assistant.get_history())),
        SessionCommand::Clear => {
            assistant.clear_session();
            Ok(SessionOutcome::Cleared)
        }
        SessionCommand::Categorize { code } => Ok(SessionOutcome::Categories(
            assistant.categorize(&code, CATEGORY_SUGGESTIONS),
        )),
        SessionCommand::Context { query } => {
            Ok(SessionOutcome::Context(assistant.preview_context(&query)))
        }
    }
}
