//! Per-connection orchestrator.
//!
//! A [`ChatSession`] owns one conversation: its [`History`], its generation
//! parameters and at most one in-flight generation. Operations arrive one at a
//! time from the connection task; generations run on tokio's blocking pool and
//! stream their events back through the session's bounded channel, so a
//! `StopGeneration` can be handled while steps are still being produced.
//!
//! State machine: `Idle` ⇄ `Generating`. Operations that start a generation are
//! rejected while one is running; `StopGeneration` and `ClearMessages` cancel the
//! running generation and wait for it to settle before returning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use arbor_branches::BranchStore;
use arbor_engine::{History, Item, MessageTurn, ModelHandle, StepResult};
use arbor_generation::{preview_step, GenerationBudget, GenerationStream};
use arbor_sampling::Sampler;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ServerError;
use crate::models::{
    ChangeConfigRequest, ModelInfoPayload, NewMessageRequest, Operation, RefreshWordPayload,
    RefreshWordRequest, SelectWordRequest, ServerEvent,
};
use crate::params::{ChatMode, ConfigValue, GenerationParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Generating,
}

struct ActiveGeneration {
    cancel: CancellationToken,
    /// Set by the task just before it sends `NewMessageEnd`.
    settled: Arc<AtomicBool>,
    /// Resolves to the sampler, whose RNG has advanced through the generation.
    handle: JoinHandle<Sampler>,
}

impl ActiveGeneration {
    /// Once the end event is on its way the generation counts as finished, even
    /// if the blocking task has not returned yet.
    fn is_running(&self) -> bool {
        !self.settled.load(Ordering::Acquire) && !self.handle.is_finished()
    }
}

pub struct ChatSession {
    id: Uuid,
    model: ModelHandle,
    mode: ChatMode,
    params: GenerationParams,
    history: Arc<Mutex<History>>,
    branches: Arc<BranchStore>,
    events: mpsc::Sender<ServerEvent>,
    sampler: Sampler,
    cancel: CancellationToken,
    active: Option<ActiveGeneration>,
}

fn lock(history: &Mutex<History>) -> MutexGuard<'_, History> {
    history.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChatSession {
    /// Create a session. `cancel` is the parent of every generation token; cancelling
    /// it stops whatever is running.
    pub fn new(
        id: Uuid,
        model: ModelHandle,
        mode: ChatMode,
        params: GenerationParams,
        branches: Arc<BranchStore>,
        events: mpsc::Sender<ServerEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let seed = params.seed.unwrap_or_else(|| Uuid::new_v4().as_u64_pair().0);
        Self {
            id,
            model,
            mode,
            params,
            history: Arc::new(Mutex::new(History::new())),
            branches,
            events,
            sampler: Sampler::new().with_seed(seed),
            cancel,
            active: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// A copy of the current history.
    pub fn history(&self) -> History {
        lock(&self.history).clone()
    }

    pub fn state(&self) -> SessionState {
        match &self.active {
            Some(active) if active.is_running() => SessionState::Generating,
            _ => SessionState::Idle,
        }
    }

    /// Send the `ModelInfo` event that opens every session.
    pub async fn announce(&self) {
        let payload = ModelInfoPayload::new(self.model.info(), &self.params);
        self.emit(ServerEvent::ModelInfo(payload)).await;
    }

    /// Parse and handle one text frame. Failures become `Error` events.
    pub async fn handle_text(&mut self, text: &str) {
        match Operation::parse(text) {
            Ok(op) => self.handle(op).await,
            Err(err) => self.report(err).await,
        }
    }

    pub async fn handle(&mut self, op: Operation) {
        tracing::debug!(session_id = %self.id, op = op.name(), "operation received");
        if let Err(err) = self.dispatch(op).await {
            self.report(err).await;
        }
    }

    async fn dispatch(&mut self, op: Operation) -> Result<(), ServerError> {
        match op {
            Operation::NewMessage(req) => self.new_message(req).await,
            Operation::SelectWord(req) => self.select_word(req).await,
            Operation::ChangeConfig(req) => self.change_config(req),
            Operation::RefreshWord(req) => self.refresh_word(req).await,
            Operation::ClearMessages => {
                self.clear_messages().await;
                Ok(())
            }
            Operation::StopGeneration => {
                self.stop_generation().await;
                Ok(())
            }
        }
    }

    async fn new_message(&mut self, req: NewMessageRequest) -> Result<(), ServerError> {
        self.ensure_idle().await?;
        {
            let mut history = lock(&self.history);
            if req.i == -1 {
                history.push_turn(MessageTurn::new(req.source, vec![Item::Literal(req.content)]));
            } else {
                let i = usize::try_from(req.i).map_err(|_| {
                    ServerError::InvalidRequest(format!("i must be -1 or a turn index, got {}", req.i))
                })?;
                history.truncate(i, req.j)?;
                history.append_item(&req.source, Item::Literal(req.content));
            }
        }
        self.start_generation();
        Ok(())
    }

    async fn select_word(&mut self, req: SelectWordRequest) -> Result<(), ServerError> {
        self.ensure_idle().await?;
        {
            let mut history = lock(&self.history);
            history.truncate(req.i, req.j)?;
            let source = history.last().map(|t| t.source.clone()).unwrap_or_default();
            history.append_item(&source, Item::Literal(req.new_word));
        }
        self.start_generation();
        Ok(())
    }

    fn change_config(&mut self, req: ChangeConfigRequest) -> Result<(), ServerError> {
        let value = ConfigValue::parse(&req.config_value)?;
        self.params.apply(&req.config_name, value)?;
        if req.config_name == "seed" {
            if let Some(seed) = self.params.seed {
                self.sampler = std::mem::take(&mut self.sampler).with_seed(seed);
            }
        }
        tracing::debug!(session_id = %self.id, name = %req.config_name, "config changed");
        Ok(())
    }

    async fn refresh_word(&mut self, req: RefreshWordRequest) -> Result<(), ServerError> {
        let truncated = lock(&self.history).truncated(req.i, req.j)?;
        let prompt = self.params.prompt(self.mode, self.model.as_ref(), &truncated);
        let model = Arc::clone(&self.model);
        let mut sampler = self.params.sampler(&self.sampler);

        let (step, sampler) = tokio::task::spawn_blocking(move || {
            let step = preview_step(model.as_ref(), &prompt, &mut sampler);
            (step, sampler)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("preview task failed: {e}")))?;

        // A running generation owns the RNG stream; its sampler wins when it settles.
        if self.active.is_none() {
            self.sampler = sampler;
        }

        let content = step?;
        self.emit(ServerEvent::RefreshWord(RefreshWordPayload {
            i: req.i,
            j: req.j,
            content,
        }))
        .await;
        Ok(())
    }

    /// Cancel any running generation and forget the conversation.
    pub async fn clear_messages(&mut self) {
        self.stop_generation().await;
        lock(&self.history).clear();
        tracing::debug!(session_id = %self.id, "history cleared");
    }

    /// Cancel the running generation and wait until it has settled. No-op when idle.
    pub async fn stop_generation(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            self.settle(active).await;
        }
    }

    /// Wait for the running generation to finish on its own.
    pub async fn wait_idle(&mut self) {
        if let Some(active) = self.active.take() {
            self.settle(active).await;
        }
    }

    /// Stop everything before the session is dropped.
    pub async fn shutdown(mut self) {
        self.stop_generation().await;
        tracing::debug!(session_id = %self.id, "session shut down");
    }

    async fn ensure_idle(&mut self) -> Result<(), ServerError> {
        let busy = self.active.as_ref().is_some_and(ActiveGeneration::is_running);
        if busy {
            return Err(ServerError::GenerationBusy);
        }
        if let Some(finished) = self.active.take() {
            self.settle(finished).await;
        }
        Ok(())
    }

    async fn settle(&mut self, active: ActiveGeneration) {
        match active.handle.await {
            Ok(sampler) => self.sampler = sampler,
            Err(err) => {
                tracing::error!(session_id = %self.id, error = %err, "generation task failed");
                self.emit(ServerEvent::error("generation task failed")).await;
            }
        }
    }

    fn start_generation(&mut self) {
        let cancel = self.cancel.child_token();
        let settled = Arc::new(AtomicBool::new(false));
        let task = GenerationTask {
            session_id: self.id,
            model: Arc::clone(&self.model),
            mode: self.mode,
            ai_role: self.params.ai_role.clone(),
            prompt: self
                .params
                .prompt(self.mode, self.model.as_ref(), &lock(&self.history)),
            budget: self.params.budget(),
            sampler: self.params.sampler(&self.sampler),
            cancel: cancel.clone(),
            settled: Arc::clone(&settled),
            history: Arc::clone(&self.history),
            branches: Arc::clone(&self.branches),
            events: self.events.clone(),
        };
        let handle = tokio::task::spawn_blocking(move || task.run());
        self.active = Some(ActiveGeneration {
            cancel,
            settled,
            handle,
        });
    }

    async fn emit(&self, event: ServerEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!(session_id = %self.id, "event receiver closed");
        }
    }

    async fn report(&self, err: ServerError) {
        if err.is_validation() {
            tracing::warn!(session_id = %self.id, error = %err, "operation rejected");
        } else {
            tracing::error!(session_id = %self.id, error = %err, "operation failed");
        }
        self.emit(ServerEvent::error(err.to_string())).await;
    }
}

/// Everything one generation needs, moved onto a blocking thread.
struct GenerationTask {
    session_id: Uuid,
    model: ModelHandle,
    mode: ChatMode,
    ai_role: String,
    prompt: String,
    budget: GenerationBudget,
    sampler: Sampler,
    cancel: CancellationToken,
    settled: Arc<AtomicBool>,
    history: Arc<Mutex<History>>,
    branches: Arc<BranchStore>,
    events: mpsc::Sender<ServerEvent>,
}

impl GenerationTask {
    fn run(mut self) -> Sampler {
        let started = Instant::now();
        let sampler = std::mem::take(&mut self.sampler);

        let tokens = match self.model.tokenize(&self.prompt) {
            Ok(tokens) => tokens,
            Err(err) => {
                self.send(ServerEvent::error(err.to_string()));
                self.finish(false);
                return sampler;
            }
        };
        tracing::info!(
            session_id = %self.session_id,
            mode = %self.mode,
            prompt_tokens = tokens.len(),
            "generation started"
        );

        let mut stream = GenerationStream::from_tokens(
            Arc::clone(&self.model),
            tokens,
            &self.budget,
            sampler,
            self.cancel.clone(),
        );
        for step in stream.by_ref() {
            match step {
                Ok(step) => {
                    let source = self.record(step.clone());
                    if !self.send(ServerEvent::new_message(source, step)) {
                        self.cancel.cancel();
                    }
                }
                Err(err) => {
                    self.send(ServerEvent::error(err.to_string()));
                }
            }
        }

        tracing::info!(
            session_id = %self.session_id,
            steps = stream.steps(),
            reason = stream.stop_reason().map_or("unknown", |r| r.as_str()),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation finished"
        );
        self.finish(stream.ended_with_end_marker());
        stream.into_sampler()
    }

    /// Append a step to the history and return the turn source it landed in.
    fn record(&self, step: StepResult) -> String {
        let mut history = lock(&self.history);
        let source = match self.mode {
            ChatMode::Chat => self.ai_role.clone(),
            ChatMode::TextGeneration => history
                .last()
                .map(|t| t.source.clone())
                .unwrap_or_else(|| self.ai_role.clone()),
        };
        history.append_item(&source, Item::Generated(step));
        source
    }

    fn finish(&self, ended_with_end_marker: bool) {
        let snapshot = lock(&self.history).clone();
        if let Err(err) = self.branches.insert(&snapshot) {
            tracing::warn!(session_id = %self.session_id, error = %err, "branch snapshot not persisted");
        }
        self.settled.store(true, Ordering::Release);
        self.send(ServerEvent::end(ended_with_end_marker));
    }

    fn send(&self, event: ServerEvent) -> bool {
        self.events.blocking_send(event).is_ok()
    }
}
