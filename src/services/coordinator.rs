use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::config::{BusyPolicy, Settings};
use crate::error::ChatError;
use crate::models::{Message, NewMessage};
use crate::providers::{ProviderError, ResponseRequest, ResponseSource, StreamEvent};
use crate::services::conversation::ConversationRegistry;
use crate::services::ledger::MessageLedger;

/// Where the response cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    AwaitingResult,
    Revealing,
    Committed,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub stream_responses: bool,
    pub reveal_delay_min: Duration,
    pub reveal_delay_max: Duration,
    pub busy_policy: BusyPolicy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for CoordinatorSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            stream_responses: settings.stream_responses,
            reveal_delay_min: Duration::from_millis(settings.reveal_delay_min_ms),
            reveal_delay_max: Duration::from_millis(settings.reveal_delay_max_ms),
            busy_policy: settings.busy_policy,
        }
    }
}

impl CoordinatorSettings {
    fn reveal_delay(&self) -> Duration {
        if self.reveal_delay_min >= self.reveal_delay_max {
            return self.reveal_delay_min;
        }
        rand::thread_rng().gen_range(self.reveal_delay_min..=self.reveal_delay_max)
    }
}

/// Latch marking a response cycle as in progress. Released on drop, so every
/// exit path of a cycle (commit, failure, cancellation, panic) frees it.
struct CycleGuard {
    flag: Arc<AtomicBool>,
}

impl CycleGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, ChatError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ChatError::Consistency("response cycle already in progress".to_string()))?;
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
enum CycleOutcome {
    Committed(Message),
    Failed(ChatError),
    Cancelled,
}

/// Everything one response cycle needs, detached from the coordinator loop.
#[derive(Clone)]
struct CycleContext {
    ledger: MessageLedger,
    source: Arc<dyn ResponseSource>,
    settings: CoordinatorSettings,
    phase: Arc<watch::Sender<CyclePhase>>,
}

impl CycleContext {
    fn set_phase(&self, phase: CyclePhase) {
        self.phase.send_replace(phase);
    }

    async fn run(
        self,
        conversation_id: String,
        guard: CycleGuard,
        cancel: CancellationToken,
    ) -> CycleOutcome {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => CycleOutcome::Cancelled,
            result = self.drive(&conversation_id) => match result {
                Ok(message) => CycleOutcome::Committed(message),
                Err(e) => CycleOutcome::Failed(e),
            },
        };

        if let CycleOutcome::Failed(e) = &outcome {
            tracing::warn!(conversation_id = %conversation_id, "Response cycle failed: {}", e);
            self.ledger.set_is_thinking(false);
            self.ledger.set_scratchpad("");
            self.ledger.push_notice(e.to_string());
        }

        self.set_phase(CyclePhase::Idle);
        drop(guard);
        outcome
    }

    async fn drive(&self, conversation_id: &str) -> Result<Message, ChatError> {
        self.set_phase(CyclePhase::AwaitingResult);
        self.ledger.set_is_thinking(true);

        let history = self.ledger.messages_for_conversation(Some(conversation_id));
        let request = ResponseRequest::new(conversation_id, &history);

        let content = if self.settings.stream_responses && self.source.supports_streaming() {
            self.stream_reply(request).await?
        } else {
            let full = self.source.fetch(request).await?;
            self.ledger.set_is_thinking(false);
            self.set_phase(CyclePhase::Revealing);
            self.reveal(&full).await
        };

        if content.trim().is_empty() {
            return Err(ProviderError::InvalidResponse("Empty reply".to_string()).into());
        }

        self.set_phase(CyclePhase::Committed);
        let message = self
            .ledger
            .append_message(NewMessage::assistant(conversation_id, content))?;
        self.ledger.set_scratchpad("");
        Ok(message)
    }

    /// Show a complete reply word by word, as if it were arriving over the wire.
    async fn reveal(&self, text: &str) -> String {
        let mut accumulated = String::with_capacity(text.len());
        for (i, word) in text.split_whitespace().enumerate() {
            if i > 0 {
                accumulated.push(' ');
            }
            accumulated.push_str(word);
            self.ledger.set_scratchpad(&accumulated);
            tokio::time::sleep(self.settings.reveal_delay()).await;
        }
        accumulated
    }

    async fn stream_reply(&self, request: ResponseRequest) -> Result<String, ChatError> {
        let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
        let source = self.source.clone();

        // Aborted if this cycle is dropped mid-stream
        let _producer = AbortOnDropHandle::new(tokio::spawn(async move {
            if let Err(e) = source.stream(request, tx.clone()).await {
                let _ = tx.send(StreamEvent::Error(e.to_string())).await;
            }
        }));

        let mut accumulated = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Token(chunk) => {
                    if accumulated.is_empty() {
                        self.ledger.set_is_thinking(false);
                        self.set_phase(CyclePhase::Revealing);
                    }
                    accumulated.push_str(&chunk);
                    self.ledger.set_scratchpad(&accumulated);
                }
                StreamEvent::Done => break,
                StreamEvent::Error(error) => {
                    return Err(ProviderError::Stream(error).into());
                }
            }
        }

        Ok(accumulated)
    }
}

/// Watches the reply trigger and the current conversation, and turns each
/// trigger into one response cycle.
pub struct ResponseCoordinator {
    registry: ConversationRegistry,
    ledger: MessageLedger,
    source: Arc<dyn ResponseSource>,
    settings: CoordinatorSettings,
    in_progress: Arc<AtomicBool>,
    phase: Arc<watch::Sender<CyclePhase>>,
}

impl ResponseCoordinator {
    pub fn new(
        registry: ConversationRegistry,
        ledger: MessageLedger,
        source: Arc<dyn ResponseSource>,
        settings: CoordinatorSettings,
    ) -> Self {
        let (phase, _) = watch::channel(CyclePhase::Idle);
        Self {
            registry,
            ledger,
            source,
            settings,
            in_progress: Arc::new(AtomicBool::new(false)),
            phase: Arc::new(phase),
        }
    }

    /// Start observing. The coordinator lives until the returned handle is
    /// shut down or dropped.
    pub fn spawn(self) -> CoordinatorHandle {
        let shutdown = CancellationToken::new();
        let phase = self.phase.subscribe();
        let in_progress = self.in_progress.clone();
        let task = tokio::spawn(self.run(shutdown.clone()));

        CoordinatorHandle {
            shutdown,
            task: Some(task),
            phase,
            in_progress,
        }
    }

    async fn run(self, shutdown: CancellationToken) {
        let mut trigger = self.ledger.subscribe_trigger();
        let mut current = self.registry.subscribe_current();
        let mut cycles: JoinSet<CycleOutcome> = JoinSet::new();

        tracing::debug!(source = self.source.name(), "Response coordinator started");

        loop {
            self.evaluate(&mut trigger, &mut current, &mut cycles, &shutdown);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = trigger.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = current.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    self.on_cycle_finished(joined);
                }
            }
        }

        // Cycles hold child tokens, so they are already unwinding
        while let Some(joined) = cycles.join_next().await {
            self.on_cycle_finished(joined);
        }
        self.ledger.reset_response_state();
        self.phase.send_replace(CyclePhase::Idle);
        tracing::debug!("Response coordinator stopped");
    }

    fn evaluate(
        &self,
        trigger: &mut watch::Receiver<bool>,
        current: &mut watch::Receiver<Option<String>>,
        cycles: &mut JoinSet<CycleOutcome>,
        shutdown: &CancellationToken,
    ) {
        let should_respond = *trigger.borrow_and_update();
        let current_id = current.borrow_and_update().clone();

        if !should_respond {
            return;
        }

        if self.in_progress.load(Ordering::Acquire) {
            match self.settings.busy_policy {
                BusyPolicy::Defer => {
                    tracing::debug!("Response in progress, deferring trigger");
                }
                BusyPolicy::Drop => {
                    tracing::debug!("Response in progress, dropping trigger");
                    self.ledger.set_should_respond(false);
                }
            }
            return;
        }

        let Some(conversation_id) = current_id else {
            tracing::debug!("Trigger pending until a conversation is selected");
            return;
        };

        self.ledger.set_should_respond(false);

        let guard = match CycleGuard::acquire(&self.in_progress) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("{}", e);
                debug_assert!(false, "{}", e);
                return;
            }
        };

        tracing::debug!(conversation_id = %conversation_id, "Starting response cycle");
        let context = CycleContext {
            ledger: self.ledger.clone(),
            source: self.source.clone(),
            settings: self.settings.clone(),
            phase: self.phase.clone(),
        };
        cycles.spawn(context.run(conversation_id, guard, shutdown.child_token()));
    }

    fn on_cycle_finished(&self, joined: Result<CycleOutcome, JoinError>) {
        match joined {
            Ok(CycleOutcome::Committed(message)) => {
                tracing::debug!(
                    conversation_id = %message.conversation_id,
                    message_id = %message.id,
                    "Response committed"
                );
            }
            Ok(CycleOutcome::Failed(_)) => {}
            Ok(CycleOutcome::Cancelled) => {
                tracing::debug!("Response cycle cancelled");
            }
            Err(e) => {
                tracing::error!("Response cycle aborted: {}", e);
                self.ledger.reset_response_state();
                self.phase.send_replace(CyclePhase::Idle);
            }
        }
    }
}

/// Owner handle of a running coordinator. Dropping it tears the coordinator
/// down without waiting.
pub struct CoordinatorHandle {
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
    phase: watch::Receiver<CyclePhase>,
    in_progress: Arc<AtomicBool>,
}

impl CoordinatorHandle {
    pub fn phase(&self) -> CyclePhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<CyclePhase> {
        self.phase.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Cancel any in-flight cycle and wait for the coordinator to stop.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Response coordinator task failed: {}", e);
            }
        }
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
