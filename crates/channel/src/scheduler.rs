//! Per-conversation turn scheduler.
//!
//! Each `(channel, conversation)` gets one worker task fed by a
//! bounded queue: at most one agent turn is in flight per conversation
//! and turns dispatch in enqueue order, across restarts included
//! (recovery re-enqueues in WAL order). Outbound turns for one inbound
//! turn are sent before anything from its successor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bv_domain::envelope::{TurnEnvelope, TurnKind};
use bv_domain::error::{Error, Result};
use bv_domain::trace::TraceEvent;
use bv_runtime::Runtime;
use bv_store::{
    EventAppend, TurnWal, TurnWalRecord, WalAppendOptions, WalReplayHandler, WalSource,
};

use crate::ports::{AgentSession, OutboundPort, OutboundTurn};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Options for [`ChannelScheduler::enqueue_inbound_turn`].
#[derive(Debug, Default)]
pub struct EnqueueOptions {
    /// Re-use an existing WAL id (recovery path) instead of appending
    /// a fresh pending record.
    pub wal_id: Option<String>,
    /// Block until the turn fully processed.
    pub await_completion: bool,
}

struct QueuedTurn {
    wal_id: String,
    envelope: TurnEnvelope,
    completion: Option<oneshot::Sender<Result<()>>>,
}

struct Conversation {
    session_id: String,
    queue: mpsc::Sender<QueuedTurn>,
    worker: JoinHandle<()>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ChannelScheduler {
    channel: String,
    runtime: Arc<Runtime>,
    wal: Arc<TurnWal>,
    agent: Arc<dyn AgentSession>,
    outbound: Arc<dyn OutboundPort>,
    /// Get-or-spawn under this mutex makes session/worker creation
    /// single-flight per conversation.
    conversations: Mutex<HashMap<String, Conversation>>,
    cancel: CancellationToken,
}

impl ChannelScheduler {
    pub fn new(
        channel: &str,
        runtime: Arc<Runtime>,
        agent: Arc<dyn AgentSession>,
        outbound: Arc<dyn OutboundPort>,
    ) -> Self {
        let orchestrator_dir =
            bv_domain::config::orchestrator_dir(runtime.workspace_root());
        let wal = Arc::new(TurnWal::open(
            &orchestrator_dir,
            channel,
            runtime.config().wal.clone(),
        ));
        Self {
            channel: channel.to_owned(),
            runtime,
            wal,
            agent,
            outbound,
            conversations: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn wal(&self) -> &TurnWal {
        &self.wal
    }

    /// The agent session bound to a conversation.
    pub fn session_id_for(&self, conversation_id: &str) -> String {
        format!("{}:{}", self.channel, conversation_id)
    }

    /// Queue one inbound turn for its conversation.
    ///
    /// Unless the turn is being replayed from the WAL, a pending record
    /// is appended first so a crash at any later point is recoverable.
    pub async fn enqueue_inbound_turn(
        &self,
        mut envelope: TurnEnvelope,
        opts: EnqueueOptions,
    ) -> Result<String> {
        if self.cancel.is_cancelled() {
            return Err(Error::Other("scheduler is shut down".to_owned()));
        }

        let conversation_id = envelope.conversation_id.clone();
        let session_id = self.session_id_for(&conversation_id);
        envelope.session_id = session_id.clone();

        let wal_id = match opts.wal_id {
            Some(wal_id) => wal_id,
            None => {
                self.wal
                    .append_pending(
                        envelope.clone(),
                        WalSource::Channel,
                        WalAppendOptions::default(),
                    )?
                    .wal_id
            }
        };

        TraceEvent::ConversationQueued {
            channel: self.channel.clone(),
            conversation_id: conversation_id.clone(),
            wal_id: wal_id.clone(),
        }
        .emit();

        let (completion_tx, completion_rx) = if opts.await_completion {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let queue = self.conversation_queue(&conversation_id, &session_id);
        queue
            .send(QueuedTurn {
                wal_id: wal_id.clone(),
                envelope,
                completion: completion_tx,
            })
            .await
            .map_err(|_| Error::Other("conversation queue closed".to_owned()))?;

        if let Some(rx) = completion_rx {
            rx.await
                .map_err(|_| Error::Other("turn dropped before completion".to_owned()))??;
        }
        Ok(wal_id)
    }

    fn conversation_queue(
        &self,
        conversation_id: &str,
        session_id: &str,
    ) -> mpsc::Sender<QueuedTurn> {
        let mut conversations = self.conversations.lock();
        if let Some(conversation) = conversations.get(conversation_id) {
            return conversation.queue.clone();
        }

        let capacity = self.runtime.config().channel.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel::<QueuedTurn>(capacity);
        let worker = tokio::spawn(run_conversation(ConversationWorker {
            channel: self.channel.clone(),
            conversation_id: conversation_id.to_owned(),
            session_id: session_id.to_owned(),
            runtime: self.runtime.clone(),
            wal: self.wal.clone(),
            agent: self.agent.clone(),
            outbound: self.outbound.clone(),
            cancel: self.cancel.child_token(),
            queue: rx,
        }));
        conversations.insert(
            conversation_id.to_owned(),
            Conversation {
                session_id: session_id.to_owned(),
                queue: tx.clone(),
                worker,
            },
        );
        tx
    }

    /// Stop intake, drain workers up to the graceful timeout, abort
    /// stragglers, and dispose the bound sessions.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let drained: Vec<(String, Conversation)> = {
            let mut conversations = self.conversations.lock();
            conversations.drain().collect()
        };
        let graceful =
            Duration::from_millis(self.runtime.config().channel.graceful_timeout_ms);

        for (conversation_id, conversation) in drained {
            // Closing the queue lets the worker finish its backlog.
            drop(conversation.queue);
            let session_id = conversation.session_id.clone();
            match tokio::time::timeout(graceful, conversation.worker).await {
                Ok(_) => {
                    self.runtime.dispose_session(&session_id, "shutdown");
                }
                Err(_) => {
                    tracing::warn!(
                        channel = %self.channel,
                        conversation_id = %conversation_id,
                        "graceful timeout; aborting in-flight turn"
                    );
                    let _ = self.runtime.append_event(
                        EventAppend::new(&session_id, "session_interrupted")
                            .with_payload(serde_json::json!({"reason": "shutdown timeout"})),
                    );
                    self.runtime.dispose_session(&session_id, "aborted");
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ConversationWorker {
    channel: String,
    conversation_id: String,
    session_id: String,
    runtime: Arc<Runtime>,
    wal: Arc<TurnWal>,
    agent: Arc<dyn AgentSession>,
    outbound: Arc<dyn OutboundPort>,
    cancel: CancellationToken,
    queue: mpsc::Receiver<QueuedTurn>,
}

async fn run_conversation(mut worker: ConversationWorker) {
    let mut outbound_sequence: u64 = 0;
    while let Some(queued) = worker.queue.recv().await {
        let result = process_turn(&worker, queued.envelope, &queued.wal_id, &mut outbound_sequence)
            .await;
        match &result {
            Ok(outbound_turns) => {
                let _ = worker.wal.mark_done(&queued.wal_id);
                TraceEvent::ConversationDispatched {
                    channel: worker.channel.clone(),
                    conversation_id: worker.conversation_id.clone(),
                    outbound_turns: *outbound_turns,
                }
                .emit();
            }
            Err(e) => {
                let _ = worker.wal.mark_failed(&queued.wal_id, Some(&e.to_string()));
                let _ = worker.runtime.append_event(
                    EventAppend::new(&worker.session_id, "turn_error")
                        .with_payload(serde_json::json!({"error": e.to_string()})),
                );
            }
        }
        if let Some(completion) = queued.completion {
            let _ = completion.send(result.map(|_| ()));
        }
        if worker.cancel.is_cancelled() && worker.queue.is_empty() {
            break;
        }
    }
}

/// Run one inbound turn end-to-end. Returns the number of outbound
/// turns sent.
async fn process_turn(
    worker: &ConversationWorker,
    envelope: TurnEnvelope,
    wal_id: &str,
    outbound_sequence: &mut u64,
) -> Result<usize> {
    worker.wal.mark_inflight(wal_id)?;
    worker.runtime.begin_turn(&worker.session_id);

    let prompt = envelope.prompt_text();
    let output = worker
        .agent
        .run_turn(&worker.session_id, &prompt, worker.cancel.child_token())
        .await;

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            worker.runtime.end_turn(&worker.session_id);
            return Err(e);
        }
    };

    // Tool turns first, then the assistant turn, all in order.
    let mut sent = 0usize;
    for tool in &output.tool_outputs {
        *outbound_sequence += 1;
        worker
            .outbound
            .send(OutboundTurn {
                channel: worker.channel.clone(),
                conversation_id: worker.conversation_id.clone(),
                kind: TurnKind::Tool,
                text: format!("[{}] {}", tool.tool, tool.content),
                sequence: *outbound_sequence,
            })
            .await?;
        sent += 1;
    }
    if !output.assistant_text.is_empty() {
        *outbound_sequence += 1;
        worker
            .outbound
            .send(OutboundTurn {
                channel: worker.channel.clone(),
                conversation_id: worker.conversation_id.clone(),
                kind: TurnKind::Assistant,
                text: output.assistant_text.clone(),
                sequence: *outbound_sequence,
            })
            .await?;
        sent += 1;
    }

    worker.runtime.end_turn(&worker.session_id);
    Ok(sent)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WAL recovery binding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replays recovered channel records back through the scheduler with
/// their original WAL ids.
pub struct SchedulerReplayHandler {
    scheduler: Arc<ChannelScheduler>,
}

impl SchedulerReplayHandler {
    pub fn new(scheduler: Arc<ChannelScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait::async_trait]
impl WalReplayHandler for SchedulerReplayHandler {
    async fn replay(&self, record: TurnWalRecord) -> Result<()> {
        self.scheduler
            .enqueue_inbound_turn(
                record.envelope,
                EnqueueOptions {
                    wal_id: Some(record.wal_id),
                    await_completion: false,
                },
            )
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bv_domain::config::Config;
    use bv_runtime::Runtime;

    /// Agent double: records prompts, tracks concurrent turns, yields
    /// a tool output plus an assistant reply.
    struct FakeAgent {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeAgent {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl AgentSession for FakeAgent {
        async fn run_turn(
            &self,
            _session_id: &str,
            prompt: &str,
            _cancel: CancellationToken,
        ) -> Result<crate::ports::AgentTurnOutput> {
            let live = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(live, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.prompts.lock().push(prompt.to_owned());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(crate::ports::AgentTurnOutput {
                tool_outputs: vec![crate::ports::ToolTurnOutput {
                    tool: "read".into(),
                    content: "file contents".into(),
                }],
                assistant_text: format!("reply to: {prompt}"),
            })
        }
    }

    #[derive(Default)]
    struct CollectingOutbound {
        sent: Mutex<Vec<OutboundTurn>>,
    }

    #[async_trait::async_trait]
    impl OutboundPort for CollectingOutbound {
        async fn send(&self, turn: OutboundTurn) -> Result<()> {
            self.sent.lock().push(turn);
            Ok(())
        }
    }

    fn scheduler(
        dir: &std::path::Path,
    ) -> (Arc<ChannelScheduler>, Arc<FakeAgent>, Arc<CollectingOutbound>) {
        let runtime = Arc::new(Runtime::new(dir, Config::default()).unwrap());
        let agent = Arc::new(FakeAgent::new());
        let outbound = Arc::new(CollectingOutbound::default());
        let scheduler = Arc::new(ChannelScheduler::new(
            "telegram",
            runtime,
            agent.clone(),
            outbound.clone(),
        ));
        (scheduler, agent, outbound)
    }

    fn turn(conversation: &str, text: &str) -> TurnEnvelope {
        TurnEnvelope::user_text("", "telegram", conversation, text)
    }

    #[tokio::test]
    async fn turns_process_in_order_with_monotonic_sequence() {
        let tmp = tempfile::tempdir().unwrap();
        let (scheduler, agent, outbound) = scheduler(tmp.path());

        for i in 0..3 {
            scheduler
                .enqueue_inbound_turn(
                    turn("chat-1", &format!("msg {i}")),
                    EnqueueOptions::default(),
                )
                .await
                .unwrap();
        }
        // Await the last turn to drain the queue.
        scheduler
            .enqueue_inbound_turn(
                turn("chat-1", "msg 3"),
                EnqueueOptions {
                    wal_id: None,
                    await_completion: true,
                },
            )
            .await
            .unwrap();

        let prompts = agent.prompts.lock().clone();
        assert_eq!(prompts, vec!["msg 0", "msg 1", "msg 2", "msg 3"]);
        assert_eq!(agent.max_in_flight.load(Ordering::SeqCst), 1);

        // Tool turn before assistant turn for each inbound, sequence
        // strictly increasing.
        let sent = outbound.sent.lock();
        assert_eq!(sent.len(), 8);
        for pair in sent.chunks(2) {
            assert_eq!(pair[0].kind, TurnKind::Tool);
            assert_eq!(pair[1].kind, TurnKind::Assistant);
        }
        let sequences: Vec<u64> = sent.iter().map(|t| t.sequence).collect();
        assert_eq!(sequences, (1..=8).collect::<Vec<u64>>());

        // All WAL records reached a terminal state.
        assert!(scheduler.wal().list_pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn conversations_do_not_serialize_each_other() {
        let tmp = tempfile::tempdir().unwrap();
        let (scheduler, agent, _) = scheduler(tmp.path());

        let a = scheduler.enqueue_inbound_turn(
            turn("chat-a", "hello a"),
            EnqueueOptions {
                wal_id: None,
                await_completion: true,
            },
        );
        let b = scheduler.enqueue_inbound_turn(
            turn("chat-b", "hello b"),
            EnqueueOptions {
                wal_id: None,
                await_completion: true,
            },
        );
        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap();
        rb.unwrap();

        // Two conversations may overlap (2 observed) but the same
        // conversation never does.
        assert!(agent.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(agent.prompts.lock().len(), 2);
    }

    #[tokio::test]
    async fn recovery_reenqueues_with_same_wal_id() {
        let tmp = tempfile::tempdir().unwrap();
        let (scheduler, _, _) = scheduler(tmp.path());

        // A pending record from a "crashed" run.
        scheduler
            .wal()
            .append_pending(
                turn("chat-1", "recover me"),
                WalSource::Channel,
                WalAppendOptions::default(),
            )
            .unwrap();

        let handler = SchedulerReplayHandler::new(scheduler.clone());
        let recovered = scheduler.wal().list_pending().unwrap().remove(0);
        handler.replay(recovered).await.unwrap();

        // Drain by awaiting a follow-up turn.
        scheduler
            .enqueue_inbound_turn(
                turn("chat-1", "after"),
                EnqueueOptions {
                    wal_id: None,
                    await_completion: true,
                },
            )
            .await
            .unwrap();

        let pending = scheduler.wal().list_pending().unwrap();
        assert!(pending.is_empty(), "recovered record must be terminal");
    }

    #[tokio::test]
    async fn shutdown_drains_and_stops_intake() {
        let tmp = tempfile::tempdir().unwrap();
        let (scheduler, agent, _) = scheduler(tmp.path());

        scheduler
            .enqueue_inbound_turn(
                turn("chat-1", "last message"),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();
        scheduler.shutdown().await;

        assert_eq!(agent.prompts.lock().len(), 1);
        assert!(scheduler
            .enqueue_inbound_turn(turn("chat-1", "too late"), EnqueueOptions::default())
            .await
            .is_err());
    }
}
