//! Ports the channel bridge consumes.
//!
//! The agent session (LLM loop) and the outbound side of a channel
//! adapter are external collaborators; the scheduler only sees these
//! traits.

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use bv_domain::envelope::TurnKind;
use bv_domain::error::Result;

/// One tool's output produced during an agent turn.
#[derive(Debug, Clone, Serialize)]
pub struct ToolTurnOutput {
    pub tool: String,
    pub content: String,
}

/// Everything an agent turn produced, in generation order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentTurnOutput {
    pub tool_outputs: Vec<ToolTurnOutput>,
    pub assistant_text: String,
}

/// The LLM session behind the orchestrator.
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Run one turn against the session, honouring cancellation.
    async fn run_turn(
        &self,
        session_id: &str,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<AgentTurnOutput>;
}

/// One message sent back through a channel adapter.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundTurn {
    pub channel: String,
    pub conversation_id: String,
    pub kind: TurnKind,
    pub text: String,
    /// Monotonic within the conversation.
    pub sequence: u64,
}

/// The outbound side of a channel adapter.
#[async_trait]
pub trait OutboundPort: Send + Sync {
    async fn send(&self, turn: OutboundTurn) -> Result<()>;
}
