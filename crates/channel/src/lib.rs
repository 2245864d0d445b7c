//! Channel bridge: per-conversation turn scheduling.
//!
//! An external messaging channel (telegram bridge, schedule runner)
//! feeds inbound turns in; the scheduler serializes them per
//! conversation, binds each to the turn WAL, runs the agent session
//! port, and sends outbound turns back in order.

pub mod ports;
pub mod scheduler;

pub use ports::{AgentSession, AgentTurnOutput, OutboundPort, OutboundTurn, ToolTurnOutput};
pub use scheduler::{ChannelScheduler, EnqueueOptions, SchedulerReplayHandler};
