//! Context assembly for agent prompts.
//!
//! The arena buffers injection candidates per session, the zone
//! allocator distributes the token budget across context zones, and
//! the pipeline turns both into a deduplicated, budget-capped text
//! block with a two-phase reserve/commit API.

pub mod arena;
pub mod blocks;
pub mod pipeline;
pub mod tokens;
pub mod zones;

pub use arena::{ArenaEntry, ContextArena, SloEnforcement};
pub use pipeline::{CompactionNote, InjectionPipeline, InjectionPlan, UsageSnapshot};
pub use zones::{allocate, ZoneAllocation};
