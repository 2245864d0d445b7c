//! Task ledger: a tagged event sum and a pure reducer.
//!
//! Task state is never stored directly; it is the fold of every
//! `task_event` record for the session, so replaying the event file
//! reconstructs it exactly.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Payload of a `task_event` event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEvent {
    SpecSet {
        spec: String,
    },
    CheckpointSet {
        checkpoint: String,
    },
    StatusSet {
        status: String,
    },
    ItemAdded {
        id: String,
        title: String,
    },
    ItemUpdated {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    BlockerRecorded {
        id: String,
        summary: String,
    },
    BlockerResolved {
        id: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: String,
    pub title: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBlocker {
    pub id: String,
    pub summary: String,
}

/// The reduced view of a session's task ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskState {
    pub spec: Option<String>,
    pub checkpoint: Option<String>,
    pub status: Option<String>,
    pub items: Vec<TaskItem>,
    pub blockers: Vec<TaskBlocker>,
    /// Unix millis of the last folded event.
    pub updated_at: i64,
}

impl TaskState {
    /// Fold one event into the state.
    pub fn apply(&mut self, event: &TaskEvent, timestamp: i64) {
        match event {
            TaskEvent::SpecSet { spec } => self.spec = Some(spec.clone()),
            TaskEvent::CheckpointSet { checkpoint } => {
                self.checkpoint = Some(checkpoint.clone());
            }
            TaskEvent::StatusSet { status } => self.status = Some(status.clone()),
            TaskEvent::ItemAdded { id, title } => {
                if !self.items.iter().any(|i| &i.id == id) {
                    self.items.push(TaskItem {
                        id: id.clone(),
                        title: title.clone(),
                        status: "open".to_owned(),
                    });
                }
            }
            TaskEvent::ItemUpdated { id, title, status } => {
                if let Some(item) = self.items.iter_mut().find(|i| &i.id == id) {
                    if let Some(title) = title {
                        item.title = title.clone();
                    }
                    if let Some(status) = status {
                        item.status = status.clone();
                    }
                }
            }
            TaskEvent::BlockerRecorded { id, summary } => {
                if let Some(existing) = self.blockers.iter_mut().find(|b| &b.id == id) {
                    existing.summary = summary.clone();
                } else {
                    self.blockers.push(TaskBlocker {
                        id: id.clone(),
                        summary: summary.clone(),
                    });
                }
            }
            TaskEvent::BlockerResolved { id } => {
                self.blockers.retain(|b| &b.id != id);
            }
        }
        self.updated_at = timestamp;
    }

    pub fn has_blocker(&self, id: &str) -> bool {
        self.blockers.iter().any(|b| b.id == id)
    }

    /// Render the task-state context block.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(spec) = &self.spec {
            out.push_str(&format!("goal: {spec}\n"));
        }
        if let Some(status) = &self.status {
            out.push_str(&format!("status: {status}\n"));
        }
        for item in &self.items {
            out.push_str(&format!("- [{}] {}\n", item.status, item.title));
        }
        for blocker in &self.blockers {
            out.push_str(&format!("! blocked: {}\n", blocker.summary));
        }
        out
    }
}

/// Reduce a sequence of `(event, timestamp)` pairs into a state.
pub fn reduce<'a>(events: impl IntoIterator<Item = (&'a TaskEvent, i64)>) -> TaskState {
    let mut state = TaskState::default();
    for (event, timestamp) in events {
        state.apply(event, timestamp);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reducer_folds_in_order() {
        let events = [
            TaskEvent::SpecSet {
                spec: "ship the parser".into(),
            },
            TaskEvent::ItemAdded {
                id: "i1".into(),
                title: "write lexer".into(),
            },
            TaskEvent::ItemUpdated {
                id: "i1".into(),
                title: None,
                status: Some("done".into()),
            },
            TaskEvent::BlockerRecorded {
                id: "verifier:test_or_build".into(),
                summary: "tests failing".into(),
            },
            TaskEvent::BlockerResolved {
                id: "verifier:test_or_build".into(),
            },
        ];
        let state = reduce(events.iter().zip(1..).map(|(e, t)| (e, t as i64)));

        assert_eq!(state.spec.as_deref(), Some("ship the parser"));
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items[0].status, "done");
        assert!(state.blockers.is_empty());
        assert_eq!(state.updated_at, 5);
    }

    #[test]
    fn duplicate_item_ids_are_ignored() {
        let mut state = TaskState::default();
        let add = TaskEvent::ItemAdded {
            id: "i1".into(),
            title: "first".into(),
        };
        state.apply(&add, 1);
        state.apply(&add, 2);
        assert_eq!(state.items.len(), 1);
    }

    #[test]
    fn events_roundtrip_as_tagged_json() {
        let event = TaskEvent::BlockerRecorded {
            id: "b1".into(),
            summary: "missing dependency".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "blocker_recorded");
        let back: TaskEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(back, TaskEvent::BlockerRecorded { .. }));
    }
}
