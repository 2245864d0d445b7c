//! Id minting and session-id sanitization.
//!
//! On-disk record ids carry a millisecond prefix for rough ordering and
//! a short random suffix for uniqueness: `evt_<ms>_<rand>`.

use chrono::Utc;

/// Mint an id with the given prefix: `<prefix>_<ms>_<rand8>`.
fn mint(prefix: &str) -> String {
    let ms = Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{ms}_{}", &suffix[..8])
}

/// Id for an event record (`evt_…`).
pub fn event_id() -> String {
    mint("evt")
}

/// Id for an evidence ledger row (`ev_…`).
pub fn evidence_id() -> String {
    mint("ev")
}

/// Id for a turn WAL record (`wal_…`).
pub fn wal_id() -> String {
    mint("wal")
}

/// Id for a turn (`turn_…`).
pub fn turn_id() -> String {
    mint("turn")
}

/// Replace any character outside `[A-Za-z0-9._-]` with `_`.
///
/// Session ids become file names under `.orchestrator/events/`; this
/// keeps them path-safe on every platform.
pub fn sanitize_session_id(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_are_unique() {
        let a = event_id();
        let b = event_id();
        assert!(a.starts_with("evt_"));
        assert_ne!(a, b);
    }

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_session_id("tg/chat:42"), "tg_chat_42");
        assert_eq!(sanitize_session_id("plain-id_1.2"), "plain-id_1.2");
    }
}
