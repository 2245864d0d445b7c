//! `--replay` output formatting.

use bv_runtime::Runtime;

/// Print a session's stored events in the requested mode. With no
/// stored events, lists the sessions that do have some.
pub fn print_events(runtime: &Runtime, session_id: &str, mode: &str) -> anyhow::Result<()> {
    let records = runtime.replay(session_id)?;
    if records.is_empty() {
        let sessions = runtime.list_sessions()?;
        if sessions.is_empty() {
            println!("no stored sessions");
        } else {
            println!("no events for {session_id}; stored sessions:");
            for session in sessions {
                println!("  {session}");
            }
        }
        return Ok(());
    }

    match mode {
        "json" => {
            for record in &records {
                println!("{}", serde_json::to_string(record)?);
            }
        }
        _ => {
            for record in &records {
                let turn = record
                    .turn
                    .map(|t| format!(" turn={t}"))
                    .unwrap_or_default();
                println!(
                    "{} {}{} {}",
                    record.timestamp,
                    record.event_type,
                    turn,
                    record
                        .payload
                        .as_ref()
                        .map(|p| p.to_string())
                        .unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}
