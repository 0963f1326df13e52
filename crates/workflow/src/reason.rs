//! Reason texts written to history, and recovery of the rejection motive.
//!
//! Rejections carry the motive twice: structured in
//! `HistoryMetadata::Rejection` and embedded in the reason text after a
//! marker. Entries written before the structured field existed only have the
//! text, so the parser falls back to scanning for the marker.

use helpdesk_storage::{HistoryMetadata, HistoryRecord, Priority, TicketStatus};

pub const REJECTION_MARKER: &str = "Reason: ";
const LEGACY_REJECTION_MARKER: &str = "Motif: ";
pub const REASON_UNAVAILABLE: &str = "reason unavailable";

pub fn validated() -> String {
    "User validation: Validated".to_string()
}

pub fn rejected(motive: &str) -> String {
    format!("User validation: Rejected. {}{}", REJECTION_MARKER, motive)
}

pub fn assignment(reason: Option<&str>, notes: Option<&str>) -> Option<String> {
    match (non_empty(reason), non_empty(notes)) {
        (Some(r), Some(n)) => Some(format!("{} | Instructions: {}", r, n)),
        (Some(r), None) => Some(r.to_string()),
        (None, Some(n)) => Some(format!("Instructions: {}", n)),
        (None, None) => None,
    }
}

pub fn reassignment(from: &str, to: &str, reason: Option<&str>) -> String {
    match non_empty(reason) {
        Some(r) => format!("Reassigned from {} to {}. {}", from, to, r),
        None => format!("Reassigned from {} to {}", from, to),
    }
}

pub fn escalation(from: Priority, to: Priority) -> String {
    format!("Ticket escalated: priority raised from {} to {}", from, to)
}

pub fn resolution(summary: Option<&str>) -> String {
    match non_empty(summary) {
        Some(s) => format!("Resolved. Summary: {}", s),
        None => "Resolved".to_string(),
    }
}

pub fn reopened(reason: Option<&str>) -> String {
    format!(
        "Ticket reopened and reassigned. Reason: {}",
        non_empty(reason).unwrap_or("N/A")
    )
}

pub fn declined(reason: Option<&str>) -> String {
    format!(
        "Assignment declined by technician. Reason: {}",
        non_empty(reason).unwrap_or("N/A")
    )
}

pub fn accepted() -> String {
    "Assignment accepted by technician".to_string()
}

pub fn auto_closed(days: i64) -> String {
    format!(
        "Automatically closed after {} days without validation",
        days
    )
}

/// The motive of the most recent rejection in `history`.
///
/// Returns [`REASON_UNAVAILABLE`] when the ticket was never rejected or the
/// motive cannot be recovered.
pub fn rejection_motive(history: &[HistoryRecord]) -> String {
    let Some(entry) = history
        .iter()
        .rev()
        .find(|h| h.new_status == TicketStatus::Rejected)
    else {
        return REASON_UNAVAILABLE.to_string();
    };
    if let Some(HistoryMetadata::Rejection { motive }) = &entry.metadata {
        if !motive.trim().is_empty() {
            return motive.trim().to_string();
        }
    }
    entry
        .reason
        .as_deref()
        .and_then(motive_from_text)
        .unwrap_or_else(|| REASON_UNAVAILABLE.to_string())
}

fn motive_from_text(text: &str) -> Option<String> {
    [REJECTION_MARKER, LEGACY_REJECTION_MARKER]
        .into_iter()
        .find_map(|marker| text.find(marker).map(|at| &text[at + marker.len()..]))
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn entry(
        new_status: TicketStatus,
        reason: Option<&str>,
        metadata: Option<HistoryMetadata>,
    ) -> HistoryRecord {
        HistoryRecord {
            id: "h".into(),
            ticket_id: "t".into(),
            seq: 0,
            old_status: Some(TicketStatus::Resolved),
            new_status,
            user_id: "u".into(),
            reason: reason.map(str::to_string),
            metadata,
            changed_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn assignment_reason_joins_instructions() {
        assert_eq!(
            assignment(Some("urgent"), Some("bring a ladder")).as_deref(),
            Some("urgent | Instructions: bring a ladder")
        );
        assert_eq!(assignment(Some("  "), None), None);
    }

    #[test]
    fn structured_motive_wins() {
        let h = vec![entry(
            TicketStatus::Rejected,
            Some("garbled"),
            Some(HistoryMetadata::Rejection {
                motive: "screen still black".into(),
            }),
        )];
        assert_eq!(rejection_motive(&h), "screen still black");
    }

    #[test]
    fn falls_back_to_reason_text() {
        let h = vec![entry(TicketStatus::Rejected, Some(&rejected("still broken")), None)];
        assert_eq!(rejection_motive(&h), "still broken");
        let legacy = vec![entry(
            TicketStatus::Rejected,
            Some("Validation utilisateur: Rejeté. Motif: toujours en panne"),
            None,
        )];
        assert_eq!(rejection_motive(&legacy), "toujours en panne");
    }

    #[test]
    fn most_recent_rejection() {
        let h = vec![
            entry(TicketStatus::Rejected, Some(&rejected("first")), None),
            entry(TicketStatus::Assigned, Some(&reopened(None)), None),
            entry(TicketStatus::Rejected, Some(&rejected("second")), None),
        ];
        assert_eq!(rejection_motive(&h), "second");
    }

    #[test]
    fn unavailable_sentinel() {
        assert_eq!(rejection_motive(&[]), REASON_UNAVAILABLE);
        let no_marker = vec![entry(TicketStatus::Rejected, Some("rejected"), None)];
        assert_eq!(rejection_motive(&no_marker), REASON_UNAVAILABLE);
        let empty = vec![entry(TicketStatus::Rejected, Some("Reason:   "), None)];
        assert_eq!(rejection_motive(&empty), REASON_UNAVAILABLE);
    }
}
