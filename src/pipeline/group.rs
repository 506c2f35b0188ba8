//! Parsing and grouping of raw report lines by session, then by call.

use std::collections::HashMap;

use crate::diagnostic::parse::{parse_entry, LineError};
use crate::diagnostic::ParsedEntry;
use crate::store::CallRecord;

/// Outcome counts for every diagnostic line seen in a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStats {
    pub parsed: u64,
    pub too_short: u64,
    pub not_ortp: u64,
    pub empty: u64,
    pub outlier: u64,
}

impl LineStats {
    pub fn reject(&mut self, err: &LineError) {
        match err {
            LineError::TooShort { .. } => self.too_short += 1,
            LineError::NotOrtp => self.not_ortp += 1,
            LineError::Empty => self.empty += 1,
            LineError::OutlierDelay { .. } => self.outlier += 1,
        }
    }

    pub fn rejected(&self) -> u64 {
        self.too_short + self.not_ortp + self.empty + self.outlier
    }

    /// Counts keyed by the label used in metrics.
    pub fn by_result(&self) -> [(&'static str, u64); 5] {
        [
            ("parsed", self.parsed),
            ("too_short", self.too_short),
            ("not_ortp", self.not_ortp),
            ("empty", self.empty),
            ("outlier_delay", self.outlier),
        ]
    }
}

/// All parsed entries of one session, in encounter order.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionGroup {
    pub session_id: String,
    pub entries: Vec<ParsedEntry>,
}

/// Entries of one call within a session, in encounter order.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSeries {
    pub session_id: String,
    pub call_id: String,
    pub entries: Vec<ParsedEntry>,
}

/// Parse every record's lines and gather them by session.
///
/// Groups appear in the order their session was first seen; records without
/// diagnostic lines contribute nothing. Rejected lines are tallied in
/// `stats` and dropped.
pub fn group_by_session(records: &[CallRecord], stats: &mut LineStats) -> Vec<SessionGroup> {
    let mut groups: Vec<SessionGroup> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for record in records {
        if record.diagnostic_lines.is_empty() {
            continue;
        }

        let position = *positions
            .entry(record.session_id.as_str())
            .or_insert_with(|| {
                groups.push(SessionGroup {
                    session_id: record.session_id.clone(),
                    entries: Vec::new(),
                });
                groups.len() - 1
            });

        for line in &record.diagnostic_lines {
            match parse_entry(line, &record.session_id) {
                Ok(entry) => {
                    stats.parsed += 1;
                    groups[position].entries.push(entry);
                }
                Err(err) => stats.reject(&err),
            }
        }
    }

    groups.retain(|g| !g.entries.is_empty());
    groups
}

/// Partition one session's entries by call id, keeping encounter order
/// both across and within calls.
pub fn group_by_call(group: SessionGroup) -> Vec<CallSeries> {
    let mut calls: Vec<CallSeries> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for entry in group.entries {
        let position = match positions.get(&entry.call_id) {
            Some(&position) => position,
            None => {
                positions.insert(entry.call_id.clone(), calls.len());
                calls.push(CallSeries {
                    session_id: group.session_id.clone(),
                    call_id: entry.call_id.clone(),
                    entries: Vec::new(),
                });
                calls.len() - 1
            }
        };
        calls[position].entries.push(entry);
    }

    calls
}
