use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
    #[default]
    Unrecorded,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
            AttendanceStatus::Unrecorded => "unrecorded",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            "excused" => Some(AttendanceStatus::Excused),
            "unrecorded" => Some(AttendanceStatus::Unrecorded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub student_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_status: Option<AttendanceStatus>,
}

/// studentId -> status for one class session.
pub type AttendanceMap = BTreeMap<String, AttendanceStatus>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttendanceSummary {
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
}

impl AttendanceSummary {
    pub fn recorded(&self) -> usize {
        self.present + self.absent + self.late + self.excused
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedStudent {
    pub student_id: String,
    pub display_name: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub class_id: String,
    pub attendance_records: AttendanceMap,
    pub summary: AttendanceSummary,
    pub students: Vec<SubmittedStudent>,
}

/// Builds a fresh map from the roster. Any previous edits are discarded.
pub fn initialize(roster: &[RosterEntry]) -> AttendanceMap {
    roster
        .iter()
        .map(|s| {
            (
                s.student_id.clone(),
                s.last_known_status.unwrap_or_default(),
            )
        })
        .collect()
}

/// Ids outside the roster are inserted as-is.
pub fn set_status(map: &AttendanceMap, student_id: &str, status: AttendanceStatus) -> AttendanceMap {
    let mut next = map.clone();
    next.insert(student_id.to_string(), status);
    next
}

pub fn mark_all(map: &AttendanceMap, roster: &[RosterEntry], status: AttendanceStatus) -> AttendanceMap {
    let mut next = map.clone();
    for s in roster {
        next.insert(s.student_id.clone(), status);
    }
    next
}

/// Counts are taken over roster members only; a member with no entry counts
/// as unrecorded. `total` is always the roster size.
pub fn summarize(map: &AttendanceMap, roster: &[RosterEntry]) -> AttendanceSummary {
    let mut summary = AttendanceSummary {
        total: roster.len(),
        ..AttendanceSummary::default()
    };
    for s in roster {
        match map.get(&s.student_id).copied().unwrap_or_default() {
            AttendanceStatus::Present => summary.present += 1,
            AttendanceStatus::Absent => summary.absent += 1,
            AttendanceStatus::Late => summary.late += 1,
            AttendanceStatus::Excused => summary.excused += 1,
            AttendanceStatus::Unrecorded => {}
        }
    }
    summary
}

pub fn search(roster: &[RosterEntry], query: &str) -> Vec<RosterEntry> {
    if query.trim().is_empty() {
        return roster.to_vec();
    }
    let needle = query.to_lowercase();
    roster
        .iter()
        .filter(|s| s.display_name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Builds the submission payload and hands it to `on_save` exactly once.
/// Whatever the callback does with it is invisible here.
pub fn submit<F>(
    map: &AttendanceMap,
    roster: &[RosterEntry],
    class_id: &str,
    on_save: F,
) -> SubmissionPayload
where
    F: FnOnce(&SubmissionPayload),
{
    let students = roster
        .iter()
        .map(|s| SubmittedStudent {
            student_id: s.student_id.clone(),
            display_name: s.display_name.clone(),
            status: map.get(&s.student_id).copied().unwrap_or_default(),
        })
        .collect();
    let payload = SubmissionPayload {
        class_id: class_id.to_string(),
        attendance_records: map.clone(),
        summary: summarize(map, roster),
        students,
    };
    on_save(&payload);
    payload
}
