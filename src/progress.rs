use crate::normalize::truthy;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Whether a session with no materials counts as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmptySessionPolicy {
    #[default]
    Completed,
    NotStarted,
}

impl EmptySessionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            EmptySessionPolicy::Completed => "completed",
            EmptySessionPolicy::NotStarted => "notStarted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "completed" => Some(EmptySessionPolicy::Completed),
            "notStarted" => Some(EmptySessionPolicy::NotStarted),
            _ => None,
        }
    }
}

/// Also names the bucket a subject lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectStatus {
    #[default]
    Active,
    Completed,
}

impl SubjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectStatus::Active => "active",
            SubjectStatus::Completed => "completed",
        }
    }
}

// Backend payloads are loose: ids may be numbers, titles may be null, and
// the derived fields are recomputed on import, so odd values there decode
// to defaults instead of failing the whole list.

fn wire_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "id must be a string or a number, got {}",
            other
        ))),
    }
}

fn wire_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn wire_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(truthy(&Value::deserialize(d)?))
}

fn wire_progress<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(v.as_f64()
        .filter(|f| f.is_finite())
        .map(|f| f.round().clamp(0.0, 100.0) as u8)
        .unwrap_or(0))
}

fn wire_status<'de, D: Deserializer<'de>>(d: D) -> Result<SubjectStatus, D::Error> {
    Ok(match Value::deserialize(d)?.as_str() {
        Some("completed") => SubjectStatus::Completed,
        _ => SubjectStatus::Active,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    #[serde(deserialize_with = "wire_id")]
    pub id: String,
    #[serde(default, deserialize_with = "wire_text")]
    pub title: String,
    #[serde(default, deserialize_with = "wire_flag")]
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(deserialize_with = "wire_id")]
    pub id: String,
    #[serde(default, deserialize_with = "wire_text")]
    pub title: String,
    #[serde(default)]
    pub materials: Vec<Material>,
    #[serde(default, deserialize_with = "wire_flag")]
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    #[serde(deserialize_with = "wire_id")]
    pub id: String,
    #[serde(default, deserialize_with = "wire_text")]
    pub title: String,
    #[serde(default, deserialize_with = "wire_progress")]
    pub progress: u8,
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default, deserialize_with = "wire_status")]
    pub status: SubjectStatus,
}

/// The two subject buckets. Subjects are shared between successive states;
/// an update rebuilds only the subject it touches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectsState {
    pub active: Vec<Arc<Subject>>,
    pub completed: Vec<Arc<Subject>>,
}

fn all_done(mut flags: impl ExactSizeIterator<Item = bool>, policy: EmptySessionPolicy) -> bool {
    if flags.len() == 0 {
        return policy == EmptySessionPolicy::Completed;
    }
    flags.all(|f| f)
}

fn session_completed(materials: &[Material], policy: EmptySessionPolicy) -> bool {
    all_done(materials.iter().map(|m| m.is_completed), policy)
}

/// `round(100 * completed / total)` with halves rounding up, 0 for no materials.
pub fn progress_percent(subject: &Subject) -> u8 {
    let mut total: u64 = 0;
    let mut done: u64 = 0;
    for m in subject.sessions.iter().flat_map(|s| s.materials.iter()) {
        total += 1;
        if m.is_completed {
            done += 1;
        }
    }
    if total == 0 {
        return 0;
    }
    ((200 * done + total) / (2 * total)) as u8
}

/// Re-derives every session flag, the progress and the status of a subject.
pub fn recompute(subject: &Subject, policy: EmptySessionPolicy) -> Subject {
    let mut next = subject.clone();
    for s in next.sessions.iter_mut() {
        s.is_completed = session_completed(&s.materials, policy);
    }
    next.progress = progress_percent(&next);
    next.status = if all_done(next.sessions.iter().map(|s| s.is_completed), policy) {
        SubjectStatus::Completed
    } else {
        SubjectStatus::Active
    };
    next
}

impl SubjectsState {
    /// Recomputes each subject and files it under its derived status.
    pub fn from_subjects<I>(subjects: I, policy: EmptySessionPolicy) -> Self
    where
        I: IntoIterator<Item = Subject>,
    {
        let mut state = SubjectsState::default();
        for s in subjects {
            let s = recompute(&s, policy);
            state.bucket_mut(s.status).push(Arc::new(s));
        }
        state
    }

    pub fn bucket(&self, bucket: SubjectStatus) -> &Vec<Arc<Subject>> {
        match bucket {
            SubjectStatus::Active => &self.active,
            SubjectStatus::Completed => &self.completed,
        }
    }

    fn bucket_mut(&mut self, bucket: SubjectStatus) -> &mut Vec<Arc<Subject>> {
        match bucket {
            SubjectStatus::Active => &mut self.active,
            SubjectStatus::Completed => &mut self.completed,
        }
    }

    fn locate(&self, subject_id: &str) -> Option<(SubjectStatus, usize)> {
        if let Some(i) = self.active.iter().position(|s| s.id == subject_id) {
            return Some((SubjectStatus::Active, i));
        }
        self.completed
            .iter()
            .position(|s| s.id == subject_id)
            .map(|i| (SubjectStatus::Completed, i))
    }

    pub fn find(&self, subject_id: &str) -> Option<(SubjectStatus, &Arc<Subject>)> {
        let (bucket, idx) = self.locate(subject_id)?;
        Some((bucket, &self.bucket(bucket)[idx]))
    }
}

/// Sets one material's flag and cascades it through the session, the
/// subject's progress and the subject's bucket. Any failed lookup returns
/// the state unchanged. `state` itself is never modified.
pub fn toggle_material(
    state: &SubjectsState,
    subject_id: &str,
    session_id: &str,
    material_id: &str,
    is_completed: bool,
    policy: EmptySessionPolicy,
) -> SubjectsState {
    let Some((bucket, idx)) = state.locate(subject_id) else {
        return state.clone();
    };
    let subject = &state.bucket(bucket)[idx];
    let Some(si) = subject.sessions.iter().position(|s| s.id == session_id) else {
        return state.clone();
    };
    let Some(mi) = subject.sessions[si]
        .materials
        .iter()
        .position(|m| m.id == material_id)
    else {
        return state.clone();
    };

    let mut updated = Subject::clone(subject);
    let session = &mut updated.sessions[si];
    session.materials[mi].is_completed = is_completed;
    session.is_completed = session_completed(&session.materials, policy);
    updated.progress = progress_percent(&updated);
    let subject_done = all_done(updated.sessions.iter().map(|s| s.is_completed), policy);

    let mut next = state.clone();
    match (subject_done, bucket) {
        (true, SubjectStatus::Active) => {
            next.active.remove(idx);
            updated.status = SubjectStatus::Completed;
            next.completed.push(Arc::new(updated));
        }
        (false, SubjectStatus::Completed) => {
            next.completed.remove(idx);
            updated.status = SubjectStatus::Active;
            next.active.push(Arc::new(updated));
        }
        _ => {
            next.bucket_mut(bucket)[idx] = Arc::new(updated);
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(id: &str, done: bool) -> Material {
        Material {
            id: id.to_string(),
            title: format!("Material {}", id),
            is_completed: done,
        }
    }

    fn session(id: &str, materials: Vec<Material>) -> Session {
        Session {
            id: id.to_string(),
            title: String::new(),
            materials,
            is_completed: false,
        }
    }

    fn subject(id: &str, sessions: Vec<Session>) -> Subject {
        Subject {
            id: id.to_string(),
            title: id.to_uppercase(),
            progress: 0,
            sessions,
            status: SubjectStatus::Active,
        }
    }

    fn sample_state() -> SubjectsState {
        SubjectsState::from_subjects(
            vec![
                subject(
                    "math",
                    vec![
                        session("m1", vec![material("a", true), material("b", false)]),
                        session("m2", vec![material("c", false)]),
                    ],
                ),
                subject("art", vec![session("a1", vec![material("x", false)])]),
            ],
            EmptySessionPolicy::Completed,
        )
    }

    fn assert_bucket_invariant(state: &SubjectsState) {
        for s in &state.active {
            assert_eq!(s.status, SubjectStatus::Active, "{}", s.id);
            assert!(!state.completed.iter().any(|c| c.id == s.id));
        }
        for s in &state.completed {
            assert_eq!(s.status, SubjectStatus::Completed, "{}", s.id);
        }
    }

    #[test]
    fn progress_rounds_half_up() {
        let mut s = subject("s", vec![session("x", vec![])]);
        assert_eq!(progress_percent(&s), 0);
        s.sessions[0].materials = (0..8).map(|i| material(&i.to_string(), i == 0)).collect();
        assert_eq!(progress_percent(&s), 13);
        s.sessions[0].materials = vec![material("a", true), material("b", false), material("c", false)];
        assert_eq!(progress_percent(&s), 33);
        s.sessions[0].materials[1].is_completed = true;
        assert_eq!(progress_percent(&s), 67);
    }

    #[test]
    fn completing_last_material_moves_subject_to_completed() {
        let state = sample_state();
        let state = toggle_material(&state, "math", "m1", "b", true, EmptySessionPolicy::Completed);
        let (bucket, math) = state.find("math").expect("math");
        assert_eq!(bucket, SubjectStatus::Active);
        assert_eq!(math.progress, 67);
        assert!(math.sessions[0].is_completed);
        assert!(!math.sessions[1].is_completed);

        let state = toggle_material(&state, "math", "m2", "c", true, EmptySessionPolicy::Completed);
        let (bucket, math) = state.find("math").expect("math");
        assert_eq!(bucket, SubjectStatus::Completed);
        assert_eq!(math.status, SubjectStatus::Completed);
        assert_eq!(math.progress, 100);
        assert_eq!(state.active.len(), 1);
        assert_bucket_invariant(&state);
    }

    #[test]
    fn unchecking_moves_subject_back_to_end_of_active() {
        let state = sample_state();
        let state = toggle_material(&state, "math", "m1", "b", true, EmptySessionPolicy::Completed);
        let state = toggle_material(&state, "math", "m2", "c", true, EmptySessionPolicy::Completed);
        let state = toggle_material(&state, "math", "m1", "a", false, EmptySessionPolicy::Completed);
        assert!(state.completed.is_empty());
        let ids: Vec<&str> = state.active.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["art", "math"]);
        assert_eq!(state.active[1].progress, 67);
        assert_bucket_invariant(&state);
    }

    #[test]
    fn toggle_is_idempotent() {
        let state = sample_state();
        let once = toggle_material(&state, "art", "a1", "x", true, EmptySessionPolicy::Completed);
        let twice = toggle_material(&once, "art", "a1", "x", true, EmptySessionPolicy::Completed);
        assert_eq!(once, twice);
    }

    #[test]
    fn failed_lookups_are_no_ops() {
        let state = sample_state();
        let p = EmptySessionPolicy::Completed;
        assert_eq!(toggle_material(&state, "nope", "m1", "a", false, p), state);
        assert_eq!(toggle_material(&state, "math", "nope", "a", false, p), state);
        assert_eq!(toggle_material(&state, "math", "m1", "nope", false, p), state);
        // material exists, but in another session
        assert_eq!(toggle_material(&state, "math", "m1", "c", true, p), state);
    }

    #[test]
    fn previous_state_is_untouched_and_other_subjects_are_shared() {
        let state = sample_state();
        let before = state.clone();
        let next = toggle_material(&state, "math", "m1", "b", true, EmptySessionPolicy::Completed);
        assert_eq!(state, before);
        assert!(!state.active[0].sessions[0].materials[1].is_completed);
        assert!(Arc::ptr_eq(&state.active[1], &next.active[1]));
        assert!(!Arc::ptr_eq(&state.active[0], &next.active[0]));
    }

    #[test]
    fn empty_session_follows_policy() {
        let raw = subject(
            "s",
            vec![session("empty", vec![]), session("one", vec![material("m", true)])],
        );
        let vacuous = recompute(&raw, EmptySessionPolicy::Completed);
        assert!(vacuous.sessions[0].is_completed);
        assert_eq!(vacuous.status, SubjectStatus::Completed);

        let strict = recompute(&raw, EmptySessionPolicy::NotStarted);
        assert!(!strict.sessions[0].is_completed);
        assert_eq!(strict.status, SubjectStatus::Active);
        assert_eq!(strict.progress, 100);
    }

    #[test]
    fn from_subjects_files_by_derived_status() {
        let mut done = subject("done", vec![session("s", vec![material("m", true)])]);
        done.status = SubjectStatus::Active;
        let state = SubjectsState::from_subjects(vec![done], EmptySessionPolicy::Completed);
        assert!(state.active.is_empty());
        assert_eq!(state.completed.len(), 1);
        assert_bucket_invariant(&state);
    }

    #[test]
    fn policy_parses_wire_names() {
        assert_eq!(
            EmptySessionPolicy::parse("notStarted"),
            Some(EmptySessionPolicy::NotStarted)
        );
        assert_eq!(EmptySessionPolicy::parse("bogus"), None);
        assert_eq!(EmptySessionPolicy::Completed.as_str(), "completed");
    }

    #[test]
    fn loose_backend_payload_decodes_and_rederives() {
        let raw = serde_json::json!([
            {
                "id": 1,
                "title": null,
                "progress": 33.3,
                "status": "in_progress",
                "sessions": [
                    {
                        "id": 10,
                        "isCompleted": "yes",
                        "materials": [
                            { "id": 100, "isCompleted": 1 },
                            { "id": "101", "isCompleted": 0 }
                        ]
                    }
                ]
            },
            { "id": "m", "progress": 512, "status": 7, "sessions": [] }
        ]);
        let subjects: Vec<Subject> = serde_json::from_value(raw).unwrap();
        assert_eq!(subjects[0].id, "1");
        assert_eq!(subjects[0].title, "");
        assert_eq!(subjects[0].progress, 33);
        assert_eq!(subjects[0].status, SubjectStatus::Active);
        assert_eq!(subjects[0].sessions[0].id, "10");
        assert_eq!(subjects[0].sessions[0].materials[0].id, "100");
        assert!(subjects[0].sessions[0].materials[0].is_completed);
        assert!(!subjects[0].sessions[0].materials[1].is_completed);
        assert_eq!(subjects[1].progress, 100);
        assert_eq!(subjects[1].status, SubjectStatus::Active);

        let state = SubjectsState::from_subjects(subjects, EmptySessionPolicy::Completed);
        assert_eq!(state.active.len(), 1);
        assert_eq!(state.active[0].progress, 50);
        assert!(!state.active[0].sessions[0].is_completed);
        assert_eq!(state.completed[0].id, "m");

        let next = toggle_material(&state, "1", "10", "101", true, EmptySessionPolicy::Completed);
        assert!(next.active.is_empty());
        assert_eq!(next.completed[1].id, "1");
        assert_eq!(next.completed[1].progress, 100);
    }

    #[test]
    fn ids_must_still_be_present_and_scalar() {
        assert!(serde_json::from_value::<Material>(serde_json::json!({ "title": "x" })).is_err());
        assert!(serde_json::from_value::<Material>(serde_json::json!({ "id": null })).is_err());
        assert!(serde_json::from_value::<Material>(serde_json::json!({ "id": [1] })).is_err());
    }
}
