//! Canonical participant map.
//!
//! [`ParticipantStateReconciler`] is the only writer of the map. It is a
//! plain state machine owned by the session actor: vendor events and
//! roster snapshots go in, [`ClassEvent`]s describing each observed change
//! come out. A change produces exactly one event; a no-op produces none.

use crate::events::{AudioEvent, ChangeSource, ClassEvent, ConnectionEvent, ParticipantEvent, VideoEvent};
use crate::normalizer::{normalize, CanonicalRecord};
use crate::provider::{ProviderEventKind, RosterEntry};
use crate::types::{Participant, ParticipantRole};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone)]
struct Tracked {
    participant: Participant,
    /// Insertion order; drives roster order for pagination.
    seq: u64,
}

/// Owner of the canonical participant map for one session.
#[derive(Debug, Default)]
pub struct ParticipantStateReconciler {
    self_id: Option<String>,
    participants: HashMap<String, Tracked>,
    active_speaker: Option<String>,
    next_seq: u64,
}

impl ParticipantStateReconciler {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the local participant. Self is never removed by
    /// reconciliation.
    pub fn set_self(&mut self, participant: Participant) {
        let id = participant.id.clone();
        self.insert(participant);
        self.self_id = Some(id);
    }

    /// Local participant id, once joined.
    #[must_use]
    pub fn self_id(&self) -> Option<&str> {
        self.self_id.as_deref()
    }

    /// Number of participants, self included.
    #[must_use]
    pub fn count(&self) -> usize {
        self.participants.len()
    }

    /// Look up one participant.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id).map(|t| &t.participant)
    }

    /// Snapshot in join order.
    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        self.ordered().into_iter().map(|t| t.participant.clone()).collect()
    }

    /// Remote participant ids in join order (self excluded).
    #[must_use]
    pub fn remote_ids(&self) -> Vec<String> {
        self.ordered()
            .into_iter()
            .filter(|t| Some(t.participant.id.as_str()) != self.self_id.as_deref())
            .map(|t| t.participant.id.clone())
            .collect()
    }

    /// Earliest-joined coach.
    #[must_use]
    pub fn coach_id(&self) -> Option<String> {
        self.ordered()
            .into_iter()
            .find(|t| t.participant.role == ParticipantRole::Coach)
            .map(|t| t.participant.id.clone())
    }

    /// Current active speaker.
    #[must_use]
    pub fn active_speaker(&self) -> Option<&str> {
        self.active_speaker.as_deref()
    }

    /// Apply one vendor event.
    ///
    /// `roster` is an optional live roster used to seed media flags for
    /// joins; it is ignored for other kinds.
    pub fn apply_event(
        &mut self,
        kind: ProviderEventKind,
        payload: &Value,
        roster: Option<&[RosterEntry]>,
    ) -> Vec<ClassEvent> {
        let records = normalize(payload);
        let mut events = Vec::new();

        match kind {
            ProviderEventKind::Joined | ProviderEventKind::Updated => {
                for record in &records {
                    let live = roster.and_then(|r| r.iter().find(|e| e.id == record.participant_id));
                    events.extend(self.upsert(record, live, kind == ProviderEventKind::Joined));
                }
            }
            ProviderEventKind::Left => {
                for record in &records {
                    events.extend(self.remove(&record.participant_id, ChangeSource::Event));
                }
            }
            ProviderEventKind::VideoOn | ProviderEventKind::VideoOff => {
                let on = kind == ProviderEventKind::VideoOn;
                for record in &records {
                    events.extend(self.set_video(&record.participant_id, on));
                }
            }
            ProviderEventKind::AudioOn | ProviderEventKind::AudioOff => {
                let on = kind == ProviderEventKind::AudioOn;
                for record in &records {
                    events.extend(self.set_audio(&record.participant_id, on));
                }
            }
            ProviderEventKind::ActiveSpeaker => {
                let speaker = records
                    .iter()
                    .map(|r| r.participant_id.as_str())
                    .find(|id| self.participants.contains_key(*id));
                if speaker.is_none() && !records.is_empty() {
                    debug!(target: "cc.reconciler", "Active speaker is not in the map, dropping");
                } else {
                    events.extend(self.set_active_speaker(speaker.map(str::to_string)));
                }
            }
            ProviderEventKind::ConnectionChange => {
                for record in &records {
                    if let Some(quality) = record.connection_quality {
                        events.extend(self.set_quality(&record.participant_id, quality));
                    }
                }
            }
        }

        events
    }

    /// Re-derive the map from the provider's live roster.
    ///
    /// Roster ids missing locally are recovered joins, local ids missing
    /// from the roster (self excepted) are recovered leaves, and media
    /// flags of ids in both are corrected to the roster values.
    pub fn reconcile(&mut self, roster: &[RosterEntry]) -> Vec<ClassEvent> {
        let mut events = Vec::new();
        let mut roster_ids = HashSet::with_capacity(roster.len());

        for entry in roster {
            if !roster_ids.insert(entry.id.as_str()) || self.is_self(&entry.id) {
                continue;
            }

            if self.participants.contains_key(&entry.id) {
                events.extend(self.set_video(&entry.id, entry.video_on));
                events.extend(self.set_audio(&entry.id, entry.audio_on));
            } else {
                let participant = participant_from_roster(entry);
                self.insert(participant.clone());
                events.push(ClassEvent::Participant(ParticipantEvent::Joined {
                    participant,
                    source: ChangeSource::Reconciliation,
                }));
            }
        }

        let departed: Vec<String> = self
            .ordered()
            .into_iter()
            .map(|t| t.participant.id.clone())
            .filter(|id| !self.is_self(id) && !roster_ids.contains(id.as_str()))
            .collect();
        for id in departed {
            events.extend(self.remove(&id, ChangeSource::Reconciliation));
        }

        events
    }

    fn upsert(
        &mut self,
        record: &CanonicalRecord,
        live: Option<&RosterEntry>,
        is_join: bool,
    ) -> Option<ClassEvent> {
        let id = &record.participant_id;

        if let Some(tracked) = self.participants.get_mut(id) {
            let before = tracked.participant.clone();
            let p = &mut tracked.participant;
            if let Some(name) = &record.display_name {
                p.display_name.clone_from(name);
            }
            if let Some(role) = record.role {
                p.role = role;
            }
            if let Some(video_on) = live.map(|l| l.video_on).or(record.video_on) {
                p.video_on = video_on;
            }
            if let Some(audio_on) = live.map(|l| l.audio_on).or(record.audio_on) {
                p.audio_on = audio_on;
            }
            if let Some(quality) = record.connection_quality {
                p.connection_quality = quality;
            }
            return (*p != before).then(|| {
                ClassEvent::Participant(ParticipantEvent::Updated {
                    participant: p.clone(),
                })
            });
        }

        let display_name = record
            .display_name
            .clone()
            .or_else(|| live.map(|l| l.display_name.clone()))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| id.clone());
        let role = record.role.unwrap_or(match live {
            Some(l) if l.is_host => ParticipantRole::Coach,
            _ => ParticipantRole::Student,
        });

        let mut participant = Participant::new(id.clone(), display_name, role);
        participant.video_on = live.map(|l| l.video_on).or(record.video_on).unwrap_or(false);
        participant.audio_on = live.map(|l| l.audio_on).or(record.audio_on).unwrap_or(false);
        participant.connection_quality = record.connection_quality.unwrap_or_default();

        if !is_join {
            debug!(
                target: "cc.reconciler",
                participant_id = %id,
                "Update for unknown participant, treating as join"
            );
        }

        self.insert(participant.clone());
        Some(ClassEvent::Participant(ParticipantEvent::Joined {
            participant,
            source: ChangeSource::Event,
        }))
    }

    fn remove(&mut self, id: &str, source: ChangeSource) -> Option<ClassEvent> {
        if self.is_self(id) {
            return None;
        }
        self.participants.remove(id)?;
        if self.active_speaker.as_deref() == Some(id) {
            self.active_speaker = None;
        }
        Some(ClassEvent::Participant(ParticipantEvent::Left {
            participant_id: id.to_string(),
            source,
        }))
    }

    fn set_video(&mut self, id: &str, on: bool) -> Option<ClassEvent> {
        let Some(tracked) = self.participants.get_mut(id) else {
            debug!(target: "cc.reconciler", participant_id = %id, "Video change for unknown participant, dropping");
            return None;
        };
        if tracked.participant.video_on == on {
            return None;
        }
        tracked.participant.video_on = on;
        Some(ClassEvent::Video(VideoEvent::Changed {
            participant_id: id.to_string(),
            video_on: on,
        }))
    }

    fn set_audio(&mut self, id: &str, on: bool) -> Option<ClassEvent> {
        let Some(tracked) = self.participants.get_mut(id) else {
            debug!(target: "cc.reconciler", participant_id = %id, "Audio change for unknown participant, dropping");
            return None;
        };
        if tracked.participant.audio_on == on {
            return None;
        }
        tracked.participant.audio_on = on;
        Some(ClassEvent::Audio(AudioEvent::Changed {
            participant_id: id.to_string(),
            audio_on: on,
        }))
    }

    fn set_quality(
        &mut self,
        id: &str,
        quality: crate::types::ConnectionQuality,
    ) -> Option<ClassEvent> {
        let tracked = self.participants.get_mut(id)?;
        if tracked.participant.connection_quality == quality {
            return None;
        }
        tracked.participant.connection_quality = quality;
        Some(ClassEvent::Connection(ConnectionEvent::QualityChanged {
            participant_id: id.to_string(),
            quality,
        }))
    }

    fn set_active_speaker(&mut self, speaker: Option<String>) -> Option<ClassEvent> {
        if self.active_speaker == speaker {
            return None;
        }
        if let Some(previous) = self.active_speaker.take() {
            if let Some(tracked) = self.participants.get_mut(&previous) {
                tracked.participant.is_active_speaker = false;
            }
        }
        if let Some(current) = &speaker {
            if let Some(tracked) = self.participants.get_mut(current) {
                tracked.participant.is_active_speaker = true;
            }
        }
        self.active_speaker.clone_from(&speaker);
        Some(ClassEvent::Audio(AudioEvent::ActiveSpeakerChanged {
            participant_id: speaker,
        }))
    }

    fn insert(&mut self, participant: Participant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.participants
            .insert(participant.id.clone(), Tracked { participant, seq });
    }

    fn is_self(&self, id: &str) -> bool {
        self.self_id.as_deref() == Some(id)
    }

    fn ordered(&self) -> Vec<&Tracked> {
        let mut tracked: Vec<&Tracked> = self.participants.values().collect();
        tracked.sort_by_key(|t| t.seq);
        tracked
    }
}

fn participant_from_roster(entry: &RosterEntry) -> Participant {
    let name = if entry.display_name.is_empty() {
        entry.id.clone()
    } else {
        entry.display_name.clone()
    };
    let role = if entry.is_host {
        ParticipantRole::Coach
    } else {
        ParticipantRole::Student
    };
    let mut participant = Participant::new(entry.id.clone(), name, role);
    participant.video_on = entry.video_on;
    participant.audio_on = entry.audio_on;
    participant
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::types::ConnectionQuality;
    use serde_json::json;

    fn reconciler_with_self() -> ParticipantStateReconciler {
        let mut reconciler = ParticipantStateReconciler::new();
        reconciler.set_self(Participant::new("me", "Me", ParticipantRole::Student));
        reconciler
    }

    fn roster(ids: &[&str]) -> Vec<RosterEntry> {
        ids.iter().map(|id| RosterEntry::new(*id, format!("User {id}"))).collect()
    }

    fn ids(reconciler: &ParticipantStateReconciler) -> HashSet<String> {
        reconciler.participants().into_iter().map(|p| p.id).collect()
    }

    #[test]
    fn test_joined_event_creates_participant() {
        let mut reconciler = reconciler_with_self();
        let events = reconciler.apply_event(
            ProviderEventKind::Joined,
            &json!({"users": [{"userId": 7, "displayName": "X"}]}),
            None,
        );

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ClassEvent::Participant(ParticipantEvent::Joined { participant, source: ChangeSource::Event })
                if participant.id == "7" && participant.display_name == "X"
        ));
        assert_eq!(reconciler.count(), 2);
    }

    #[test]
    fn test_duplicate_join_emits_nothing() {
        let mut reconciler = reconciler_with_self();
        let payload = json!({"userId": "a", "displayName": "Alice"});
        assert_eq!(reconciler.apply_event(ProviderEventKind::Joined, &payload, None).len(), 1);
        assert!(reconciler.apply_event(ProviderEventKind::Joined, &payload, None).is_empty());
    }

    #[test]
    fn test_join_syncs_media_from_roster() {
        let mut reconciler = reconciler_with_self();
        let mut live = RosterEntry::new("a", "Alice");
        live.video_on = true;
        live.audio_on = true;

        reconciler.apply_event(
            ProviderEventKind::Joined,
            &json!({"userId": "a"}),
            Some(&[live]),
        );

        let alice = reconciler.get("a").unwrap();
        assert!(alice.video_on);
        assert!(alice.audio_on);
        assert_eq!(alice.display_name, "Alice");
    }

    #[test]
    fn test_media_events_only_on_change() {
        let mut reconciler = reconciler_with_self();
        reconciler.apply_event(ProviderEventKind::Joined, &json!({"userId": "a"}), None);

        let events = reconciler.apply_event(ProviderEventKind::VideoOn, &json!("a"), None);
        assert_eq!(
            events,
            vec![ClassEvent::Video(VideoEvent::Changed {
                participant_id: "a".to_string(),
                video_on: true
            })]
        );
        assert!(reconciler.apply_event(ProviderEventKind::VideoOn, &json!("a"), None).is_empty());

        let events = reconciler.apply_event(ProviderEventKind::AudioOn, &json!({"userId": "a"}), None);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_media_event_for_unknown_participant_is_dropped() {
        let mut reconciler = reconciler_with_self();
        assert!(reconciler.apply_event(ProviderEventKind::VideoOn, &json!("ghost"), None).is_empty());
        assert!(reconciler.get("ghost").is_none());
    }

    #[test]
    fn test_left_event_removes_but_never_self() {
        let mut reconciler = reconciler_with_self();
        reconciler.apply_event(ProviderEventKind::Joined, &json!(["a", "b"]), None);

        let events = reconciler.apply_event(ProviderEventKind::Left, &json!({"userId": "a"}), None);
        assert_eq!(events.len(), 1);
        assert!(reconciler.get("a").is_none());

        assert!(reconciler.apply_event(ProviderEventKind::Left, &json!("me"), None).is_empty());
        assert!(reconciler.get("me").is_some());
    }

    #[test]
    fn test_updated_event_changes_name_and_role() {
        let mut reconciler = reconciler_with_self();
        reconciler.apply_event(ProviderEventKind::Joined, &json!({"userId": "c", "name": "c"}), None);

        let events = reconciler.apply_event(
            ProviderEventKind::Updated,
            &json!({"userId": "c", "name": "Coach Carla", "isHost": true}),
            None,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(reconciler.coach_id().as_deref(), Some("c"));
        assert_eq!(reconciler.get("c").unwrap().display_name, "Coach Carla");
    }

    #[test]
    fn test_active_speaker_moves_flag() {
        let mut reconciler = reconciler_with_self();
        reconciler.apply_event(ProviderEventKind::Joined, &json!(["a", "b"]), None);

        reconciler.apply_event(ProviderEventKind::ActiveSpeaker, &json!("a"), None);
        assert!(reconciler.get("a").unwrap().is_active_speaker);

        let events = reconciler.apply_event(ProviderEventKind::ActiveSpeaker, &json!({"userId": "b"}), None);
        assert_eq!(
            events,
            vec![ClassEvent::Audio(AudioEvent::ActiveSpeakerChanged {
                participant_id: Some("b".to_string())
            })]
        );
        assert!(!reconciler.get("a").unwrap().is_active_speaker);
        assert_eq!(reconciler.active_speaker(), Some("b"));

        let events = reconciler.apply_event(ProviderEventKind::ActiveSpeaker, &Value::Null, None);
        assert_eq!(events.len(), 1);
        assert_eq!(reconciler.active_speaker(), None);
    }

    #[test]
    fn test_connection_quality_change() {
        let mut reconciler = reconciler_with_self();
        reconciler.apply_event(ProviderEventKind::Joined, &json!("a"), None);

        let events = reconciler.apply_event(
            ProviderEventKind::ConnectionChange,
            &json!({"userId": "a", "level": "poor"}),
            None,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(reconciler.get("a").unwrap().connection_quality, ConnectionQuality::Poor);
    }

    #[test]
    fn test_reconcile_recovers_missed_joins_and_leaves() {
        let mut reconciler = reconciler_with_self();
        reconciler.apply_event(ProviderEventKind::Joined, &json!(["a", "stale"]), None);

        let events = reconciler.reconcile(&roster(&["a", "b", "c"]));

        let joined: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ClassEvent::Participant(ParticipantEvent::Joined { source: ChangeSource::Reconciliation, .. })))
            .collect();
        let left: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ClassEvent::Participant(ParticipantEvent::Left { source: ChangeSource::Reconciliation, .. })))
            .collect();
        assert_eq!(joined.len(), 2);
        assert_eq!(left.len(), 1);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut reconciler = reconciler_with_self();
        let mut live = roster(&["a", "b"]);
        live[0].video_on = true;

        assert!(!reconciler.reconcile(&live).is_empty());
        assert!(reconciler.reconcile(&live).is_empty());
    }

    #[test]
    fn test_reconcile_keys_equal_roster_plus_self() {
        let mut reconciler = reconciler_with_self();
        reconciler.apply_event(ProviderEventKind::Joined, &json!(["x", "y"]), None);

        reconciler.reconcile(&roster(&["y", "z"]));

        let expected: HashSet<String> = ["y", "z", "me"].iter().map(ToString::to_string).collect();
        assert_eq!(ids(&reconciler), expected);
    }

    #[test]
    fn test_reconcile_corrects_media_flags() {
        let mut reconciler = reconciler_with_self();
        reconciler.apply_event(ProviderEventKind::Joined, &json!({"userId": "a", "videoOn": true}), None);

        let events = reconciler.reconcile(&roster(&["a"]));
        assert_eq!(
            events,
            vec![ClassEvent::Video(VideoEvent::Changed {
                participant_id: "a".to_string(),
                video_on: false
            })]
        );
    }

    #[test]
    fn test_remote_ids_follow_join_order() {
        let mut reconciler = reconciler_with_self();
        reconciler.apply_event(ProviderEventKind::Joined, &json!(["c", "a", "b"]), None);
        assert_eq!(reconciler.remote_ids(), vec!["c", "a", "b"]);
    }
}
