//! State machine for MoodCue
//!
//! This module implements the core state machine using a single-writer pattern.
//! All state transitions go through the `reduce()` function, which returns
//! a new model and a list of effects to execute.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// How long a prediction result stays on screen before the display resets.
pub const DISPLAY_DURATION: Duration = Duration::from_secs(5);

/// Lifetime of one cursor-following emoji marker.
pub const MARKER_LIFETIME: Duration = Duration::from_secs(2);

/// Recordings are force-stopped after this many seconds.
pub const MAX_RECORDING_SECS: u64 = 120;

/// Where an audio payload came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    Uploaded { file_name: String },
    Recorded,
}

impl AudioSource {
    pub fn file_name(&self) -> &str {
        match self {
            AudioSource::Uploaded { file_name } => file_name,
            AudioSource::Recorded => "recording.wav",
        }
    }
}

/// One finalized clip ready for submission.
/// The bytes are shared and never mutated after finalization.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub bytes: Arc<[u8]>,
    pub source: AudioSource,
}

impl AudioPayload {
    pub fn new(bytes: Vec<u8>, source: AudioSource) -> Self {
        Self {
            bytes: bytes.into(),
            source,
        }
    }
}

/// A short-lived emoji marker following the cursor. Cosmetic only.
#[derive(Debug, Clone)]
pub struct CursorMarker {
    pub id: Uuid,
    pub emoji: &'static str,
    pub x: f64,
    pub y: f64,
}

/// Recording/submission phase. This is the authoritative workflow state -
/// all transitions go through the reducer.
#[derive(Debug, Clone, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// Microphone access requested, stream not yet running.
    Arming {
        request_id: Uuid,
    },
    Recording {
        request_id: Uuid,
        elapsed_secs: u64,
    },
    /// Stream finalization in progress.
    Stopping {
        request_id: Uuid,
    },
    /// Payload sent to the prediction endpoint, response pending.
    Submitting {
        request_id: Uuid,
        source: AudioSource,
    },
    /// Result on screen, auto-reset pending.
    Displayed {
        request_id: Uuid,
        emotion: String,
    },
}

/// Authoritative application state. The reducer produces a new snapshot for
/// every event; the UI layer only ever sees serialized snapshots.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub phase: Phase,
    /// Most recent finalized clip, kept for playback until the next reset.
    pub payload: Option<AudioPayload>,
    /// Currently visible cursor emojis, in spawn order.
    pub markers: Vec<CursorMarker>,
}

/// Events that can trigger state transitions.
/// These are sent from the UI commands, the capture service, the prediction
/// service, and timer tasks.
#[derive(Debug, Clone)]
pub enum Event {
    /// User pressed the record button.
    StartRecording,
    /// User pressed the stop button.
    StopRecording,
    /// User picked a local audio file; bytes already read by the frontend.
    UploadAudio {
        bytes: Vec<u8>,
        file_name: String,
    },
    /// Pointer moved over the window; emoji already chosen by the caller so
    /// the reducer stays deterministic for a given event stream.
    PointerMoved {
        x: f64,
        y: f64,
        emoji: &'static str,
    },
    /// Application exit requested.
    Exit,

    // Capture events
    CaptureStartOk {
        id: Uuid,
    },
    CaptureStartFail {
        id: Uuid,
        err: String,
    },
    /// Stream finalized; bytes are the complete WAV clip.
    CaptureStopOk {
        id: Uuid,
        bytes: Vec<u8>,
    },
    CaptureStopFail {
        id: Uuid,
        err: String,
    },
    /// One-second tick while recording (includes id to prevent stale ticks).
    RecordingTick {
        id: Uuid,
    },

    // Prediction events
    PredictOk {
        id: Uuid,
        emotion: String,
    },
    PredictFail {
        id: Uuid,
        err: String,
    },

    /// Display auto-reset timeout (includes id to prevent stale timeouts).
    DisplayTimeout {
        id: Uuid,
    },
    /// A cursor marker reached the end of its lifetime.
    MarkerTimeout {
        marker_id: Uuid,
    },
}

/// Effects to be executed after a state transition.
/// The effect runner handles these asynchronously.
#[derive(Debug, Clone)]
pub enum Effect {
    StartCapture {
        id: Uuid,
    },
    StopCapture {
        id: Uuid,
    },
    Submit {
        id: Uuid,
        payload: AudioPayload,
    },
    /// Start sending RecordingTick events every second while recording.
    StartRecordingTick {
        id: Uuid,
    },
    StartDisplayTimeout {
        id: Uuid,
        duration: Duration,
    },
    StartMarkerTimeout {
        marker_id: Uuid,
        duration: Duration,
    },
    /// Signal a user-visible alert in the frontend.
    ShowAlert {
        message: String,
    },
    /// Signal the frontend to rebuild (or revoke) its playback URL.
    EmitAudioPreview,
    /// Signal the frontend to re-render the cursor marker layer.
    EmitMarkers,
    /// Signal a full UI state snapshot to the frontend.
    EmitUi,
}

/// Reducer function: (model, event) -> (next_model, effects)
///
/// Key rules:
/// - Never mutate state in place; always return a new snapshot
/// - Ignore events with stale request IDs
/// - Always emit EmitUi after phase changes
pub fn reduce(model: &Model, event: Event) -> (Model, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use Phase::*;

    // Current request_id (if any)
    let current_id: Option<Uuid> = match &model.phase {
        Idle => None,
        Arming { request_id } => Some(*request_id),
        Recording { request_id, .. } => Some(*request_id),
        Stopping { request_id } => Some(*request_id),
        Submitting { request_id, .. } => Some(*request_id),
        Displayed { request_id, .. } => Some(*request_id),
    };

    // An event's ID is stale when it doesn't match the current workflow.
    let is_stale = |eid: Uuid| Some(eid) != current_id;

    let mut next = model.clone();

    match (&model.phase, event) {
        // -----------------
        // Cursor markers (independent of the session phase)
        // -----------------
        (_, PointerMoved { x, y, emoji }) => {
            let marker_id = Uuid::new_v4();
            next.markers.push(CursorMarker {
                id: marker_id,
                emoji,
                x,
                y,
            });
            (
                next,
                vec![
                    StartMarkerTimeout {
                        marker_id,
                        duration: MARKER_LIFETIME,
                    },
                    EmitMarkers,
                ],
            )
        }
        (_, MarkerTimeout { marker_id }) => {
            let before = next.markers.len();
            next.markers.retain(|m| m.id != marker_id);
            if next.markers.len() != before {
                (next, vec![EmitMarkers])
            } else {
                (next, vec![])
            }
        }

        // -----------------
        // Idle / Displayed: new work may start
        // -----------------
        (Idle | Displayed { .. }, StartRecording) => {
            // Any pending display timeout becomes stale with the new id.
            let id = Uuid::new_v4();
            next.phase = Arming { request_id: id };
            next.payload = None;
            (next, vec![StartCapture { id }, EmitAudioPreview, EmitUi])
        }
        (Idle | Displayed { .. }, UploadAudio { bytes, file_name }) => {
            let id = Uuid::new_v4();
            let source = AudioSource::Uploaded { file_name };
            let payload = AudioPayload::new(bytes, source.clone());
            next.phase = Submitting {
                request_id: id,
                source,
            };
            next.payload = Some(payload.clone());
            (next, vec![EmitAudioPreview, Submit { id, payload }, EmitUi])
        }

        // -----------------
        // Arming
        // -----------------
        (Arming { request_id }, CaptureStartOk { id }) if *request_id == id => {
            next.phase = Recording {
                request_id: id,
                elapsed_secs: 0,
            };
            (next, vec![StartRecordingTick { id }, EmitUi])
        }
        (Arming { request_id }, CaptureStartFail { id, err }) if *request_id == id => {
            next.phase = Idle;
            (
                next,
                vec![
                    ShowAlert {
                        message: format!("Microphone access failed: {}", err),
                    },
                    EmitUi,
                ],
            )
        }

        // -----------------
        // Recording
        // -----------------
        (Recording { request_id, .. }, StopRecording) => {
            let id = *request_id;
            next.phase = Stopping { request_id: id };
            (next, vec![StopCapture { id }, EmitUi])
        }
        (
            Recording {
                request_id,
                elapsed_secs,
            },
            RecordingTick { id },
        ) if *request_id == id => {
            let elapsed = elapsed_secs + 1;

            // Force-stop to prevent runaway recordings.
            if elapsed >= MAX_RECORDING_SECS {
                log::warn!(
                    "Recording {} auto-stopped after {}s (max duration reached)",
                    id,
                    elapsed
                );
                next.phase = Stopping { request_id: id };
                (next, vec![StopCapture { id }, EmitUi])
            } else {
                next.phase = Recording {
                    request_id: id,
                    elapsed_secs: elapsed,
                };
                (next, vec![EmitUi])
            }
        }

        // -----------------
        // Stopping
        // -----------------
        (Stopping { request_id }, CaptureStopOk { id, bytes }) if *request_id == id => {
            // Zero recorded chunks still produce a valid (empty) clip; the
            // endpoint decides what to do with it.
            let payload = AudioPayload::new(bytes, AudioSource::Recorded);
            next.phase = Submitting {
                request_id: id,
                source: AudioSource::Recorded,
            };
            next.payload = Some(payload.clone());
            (next, vec![EmitAudioPreview, Submit { id, payload }, EmitUi])
        }
        (Stopping { request_id }, CaptureStopFail { id, err }) if *request_id == id => {
            next.phase = Idle;
            (
                next,
                vec![
                    ShowAlert {
                        message: format!("Recording failed: {}", err),
                    },
                    EmitUi,
                ],
            )
        }

        // -----------------
        // Submitting
        // -----------------
        (Submitting { request_id, .. }, PredictOk { id, emotion }) if *request_id == id => {
            next.phase = Displayed {
                request_id: id,
                emotion,
            };
            (
                next,
                vec![
                    StartDisplayTimeout {
                        id,
                        duration: DISPLAY_DURATION,
                    },
                    EmitUi,
                ],
            )
        }
        (Submitting { request_id, .. }, PredictFail { id, err }) if *request_id == id => {
            next.phase = Idle;
            (
                next,
                vec![
                    ShowAlert {
                        message: format!("There was an error processing your request: {}", err),
                    },
                    EmitUi,
                ],
            )
        }

        // -----------------
        // Displayed
        // -----------------
        (Displayed { request_id, .. }, DisplayTimeout { id }) if *request_id == id => {
            next.phase = Idle;
            next.payload = None;
            (next, vec![EmitAudioPreview, EmitUi])
        }

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, CaptureStartOk { id, .. }) if is_stale(id) => (next, vec![]),
        (_, CaptureStartFail { id, .. }) if is_stale(id) => (next, vec![]),
        (_, CaptureStopOk { id, .. }) if is_stale(id) => (next, vec![]),
        (_, CaptureStopFail { id, .. }) if is_stale(id) => (next, vec![]),
        (_, RecordingTick { id }) if is_stale(id) => (next, vec![]),
        (_, PredictOk { id, .. }) if is_stale(id) => (next, vec![]),
        (_, PredictFail { id, .. }) if is_stale(id) => (next, vec![]),
        (_, DisplayTimeout { id }) if is_stale(id) => (next, vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (next, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_phase(phase: Phase) -> Model {
        Model {
            phase,
            payload: None,
            markers: Vec::new(),
        }
    }

    fn request_id(model: &Model) -> Uuid {
        match &model.phase {
            Phase::Arming { request_id }
            | Phase::Recording { request_id, .. }
            | Phase::Stopping { request_id }
            | Phase::Submitting { request_id, .. }
            | Phase::Displayed { request_id, .. } => *request_id,
            Phase::Idle => panic!("no request id in Idle"),
        }
    }

    #[test]
    fn idle_start_transitions_to_arming() {
        let (next, effects) = reduce(&Model::default(), Event::StartRecording);
        assert!(matches!(next.phase, Phase::Arming { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartCapture { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitUi)));
    }

    #[test]
    fn arming_capture_ok_transitions_to_recording() {
        let id = Uuid::new_v4();
        let model = model_with_phase(Phase::Arming { request_id: id });
        let (next, effects) = reduce(&model, Event::CaptureStartOk { id });
        assert!(
            matches!(next.phase, Phase::Recording { elapsed_secs: 0, .. }),
            "expected Recording with zero elapsed, got {:?}",
            next.phase
        );
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartRecordingTick { .. })));
    }

    #[test]
    fn capture_start_fail_alerts_and_returns_to_idle() {
        let id = Uuid::new_v4();
        let model = model_with_phase(Phase::Arming { request_id: id });
        let (next, effects) = reduce(
            &model,
            Event::CaptureStartFail {
                id,
                err: "permission denied".to_string(),
            },
        );
        assert!(matches!(next.phase, Phase::Idle));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ShowAlert { message } if message.contains("Microphone"))));
    }

    #[test]
    fn stale_capture_event_is_ignored() {
        let id = Uuid::new_v4();
        let stale_id = Uuid::new_v4();
        let model = model_with_phase(Phase::Arming { request_id: id });
        let (next, effects) = reduce(&model, Event::CaptureStartOk { id: stale_id });
        assert!(matches!(next.phase, Phase::Arming { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn start_is_ignored_while_recording() {
        let id = Uuid::new_v4();
        let model = model_with_phase(Phase::Recording {
            request_id: id,
            elapsed_secs: 3,
        });
        let (next, effects) = reduce(&model, Event::StartRecording);
        assert_eq!(request_id(&next), id);
        assert!(effects.is_empty());
    }

    // =========================================================================
    // Recording tick tests
    // =========================================================================

    #[test]
    fn tick_increments_elapsed_exactly_once() {
        let id = Uuid::new_v4();
        let model = model_with_phase(Phase::Recording {
            request_id: id,
            elapsed_secs: 4,
        });
        let (next, effects) = reduce(&model, Event::RecordingTick { id });
        assert!(matches!(
            next.phase,
            Phase::Recording { elapsed_secs: 5, .. }
        ));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitUi)));
    }

    #[test]
    fn stale_tick_is_ignored() {
        let id = Uuid::new_v4();
        let model = model_with_phase(Phase::Recording {
            request_id: id,
            elapsed_secs: 4,
        });
        let (next, effects) = reduce(&model, Event::RecordingTick { id: Uuid::new_v4() });
        assert!(matches!(
            next.phase,
            Phase::Recording { elapsed_secs: 4, .. }
        ));
        assert!(effects.is_empty());
    }

    #[test]
    fn tick_at_max_duration_force_stops() {
        let id = Uuid::new_v4();
        let model = model_with_phase(Phase::Recording {
            request_id: id,
            elapsed_secs: MAX_RECORDING_SECS - 1,
        });
        let (next, effects) = reduce(&model, Event::RecordingTick { id });
        assert!(matches!(next.phase, Phase::Stopping { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StopCapture { .. })));
    }

    // =========================================================================
    // Stop / submit tests
    // =========================================================================

    #[test]
    fn stop_requests_capture_finalization() {
        let id = Uuid::new_v4();
        let model = model_with_phase(Phase::Recording {
            request_id: id,
            elapsed_secs: 2,
        });
        let (next, effects) = reduce(&model, Event::StopRecording);
        assert!(matches!(next.phase, Phase::Stopping { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StopCapture { .. })));
    }

    #[test]
    fn capture_stop_ok_submits_even_an_empty_clip() {
        let id = Uuid::new_v4();
        let model = model_with_phase(Phase::Stopping { request_id: id });
        // Zero recorded chunks: header-only WAV. Submission must still happen.
        let (next, effects) = reduce(
            &model,
            Event::CaptureStopOk {
                id,
                bytes: vec![0u8; 44],
            },
        );
        assert!(matches!(next.phase, Phase::Submitting { .. }));
        assert!(next.payload.is_some());
        let submits = effects
            .iter()
            .filter(|e| matches!(e, Effect::Submit { .. }))
            .count();
        assert_eq!(submits, 1);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::EmitAudioPreview)));
    }

    #[test]
    fn upload_submits_exactly_once_without_further_action() {
        let (next, effects) = reduce(
            &Model::default(),
            Event::UploadAudio {
                bytes: vec![1, 2, 3],
                file_name: "clip.wav".to_string(),
            },
        );
        assert!(matches!(next.phase, Phase::Submitting { .. }));
        let submits = effects
            .iter()
            .filter(|e| matches!(e, Effect::Submit { .. }))
            .count();
        assert_eq!(submits, 1);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::EmitAudioPreview)));
        match &next.payload {
            Some(p) => assert_eq!(p.source.file_name(), "clip.wav"),
            None => panic!("upload must set the preview payload"),
        }
    }

    #[test]
    fn upload_is_ignored_while_a_submission_is_in_flight() {
        let id = Uuid::new_v4();
        let model = model_with_phase(Phase::Submitting {
            request_id: id,
            source: AudioSource::Recorded,
        });
        let (next, effects) = reduce(
            &model,
            Event::UploadAudio {
                bytes: vec![1],
                file_name: "clip.wav".to_string(),
            },
        );
        assert_eq!(request_id(&next), id);
        assert!(effects.is_empty());
    }

    // =========================================================================
    // Display / auto-reset tests
    // =========================================================================

    #[test]
    fn predict_ok_displays_and_schedules_reset() {
        let id = Uuid::new_v4();
        let model = model_with_phase(Phase::Submitting {
            request_id: id,
            source: AudioSource::Recorded,
        });
        let (next, effects) = reduce(
            &model,
            Event::PredictOk {
                id,
                emotion: "Happy".to_string(),
            },
        );
        assert!(matches!(next.phase, Phase::Displayed { ref emotion, .. } if emotion == "Happy"));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::StartDisplayTimeout { duration, .. } if *duration == DISPLAY_DURATION
        )));
    }

    #[test]
    fn predict_fail_alerts_and_returns_to_idle() {
        let id = Uuid::new_v4();
        let model = model_with_phase(Phase::Submitting {
            request_id: id,
            source: AudioSource::Recorded,
        });
        let (next, effects) = reduce(
            &model,
            Event::PredictFail {
                id,
                err: "endpoint returned 500".to_string(),
            },
        );
        assert!(matches!(next.phase, Phase::Idle));
        assert!(effects.iter().any(|e| matches!(e, Effect::ShowAlert { .. })));
    }

    #[test]
    fn display_timeout_clears_result_and_payload() {
        let id = Uuid::new_v4();
        let mut model = model_with_phase(Phase::Displayed {
            request_id: id,
            emotion: "Happy".to_string(),
        });
        model.payload = Some(AudioPayload::new(vec![1, 2], AudioSource::Recorded));
        let (next, effects) = reduce(&model, Event::DisplayTimeout { id });
        assert!(matches!(next.phase, Phase::Idle));
        assert!(next.payload.is_none());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::EmitAudioPreview)));
    }

    #[test]
    fn stale_display_timeout_is_ignored_after_new_submission() {
        let old_id = Uuid::new_v4();
        let model = model_with_phase(Phase::Displayed {
            request_id: old_id,
            emotion: "Sad".to_string(),
        });
        // A new recording supersedes the pending reset.
        let (next, _) = reduce(&model, Event::StartRecording);
        let new_id = request_id(&next);
        assert_ne!(new_id, old_id);

        let (after, effects) = reduce(&next, Event::DisplayTimeout { id: old_id });
        assert_eq!(request_id(&after), new_id);
        assert!(effects.is_empty());
    }

    #[test]
    fn start_recording_clears_previous_result_and_preview() {
        let id = Uuid::new_v4();
        let mut model = model_with_phase(Phase::Displayed {
            request_id: id,
            emotion: "Calm".to_string(),
        });
        model.payload = Some(AudioPayload::new(vec![9], AudioSource::Recorded));
        let (next, effects) = reduce(&model, Event::StartRecording);
        assert!(matches!(next.phase, Phase::Arming { .. }));
        assert!(next.payload.is_none());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::EmitAudioPreview)));
    }

    // =========================================================================
    // Cursor marker tests
    // =========================================================================

    #[test]
    fn pointer_move_spawns_one_marker_with_one_timeout() {
        let (next, effects) = reduce(
            &Model::default(),
            Event::PointerMoved {
                x: 10.0,
                y: 20.0,
                emoji: "😊",
            },
        );
        assert_eq!(next.markers.len(), 1);
        assert_eq!(next.markers[0].emoji, "😊");
        let timeouts: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::StartMarkerTimeout {
                    marker_id,
                    duration,
                } => Some((*marker_id, *duration)),
                _ => None,
            })
            .collect();
        assert_eq!(timeouts, vec![(next.markers[0].id, MARKER_LIFETIME)]);
    }

    #[test]
    fn marker_timeout_removes_exactly_its_marker() {
        let mut model = Model::default();
        for i in 0..3 {
            let (next, _) = reduce(
                &model,
                Event::PointerMoved {
                    x: i as f64,
                    y: 0.0,
                    emoji: "😐",
                },
            );
            model = next;
        }
        assert_eq!(model.markers.len(), 3);

        let victim = model.markers[1].id;
        let (next, effects) = reduce(&model, Event::MarkerTimeout { marker_id: victim });
        assert_eq!(next.markers.len(), 2);
        assert!(next.markers.iter().all(|m| m.id != victim));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitMarkers)));

        // A second timeout for the same marker is a no-op.
        let (after, effects) = reduce(&next, Event::MarkerTimeout { marker_id: victim });
        assert_eq!(after.markers.len(), 2);
        assert!(effects.is_empty());
    }

    #[test]
    fn markers_survive_phase_transitions() {
        let (with_marker, _) = reduce(
            &Model::default(),
            Event::PointerMoved {
                x: 1.0,
                y: 1.0,
                emoji: "😌",
            },
        );
        let (next, _) = reduce(&with_marker, Event::StartRecording);
        assert_eq!(next.markers.len(), 1);
    }
}
