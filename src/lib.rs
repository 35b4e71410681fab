pub mod audio;
pub mod effects;
pub mod emoji;
pub mod prediction;
pub mod settings;
pub mod state_machine;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use std::sync::Arc;
use tauri::{AppHandle, Emitter, Manager};
use tokio::sync::{mpsc, Mutex};

use effects::{CaptureEffectRunner, EffectRunner};
use settings::AppSettings;
use state_machine::{reduce, Effect, Event, Model, Phase};

/// UI state sent to the frontend via Tauri events.
/// Tagged union format: { "status": "idle" } or
/// { "status": "recording", "elapsedSecs": 5 }
#[derive(Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UiState {
    Idle,
    Arming,
    Recording {
        #[serde(rename = "elapsedSecs")]
        elapsed_secs: u64,
    },
    Stopping,
    /// Submission in flight; the frontend shows its loading indicator.
    Submitting,
    Displayed {
        emotion: String,
        emoji: Option<&'static str>,
    },
}

/// One cursor marker as sent to the frontend.
#[derive(Clone, Serialize)]
pub struct UiMarker {
    pub id: String,
    pub emoji: &'static str,
    pub x: f64,
    pub y: f64,
}

/// Playback preview sent to the frontend. `data` is the base64 clip, or
/// None when the preview should be dropped (the frontend revokes its
/// object URL either way before applying the update).
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPreview {
    pub data: Option<String>,
    pub file_name: Option<String>,
}

/// Convert the internal model to UiState for the frontend
fn model_to_ui(model: &Model) -> UiState {
    match &model.phase {
        Phase::Idle => UiState::Idle,
        Phase::Arming { .. } => UiState::Arming,
        Phase::Recording { elapsed_secs, .. } => UiState::Recording {
            elapsed_secs: *elapsed_secs,
        },
        Phase::Stopping { .. } => UiState::Stopping,
        Phase::Submitting { .. } => UiState::Submitting,
        Phase::Displayed { emotion, .. } => UiState::Displayed {
            emotion: emotion.clone(),
            emoji: emoji::emoji_for_label(emotion),
        },
    }
}

/// Emit a UI state update to the frontend
fn emit_ui_state(app: &AppHandle, model: &Model) {
    let ui_state = model_to_ui(model);
    log::debug!("Emitting UI state: {:?}", serde_json::to_string(&ui_state));
    if let Err(e) = app.emit("state-update", &ui_state) {
        log::warn!("Failed to emit state to UI: {:?}", e);
    }
}

/// Emit the current cursor marker list to the frontend
fn emit_markers(app: &AppHandle, model: &Model) {
    let markers: Vec<UiMarker> = model
        .markers
        .iter()
        .map(|m| UiMarker {
            id: m.id.to_string(),
            emoji: m.emoji,
            x: m.x,
            y: m.y,
        })
        .collect();
    if let Err(e) = app.emit("markers-update", &markers) {
        log::warn!("Failed to emit markers to UI: {:?}", e);
    }
}

/// Emit the playback preview (or its removal) to the frontend
fn emit_audio_preview(app: &AppHandle, model: &Model) {
    let preview = match &model.payload {
        Some(payload) => AudioPreview {
            data: Some(BASE64.encode(&payload.bytes[..])),
            file_name: Some(payload.source.file_name().to_string()),
        },
        None => AudioPreview {
            data: None,
            file_name: None,
        },
    };
    if let Err(e) = app.emit("audio-preview", &preview) {
        log::warn!("Failed to emit audio preview to UI: {:?}", e);
    }
}

/// Emit a user-visible alert to the frontend
fn emit_alert(app: &AppHandle, message: &str) {
    if let Err(e) = app.emit("alert", message) {
        log::warn!("Failed to emit alert to UI: {:?}", e);
    }
}

/// State loop manager - holds the event sender for dispatching events
pub struct StateLoopHandle {
    tx: mpsc::Sender<Event>,
}

impl StateLoopHandle {
    /// Send an event to the state machine
    pub async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(event).await
    }
}

/// Managed settings shared between commands and the effect runner
pub struct SettingsState(pub Arc<Mutex<AppSettings>>);

/// Run the main state loop
async fn run_state_loop(
    app: AppHandle,
    mut rx: mpsc::Receiver<Event>,
    effect_runner: Arc<dyn EffectRunner>,
    tx: mpsc::Sender<Event>,
) {
    let mut model = Model::default();

    // Emit initial state
    emit_ui_state(&app, &model);
    log::info!("State loop started");

    while let Some(event) = rx.recv().await {
        // Handle Exit at the edge
        if matches!(event, Event::Exit) {
            log::info!("Exit requested, shutting down state loop");
            break;
        }

        let old_discriminant = std::mem::discriminant(&model.phase);
        let (next, effects) = reduce(&model, event);
        let new_discriminant = std::mem::discriminant(&next.phase);

        // Log phase transitions
        if old_discriminant != new_discriminant {
            log::info!("Phase transition: {:?} -> {:?}", model.phase, next.phase);
        }

        model = next;

        // Execute effects
        for eff in effects {
            match eff {
                Effect::EmitUi => emit_ui_state(&app, &model),
                Effect::EmitMarkers => emit_markers(&app, &model),
                Effect::EmitAudioPreview => emit_audio_preview(&app, &model),
                Effect::ShowAlert { message } => emit_alert(&app, &message),
                other => effect_runner.spawn(other, tx.clone()),
            }
        }
    }

    log::info!("State loop ended");
}

// ============================================================================
// Tauri commands
// ============================================================================

#[tauri::command]
async fn start_recording(state: tauri::State<'_, StateLoopHandle>) -> Result<(), String> {
    log::info!("UI: start recording");
    state
        .send(Event::StartRecording)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn stop_recording(state: tauri::State<'_, StateLoopHandle>) -> Result<(), String> {
    log::info!("UI: stop recording");
    state
        .send(Event::StopRecording)
        .await
        .map_err(|e| e.to_string())
}

/// Upload a local audio file. The frontend reads the bytes and sends them
/// base64-encoded; submission starts immediately.
#[tauri::command]
async fn upload_audio(
    state: tauri::State<'_, StateLoopHandle>,
    data: String,
    file_name: String,
) -> Result<(), String> {
    let bytes = BASE64
        .decode(data.as_bytes())
        .map_err(|e| format!("Invalid audio data: {}", e))?;
    log::info!("UI: upload {} ({} bytes)", file_name, bytes.len());
    state
        .send(Event::UploadAudio { bytes, file_name })
        .await
        .map_err(|e| e.to_string())
}

/// Pointer moved over the window; spawns one cursor marker.
#[tauri::command]
async fn pointer_moved(
    state: tauri::State<'_, StateLoopHandle>,
    x: f64,
    y: f64,
) -> Result<(), String> {
    state
        .send(Event::PointerMoved {
            x,
            y,
            emoji: emoji::random_cursor_emoji(),
        })
        .await
        .map_err(|e| e.to_string())
}

/// Audio capture status for the frontend
#[derive(Clone, Serialize)]
pub struct AudioStatusResponse {
    available: bool,
    error: Option<String>,
}

#[tauri::command]
fn get_audio_status() -> AudioStatusResponse {
    match audio::AudioRecorder::new() {
        Ok(_) => AudioStatusResponse {
            available: true,
            error: None,
        },
        Err(e) => AudioStatusResponse {
            available: false,
            error: Some(e.to_string()),
        },
    }
}

/// Prediction endpoint status for the frontend
#[derive(Clone, Serialize)]
pub struct PredictionStatusResponse {
    endpoint: String,
}

#[tauri::command]
async fn get_prediction_status(
    settings: tauri::State<'_, SettingsState>,
) -> Result<PredictionStatusResponse, String> {
    let configured = {
        let guard = settings.0.lock().await;
        guard.predict_url.clone()
    };
    Ok(PredictionStatusResponse {
        endpoint: prediction::resolve_predict_url(&configured),
    })
}

// ============================================================================
// Application entry point
// ============================================================================

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .setup(|app| {
            // Set up logging in debug mode
            if cfg!(debug_assertions) {
                app.handle().plugin(
                    tauri_plugin_log::Builder::default()
                        .level(log::LevelFilter::Debug)
                        .build(),
                )?;
            }

            let settings = Arc::new(Mutex::new(settings::load_settings(app.handle())));
            app.manage(SettingsState(settings.clone()));

            // Create event channel for state machine
            let (tx, rx) = mpsc::channel::<Event>(64);

            // Store the sender so Tauri commands can dispatch events
            app.manage(StateLoopHandle { tx: tx.clone() });

            let effect_runner = CaptureEffectRunner::new(settings);

            // Spawn the state loop
            let app_handle = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                run_state_loop(app_handle, rx, effect_runner, tx).await;
            });

            log::info!("MoodCue started");
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            start_recording,
            stop_recording,
            upload_audio,
            pointer_moved,
            get_audio_status,
            get_prediction_status,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

#[cfg(test)]
mod tests {
    use super::*;
    use state_machine::AudioPayload;
    use state_machine::AudioSource;

    #[test]
    fn ui_state_serializes_as_tagged_union() {
        let json = serde_json::to_string(&UiState::Recording { elapsed_secs: 7 }).unwrap();
        assert_eq!(json, r#"{"status":"recording","elapsedSecs":7}"#);

        let json = serde_json::to_string(&UiState::Idle).unwrap();
        assert_eq!(json, r#"{"status":"idle"}"#);
    }

    #[test]
    fn displayed_state_carries_the_glyph() {
        let model = Model {
            phase: Phase::Displayed {
                request_id: uuid::Uuid::new_v4(),
                emotion: "Happy".to_string(),
            },
            payload: None,
            markers: Vec::new(),
        };
        match model_to_ui(&model) {
            UiState::Displayed { emotion, emoji } => {
                assert_eq!(emotion, "Happy");
                assert_eq!(emoji, Some("😊"));
            }
            other => panic!(
                "unexpected ui state: {}",
                serde_json::to_string(&other).unwrap()
            ),
        }
    }

    #[test]
    fn unrecognized_label_displays_without_glyph() {
        let model = Model {
            phase: Phase::Displayed {
                request_id: uuid::Uuid::new_v4(),
                emotion: "Confused".to_string(),
            },
            payload: None,
            markers: Vec::new(),
        };
        match model_to_ui(&model) {
            UiState::Displayed { emotion, emoji } => {
                assert_eq!(emotion, "Confused");
                assert_eq!(emoji, None);
            }
            _ => panic!("expected Displayed"),
        }
    }

    #[test]
    fn audio_preview_round_trips_base64() {
        let payload = AudioPayload::new(vec![0, 1, 2, 250], AudioSource::Recorded);
        let encoded = BASE64.encode(&payload.bytes[..]);
        assert_eq!(BASE64.decode(encoded.as_bytes()).unwrap(), vec![0, 1, 2, 250]);
    }
}
