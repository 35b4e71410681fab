//! Effect runner for MoodCue
//!
//! This module handles executing effects produced by the state machine:
//! microphone capture, prediction submission, and the timer effects behind
//! the recording tick, the display auto-reset, and cursor marker expiry.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::audio::{AudioRecorder, RecordingHandle};
use crate::prediction;
use crate::settings::AppSettings;
use crate::state_machine::{Effect, Event};

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// Active recording handle storage.
/// RecordingHandle is Send-safe (the cpal stream lives on its own thread).
struct ActiveRecording {
    handle: Option<RecordingHandle>,
}

/// Real effect runner: CPAL capture plus the prediction endpoint client.
pub struct CaptureEffectRunner {
    recorder: Arc<Mutex<Option<AudioRecorder>>>,
    active_recordings: Arc<Mutex<HashMap<Uuid, ActiveRecording>>>,
    settings: Arc<Mutex<AppSettings>>,
}

impl CaptureEffectRunner {
    /// Create a new CaptureEffectRunner.
    /// Returns Ok even if the audio device isn't available - errors happen at
    /// record time.
    pub fn new(settings: Arc<Mutex<AppSettings>>) -> Arc<Self> {
        // Try to create the recorder now, but don't fail if we can't
        let recorder = match AudioRecorder::new() {
            Ok(r) => {
                log::info!("AudioRecorder initialized successfully");
                Some(r)
            }
            Err(e) => {
                log::warn!("AudioRecorder init failed (will retry on record): {}", e);
                None
            }
        };

        Arc::new(Self {
            recorder: Arc::new(Mutex::new(recorder)),
            active_recordings: Arc::new(Mutex::new(HashMap::new())),
            settings,
        })
    }
}

impl EffectRunner for CaptureEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::StartCapture { id } => {
                let recorder = self.recorder.clone();
                let active = self.active_recordings.clone();

                tokio::spawn(async move {
                    // Get or create the recorder, then start capturing, all
                    // while holding the lock; drop it before any awaits.
                    let start_result = {
                        let mut recorder_guard = recorder.lock().await;
                        if recorder_guard.is_none() {
                            // Retry creating recorder
                            match AudioRecorder::new() {
                                Ok(r) => {
                                    *recorder_guard = Some(r);
                                    Ok(())
                                }
                                Err(e) => {
                                    log::error!("Failed to initialize audio recorder: {}", e);
                                    Err(e.to_string())
                                }
                            }
                        } else {
                            Ok(())
                        }
                        .and_then(|_| match recorder_guard.as_ref() {
                            Some(rec) => rec.start().map_err(|e| e.to_string()),
                            None => {
                                log::error!("Audio recorder is unavailable after retry");
                                Err("Audio recorder unavailable".to_string())
                            }
                        })
                    }; // recorder_guard dropped here

                    match start_result {
                        Ok(handle) => {
                            log::info!("Audio capture started for {}", id);

                            let mut active_guard = active.lock().await;
                            active_guard.insert(
                                id,
                                ActiveRecording {
                                    handle: Some(handle),
                                },
                            );
                            drop(active_guard);

                            let _ = tx.send(Event::CaptureStartOk { id }).await;
                        }
                        Err(err) => {
                            log::error!("Failed to start audio capture: {}", err);
                            let _ = tx.send(Event::CaptureStartFail { id, err }).await;
                        }
                    }
                });
            }

            Effect::StopCapture { id } => {
                let active = self.active_recordings.clone();

                tokio::spawn(async move {
                    let handle = {
                        let mut active_guard = active.lock().await;
                        active_guard
                            .remove(&id)
                            .and_then(|mut recording| recording.handle.take())
                    };

                    let Some(handle) = handle else {
                        log::warn!("StopCapture: no active handle for id={}", id);
                        let _ = tx
                            .send(Event::CaptureStopFail {
                                id,
                                err: "no active recording".to_string(),
                            })
                            .await;
                        return;
                    };

                    // stop() joins the capture thread and encodes the clip.
                    let stop_result = tokio::task::spawn_blocking(move || handle.stop()).await;

                    match stop_result {
                        Ok(Ok(bytes)) => {
                            log::info!("Audio capture stopped: {} bytes", bytes.len());
                            let _ = tx.send(Event::CaptureStopOk { id, bytes }).await;
                        }
                        Ok(Err(e)) => {
                            log::error!("Failed to stop audio capture: {}", e);
                            let _ = tx
                                .send(Event::CaptureStopFail {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                        Err(e) => {
                            log::error!("Audio stop task failed: {}", e);
                            let _ = tx
                                .send(Event::CaptureStopFail {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::Submit { id, payload } => {
                let settings = self.settings.clone();

                tokio::spawn(async move {
                    let configured = {
                        let s = settings.lock().await;
                        s.predict_url.clone()
                    };
                    let url = prediction::resolve_predict_url(&configured);

                    match prediction::predict(&url, &payload).await {
                        Ok(emotion) => {
                            let _ = tx.send(Event::PredictOk { id, emotion }).await;
                        }
                        Err(e) => {
                            log::error!("Prediction failed: {}", e);
                            let _ = tx
                                .send(Event::PredictFail {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::StartRecordingTick { id } => {
                let active = self.active_recordings.clone();
                tokio::spawn(async move {
                    // Send tick events every second while the recording is active
                    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
                    interval.tick().await; // first tick completes immediately
                    loop {
                        interval.tick().await;
                        let is_active = {
                            let guard = active.lock().await;
                            guard.contains_key(&id)
                        };
                        if !is_active {
                            log::debug!("Recording tick stopping - {} no longer active", id);
                            break;
                        }
                        if tx.send(Event::RecordingTick { id }).await.is_err() {
                            log::debug!("Recording tick stopping - channel closed");
                            break;
                        }
                    }
                });
            }

            Effect::StartDisplayTimeout { id, duration } => {
                tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    log::debug!("Display timeout elapsed for id={}", id);
                    let _ = tx.send(Event::DisplayTimeout { id }).await;
                });
            }

            Effect::StartMarkerTimeout {
                marker_id,
                duration,
            } => {
                tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    let _ = tx.send(Event::MarkerTimeout { marker_id }).await;
                });
            }

            Effect::ShowAlert { .. }
            | Effect::EmitAudioPreview
            | Effect::EmitMarkers
            | Effect::EmitUi => {
                // Handled in the main loop, not here
                unreachable!("UI effects should be handled in run_state_loop");
            }
        }
    }
}

/// Stub effect runner for tests: no microphone, no network.
pub struct StubEffectRunner;

impl StubEffectRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Default for StubEffectRunner {
    fn default() -> Self {
        Self
    }
}

impl EffectRunner for StubEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::StartCapture { id } => {
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    let _ = tx.send(Event::CaptureStartOk { id }).await;
                });
            }

            Effect::StopCapture { id } => {
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    // Header-only clip: zero recorded chunks.
                    let bytes = crate::audio::recorder::encode_wav(
                        &[],
                        hound::WavSpec {
                            channels: 1,
                            sample_rate: 44_100,
                            bits_per_sample: 16,
                            sample_format: hound::SampleFormat::Int,
                        },
                    )
                    .unwrap_or_default();
                    let _ = tx.send(Event::CaptureStopOk { id, bytes }).await;
                });
            }

            Effect::Submit { id, .. } => {
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    let _ = tx
                        .send(Event::PredictOk {
                            id,
                            emotion: "Happy".to_string(),
                        })
                        .await;
                });
            }

            Effect::StartRecordingTick { id } => {
                tokio::spawn(async move {
                    // Bounded tick stream for tests.
                    for _ in 0..3 {
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        if tx.send(Event::RecordingTick { id }).await.is_err() {
                            break;
                        }
                    }
                });
            }

            Effect::StartDisplayTimeout { id, duration } => {
                tokio::spawn(async move {
                    tokio::time::sleep(duration.min(std::time::Duration::from_millis(50))).await;
                    let _ = tx.send(Event::DisplayTimeout { id }).await;
                });
            }

            Effect::StartMarkerTimeout {
                marker_id,
                duration,
            } => {
                tokio::spawn(async move {
                    tokio::time::sleep(duration.min(std::time::Duration::from_millis(50))).await;
                    let _ = tx.send(Event::MarkerTimeout { marker_id }).await;
                });
            }

            Effect::ShowAlert { .. }
            | Effect::EmitAudioPreview
            | Effect::EmitMarkers
            | Effect::EmitUi => {
                unreachable!("UI effects should be handled in run_state_loop");
            }
        }
    }
}
