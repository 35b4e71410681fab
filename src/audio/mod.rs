//! Audio capture module for MoodCue
//!
//! This module handles microphone input capture and in-memory WAV encoding.
//! Uses CPAL for audio capture and hound for WAV encoding.

pub mod recorder;

pub use recorder::{AudioRecorder, CaptureError, RecordingHandle};
