//! Audio recorder using CPAL for capture and hound for WAV encoding
//!
//! The AudioRecorder captures audio from the default input device into an
//! ordered in-memory chunk buffer. Stopping concatenates the chunks into one
//! immutable WAV clip; nothing is written to disk.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use hound::{WavSpec, WavWriter};

/// Errors that can occur during audio capture.
#[derive(Debug, Clone)]
pub enum CaptureError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    EncodeFailed(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NoInputDevice => write!(f, "No audio input device found"),
            CaptureError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            CaptureError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            CaptureError::EncodeFailed(e) => write!(f, "Failed to encode audio data: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

type ChunkBuffer = Arc<Mutex<Vec<Vec<i16>>>>;

/// Handle to an active recording.
///
/// The cpal stream is owned by a dedicated thread (streams are not Send);
/// the handle only carries channels and the shared chunk buffer, so it can
/// be stored in async state.
pub struct RecordingHandle {
    stop_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
    chunks: ChunkBuffer,
    is_recording: Arc<AtomicBool>,
    spec: WavSpec,
}

impl RecordingHandle {
    /// Stop recording and encode the buffered chunks into one WAV clip.
    /// Zero buffered chunks yield a valid zero-frame clip.
    pub fn stop(self) -> Result<Vec<u8>, CaptureError> {
        // Stop appending, then let the audio thread drop the stream.
        self.is_recording.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(());
        if self.thread.join().is_err() {
            log::error!("Audio capture thread panicked");
        }

        let chunks = {
            let mut guard = self
                .chunks
                .lock()
                .map_err(|_| CaptureError::EncodeFailed("chunk buffer poisoned".to_string()))?;
            std::mem::take(&mut *guard)
        };

        let total: usize = chunks.iter().map(Vec::len).sum();
        log::info!(
            "Recording stopped: {} chunks, {} samples",
            chunks.len(),
            total
        );

        encode_wav(&chunks, self.spec)
    }
}

/// Audio recorder that captures from the default input device.
pub struct AudioRecorder {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl AudioRecorder {
    /// Create a new AudioRecorder using the default input device.
    pub fn new() -> Result<Self, CaptureError> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice)?;

        log::info!("Using audio input device: {:?}", device.name());

        let supported_config = device
            .default_input_config()
            .map_err(|_| CaptureError::NoSupportedConfig)?;

        log::info!(
            "Audio config: {} Hz, {} channels, {:?}",
            supported_config.sample_rate().0,
            supported_config.channels(),
            supported_config.sample_format()
        );

        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();

        Ok(Self {
            device,
            config,
            sample_format,
        })
    }

    /// Start capturing. Returns a handle that must be used to stop the
    /// recording and obtain the finalized clip.
    pub fn start(&self) -> Result<RecordingHandle, CaptureError> {
        let spec = WavSpec {
            channels: self.config.channels,
            sample_rate: self.config.sample_rate.0,
            bits_per_sample: 16, // Always encode as 16-bit
            sample_format: hound::SampleFormat::Int,
        };

        let chunks: ChunkBuffer = Arc::new(Mutex::new(Vec::new()));
        let is_recording = Arc::new(AtomicBool::new(true));

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();

        let device = self.device.clone();
        let config = self.config.clone();
        let sample_format = self.sample_format;
        let thread_chunks = chunks.clone();
        let thread_flag = is_recording.clone();

        let thread = std::thread::spawn(move || {
            let stream = match build_stream(&device, &config, sample_format, thread_chunks, thread_flag) {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(CaptureError::StreamCreationFailed(format!(
                    "Failed to start stream: {}",
                    e
                ))));
                return;
            }

            let _ = ready_tx.send(Ok(()));

            // Hold the stream until stop is requested (or the handle dropped).
            let _ = stop_rx.recv();
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("Recording started");
                Ok(RecordingHandle {
                    stop_tx,
                    thread,
                    chunks,
                    is_recording,
                    spec,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::StreamCreationFailed(
                "audio capture thread exited unexpectedly".to_string(),
            )),
        }
    }
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    chunks: ChunkBuffer,
    is_recording: Arc<AtomicBool>,
) -> Result<cpal::Stream, CaptureError> {
    let err_fn = |err| log::error!("Audio stream error: {}", err);

    match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(device, config, chunks, is_recording, err_fn),
        SampleFormat::U16 => build_stream_typed::<u16>(device, config, chunks, is_recording, err_fn),
        SampleFormat::F32 => build_stream_typed::<f32>(device, config, chunks, is_recording, err_fn),
        _ => Err(CaptureError::NoSupportedConfig),
    }
}

fn build_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    chunks: ChunkBuffer,
    is_recording: Arc<AtomicBool>,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::Sample<Float = f32> + cpal::SizedSample + Send + 'static,
{
    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !is_recording.load(Ordering::SeqCst) {
                    return;
                }

                // One callback = one ordered chunk.
                let chunk: Vec<i16> = data.iter().map(|&s| sample_to_i16(s)).collect();
                if let Ok(mut guard) = chunks.lock() {
                    guard.push(chunk);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

/// Concatenate ordered chunks into one in-memory WAV clip.
pub fn encode_wav(chunks: &[Vec<i16>], spec: WavSpec) -> Result<Vec<u8>, CaptureError> {
    let mut buf = Vec::new();
    {
        let mut writer = WavWriter::new(Cursor::new(&mut buf), spec)
            .map_err(|e| CaptureError::EncodeFailed(e.to_string()))?;
        for chunk in chunks {
            for &sample in chunk {
                writer
                    .write_sample(sample)
                    .map_err(|e| CaptureError::EncodeFailed(e.to_string()))?;
            }
        }
        writer
            .finalize()
            .map_err(|e| CaptureError::EncodeFailed(e.to_string()))?;
    }
    Ok(buf)
}

/// Convert any sample type to i16 for WAV encoding.
fn sample_to_i16<T: cpal::Sample<Float = f32>>(sample: T) -> i16 {
    let f32_sample: f32 = sample.to_float_sample();
    // Clamp and convert to i16
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}
