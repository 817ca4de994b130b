//! Microphone capture via cpal
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated thread
//! that owns it until capture is stopped.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use tracing::{error, info, warn};

use super::capture::{AudioCapture, CaptureChunk, CaptureSink};
use crate::error::CaptureError;

/// Captures from the default input device, downmixed to mono i16
pub struct MicrophoneCapture {
    device_name: String,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneCapture {
    /// Acquire the default input device
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if no input device is accessible
    pub fn open() -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            CaptureError::PermissionDenied("no accessible input device".to_string())
        })?;

        // Probing the config fails when the OS refuses access
        device
            .default_input_config()
            .map_err(|e| CaptureError::PermissionDenied(e.to_string()))?;

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        info!("Microphone available: {}", device_name);

        Ok(Self {
            device_name,
            stop_tx: None,
            thread: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioCapture for MicrophoneCapture {
    async fn start(&mut self, sink: CaptureSink) -> Result<(), CaptureError> {
        if self.thread.is_some() {
            return Err(CaptureError::Device("already capturing".to_string()));
        }

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), CaptureError>>(1);

        let thread = std::thread::Builder::new()
            .name("talkie-mic".to_string())
            .spawn(move || {
                let stream = match build_stream(sink) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CaptureError::Device(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(()));

                // Park until stop() is called or the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| CaptureError::Device(e.to_string()))?
            .map_err(|_| CaptureError::Device("capture thread exited".to_string()))?;
        ready?;

        info!("Microphone capture started: {}", self.device_name);
        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(thread) = self.thread.take() {
            if tokio::task::spawn_blocking(move || thread.join()).await.is_err() {
                warn!("Microphone thread did not shut down cleanly");
            }
            info!("Microphone capture stopped: {}", self.device_name);
        }
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

fn build_stream(sink: CaptureSink) -> Result<cpal::Stream, CaptureError> {
    let device = default_device()?;
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::PermissionDenied(e.to_string()))?;

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let channels = config.channels.max(1) as usize;
    let sample_rate = config.sample_rate.0;

    info!(
        "Opening input stream: {}Hz, {} channels, {:?}",
        sample_rate, channels, sample_format
    );

    let on_error = |err: cpal::StreamError| error!("Audio capture error: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let samples = data
                    .chunks(channels)
                    .map(|frame| f32_to_i16(frame.iter().sum::<f32>() / frame.len() as f32))
                    .collect();
                let _ = sink.send(CaptureChunk {
                    samples,
                    sample_rate,
                });
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples = data
                    .chunks(channels)
                    .map(|frame| {
                        let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                        (sum / frame.len() as i32) as i16
                    })
                    .collect();
                let _ = sink.send(CaptureChunk {
                    samples,
                    sample_rate,
                });
            },
            on_error,
            None,
        ),
        other => {
            return Err(CaptureError::Device(format!(
                "unsupported sample format: {:?}",
                other
            )))
        }
    };

    stream.map_err(|e| CaptureError::Device(e.to_string()))
}

fn default_device() -> Result<Device, CaptureError> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| CaptureError::PermissionDenied("no accessible input device".to_string()))
}

/// Convert a float sample in [-1.0, 1.0] to i16
fn f32_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32768.0) as i16
    } else {
        (clamped * 32767.0) as i16
    }
}
