//! cpal-backed output sink
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated device
//! thread for its whole life. The sink handle holds the producer side of an
//! SPSC sample ring; the stream callback drains the consumer side and
//! zero-fills when starved. Stream build errors are reported back through a
//! handshake channel so `open` fails synchronously.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};
use mx_core::Sample;
use rtrb::{Producer, RingBuffer};

use crate::device::find_output_device;
use crate::{AudioError, AudioResult, OutputConfig, OutputSink};

/// Ring headroom in blocks between the writer and the device callback
const RING_BLOCKS: usize = 8;

/// How long `write` sleeps while the ring is full
const FULL_BACKOFF: Duration = Duration::from_micros(200);

pub struct DeviceSink {
    producer: Producer<Sample>,
    /// Cleared by the device thread when the stream dies
    alive: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceSink {
    /// Validate the device, build the stream on the device thread, and
    /// start playback. Any build error surfaces from this call.
    pub fn open(config: &OutputConfig) -> AudioResult<Self> {
        let device = find_output_device(config.device.as_deref())?;

        // Probe for a stereo f32 config at the requested rate before
        // committing to a thread.
        let rate = SampleRate(config.sample_rate);
        let supported = device
            .supported_output_configs()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .find(|c| {
                c.channels() >= 2
                    && c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
                    && c.sample_format() == SampleFormat::F32
            })
            .ok_or_else(|| {
                AudioError::ConfigError(format!(
                    "no stereo f32 output config at {} Hz",
                    config.sample_rate
                ))
            })?
            .with_sample_rate(rate);

        let channels = supported.channels() as usize;
        let stream_config = StreamConfig {
            channels: supported.channels(),
            sample_rate: rate,
            buffer_size: BufferSize::Fixed(config.period as u32),
        };

        let (producer, mut consumer) =
            RingBuffer::<Sample>::new(config.period * 2 * RING_BLOCKS);

        let alive = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<AudioResult<()>>();

        let thread_alive = Arc::clone(&alive);
        let thread_shutdown = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("mixdown-device".to_string())
            .spawn(move || {
                let error_alive = Arc::clone(&thread_alive);
                let build = device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            let left = consumer.pop().unwrap_or(0.0);
                            let right = consumer.pop().unwrap_or(0.0);
                            frame[0] = left;
                            if channels > 1 {
                                frame[1] = right;
                            }
                            for extra in frame.iter_mut().skip(2) {
                                *extra = 0.0;
                            }
                        }
                    },
                    move |err| {
                        log::error!("audio output stream error: {err}");
                        error_alive.store(false, Ordering::Release);
                    },
                    None,
                );

                let stream = match build {
                    Ok(stream) => stream,
                    Err(e) => {
                        thread_alive.store(false, Ordering::Release);
                        let _ = ready_tx.send(Err(AudioError::StreamBuildError(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    thread_alive.store(false, Ordering::Release);
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while !thread_shutdown.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream drops here, releasing the device.
            })
            .map_err(|e| AudioError::BackendError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                producer,
                alive,
                shutdown,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::StreamBuildError(
                    "device thread exited before stream start".to_string(),
                ))
            }
        }
    }
}

impl OutputSink for DeviceSink {
    fn write(&mut self, interleaved: &[Sample]) -> AudioResult<()> {
        for &sample in interleaved {
            loop {
                if !self.alive.load(Ordering::Acquire) {
                    return Err(AudioError::StreamClosed);
                }
                match self.producer.push(sample) {
                    Ok(()) => break,
                    // Ring full: the device is consuming, wait for room.
                    Err(_) => thread::sleep(FULL_BACKOFF),
                }
            }
        }
        Ok(())
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
