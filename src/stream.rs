//! Output thread and audio device binding.
//!
//! A dedicated thread pulls 10 ms buffers from the engine and pushes them
//! into a device sink. While paused it sleeps in 1 ms steps until a register
//! write or DAC submission flips the flag back. The device is described in
//! two stages: an [`OutputDevice`] factory that crosses into the output
//! thread, and the [`DeviceSink`] it opens there, which never leaves it.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::engine::Engine;

/// Factory side of an audio output. Moved into the output thread, where
/// [`OutputDevice::open`] turns it into the running sink.
pub trait OutputDevice: Send {
    fn open(self: Box<Self>, sample_rate: u32) -> io::Result<Box<dyn DeviceSink>>;
}

/// Running audio sink, owned by the output thread for its whole life.
pub trait DeviceSink {
    /// Block until the device accepted the interleaved stereo frames.
    fn write_frames(&mut self, interleaved: &[i16]);

    /// Let queued audio play out before the device is dropped.
    fn drain(&mut self) {}
}

/* ========================================================================= */
/*  Null device                                                              */
/* ========================================================================= */

/// Sink that discards samples while pacing like a real device. Useful for
/// headless operation and tests.
pub struct NullDevice;

struct NullSink {
    sample_rate: u32,
}

impl OutputDevice for NullDevice {
    fn open(self: Box<Self>, sample_rate: u32) -> io::Result<Box<dyn DeviceSink>> {
        Ok(Box::new(NullSink { sample_rate }))
    }
}

impl DeviceSink for NullSink {
    fn write_frames(&mut self, interleaved: &[i16]) {
        let frames = (interleaved.len() / 2) as u64;
        thread::sleep(Duration::from_micros(frames * 1_000_000 / self.sample_rate as u64));
    }
}

/* ========================================================================= */
/*  Output thread                                                            */
/* ========================================================================= */

#[derive(Debug)]
pub struct OutputStream {
    paused: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    skip_drain: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl OutputStream {
    /// Spawn the output thread and open the device on it. Fails if the
    /// device cannot be opened; the thread is cleaned up in that case.
    pub fn start(
        engine: Arc<Mutex<Engine>>,
        device: Box<dyn OutputDevice>,
        sample_rate: u32,
    ) -> io::Result<OutputStream> {
        let paused = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));
        let skip_drain = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = mpsc::channel::<io::Result<()>>();

        let thread_paused = paused.clone();
        let thread_shutdown = shutdown.clone();
        let thread_skip_drain = skip_drain.clone();

        let handle = thread::Builder::new().name("fmdrive-output".into()).spawn(move || {
            let mut sink = match device.open(sample_rate) {
                Ok(sink) => {
                    let _ = ready_tx.send(Ok(()));
                    sink
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            /* 10 ms buffers, matching the historical stream granularity */
            let frames = (sample_rate / 100).max(1) as usize;
            let mut buffer = vec![0i16; frames * 2];

            while !thread_shutdown.load(Ordering::Acquire) {
                if thread_paused.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }

                let pause_requested = match engine.lock() {
                    Ok(mut engine) => engine.fill_buffer(&mut buffer),
                    Err(_) => {
                        buffer.fill(0);
                        false
                    }
                };
                if pause_requested {
                    thread_paused.store(true, Ordering::Release);
                }

                sink.write_frames(&buffer);
            }

            if !thread_skip_drain.load(Ordering::Acquire) {
                sink.drain();
            }
        })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(OutputStream { paused, shutdown, skip_drain, handle: Some(handle) }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(io::Error::new(io::ErrorKind::Other, "output thread died during startup"))
            }
        }
    }

    pub fn set_paused(&self, paused: bool) {
        let was = self.paused.swap(paused, Ordering::AcqRel);
        if was != paused {
            debug!("output stream {}", if paused { "paused" } else { "resumed" });
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Stop and join the output thread. With `skip_drain` the device is
    /// dropped without playing out queued audio, for teardown paths where a
    /// drain would block the host.
    pub fn stop(&mut self, skip_drain: bool) {
        let Some(handle) = self.handle.take() else { return };
        self.skip_drain.store(skip_drain, Ordering::Release);
        self.shutdown.store(true, Ordering::Release);
        if handle.join().is_err() {
            warn!("output thread panicked during shutdown");
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.stop(false);
    }
}

/* ========================================================================= */
/*  cpal device                                                              */
/* ========================================================================= */

#[cfg(feature = "cpal-device")]
pub use cpal_device::CpalDevice;

#[cfg(feature = "cpal-device")]
mod cpal_device {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Condvar, Mutex};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    use super::{DeviceSink, OutputDevice};

    type SampleQueue = Arc<(Mutex<VecDeque<i16>>, Condvar)>;

    /// Default-host cpal output. The blocking sink contract is bridged to
    /// cpal's pull callback through a bounded sample queue.
    pub struct CpalDevice;

    struct CpalSink {
        /* the stream must stay alive for audio to keep flowing */
        _stream: cpal::Stream,
        queue: SampleQueue,
        capacity: usize,
    }

    fn stream_err(err: impl std::fmt::Display) -> io::Error {
        io::Error::new(io::ErrorKind::Other, err.to_string())
    }

    impl OutputDevice for CpalDevice {
        fn open(self: Box<Self>, sample_rate: u32) -> io::Result<Box<dyn DeviceSink>> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no output device"))?;

            let config = cpal::StreamConfig {
                channels: 2,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let queue: SampleQueue = Arc::new((Mutex::new(VecDeque::new()), Condvar::new()));
            let callback_queue = queue.clone();

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        let (lock, cvar) = &*callback_queue;
                        if let Ok(mut queue) = lock.lock() {
                            for sample in data.iter_mut() {
                                *sample = queue.pop_front().unwrap_or(0);
                            }
                            cvar.notify_one();
                        } else {
                            data.fill(0);
                        }
                    },
                    |err| log::warn!("output stream error: {err}"),
                    None,
                )
                .map_err(stream_err)?;
            stream.play().map_err(stream_err)?;

            Ok(Box::new(CpalSink {
                _stream: stream,
                queue,
                /* ~200 ms of backlog before the writer blocks */
                capacity: sample_rate as usize * 2 / 5,
            }))
        }
    }

    impl DeviceSink for CpalSink {
        fn write_frames(&mut self, interleaved: &[i16]) {
            let (lock, cvar) = &*self.queue;
            let Ok(mut queue) = lock.lock() else { return };
            while queue.len() + interleaved.len() > self.capacity {
                match cvar.wait(queue) {
                    Ok(guard) => queue = guard,
                    Err(_) => return,
                }
            }
            queue.extend(interleaved.iter().copied());
        }

        fn drain(&mut self) {
            let (lock, cvar) = &*self.queue;
            let Ok(mut queue) = lock.lock() else { return };
            while !queue.is_empty() {
                match cvar.wait(queue) {
                    Ok(guard) => queue = guard,
                    Err(_) => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverOptions;

    /// Sink that copies everything it is handed into shared storage
    pub struct CaptureDevice {
        pub frames: Arc<Mutex<Vec<i16>>>,
    }

    struct CaptureSink {
        frames: Arc<Mutex<Vec<i16>>>,
    }

    impl OutputDevice for CaptureDevice {
        fn open(self: Box<Self>, _sample_rate: u32) -> io::Result<Box<dyn DeviceSink>> {
            Ok(Box::new(CaptureSink { frames: self.frames }))
        }
    }

    impl DeviceSink for CaptureSink {
        fn write_frames(&mut self, interleaved: &[i16]) {
            if let Ok(mut frames) = self.frames.lock() {
                frames.extend_from_slice(interleaved);
            }
        }
    }

    /// Device whose open always fails
    struct BrokenDevice;

    impl OutputDevice for BrokenDevice {
        fn open(self: Box<Self>, _sample_rate: u32) -> io::Result<Box<dyn DeviceSink>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such device"))
        }
    }

    fn test_engine() -> Arc<Mutex<Engine>> {
        Arc::new(Mutex::new(Engine::new(&DriverOptions::default(), 1)))
    }

    #[test]
    fn test_paused_stream_produces_nothing() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut stream = OutputStream::start(
            test_engine(),
            Box::new(CaptureDevice { frames: sink.clone() }),
            44100,
        )
        .expect("start");

        assert!(stream.is_paused());
        thread::sleep(Duration::from_millis(30));
        assert!(sink.lock().unwrap().is_empty(), "paused stream must stay silent");

        stream.stop(false);
    }

    #[test]
    fn test_resumed_stream_delivers_buffers() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let engine = test_engine();
        engine.lock().unwrap().write(0, 0x28, 0xF0);

        let mut stream =
            OutputStream::start(engine, Box::new(CaptureDevice { frames: sink.clone() }), 44100)
                .expect("start");
        stream.set_paused(false);

        /* wait for at least one 10 ms buffer */
        for _ in 0..100 {
            thread::sleep(Duration::from_millis(5));
            if !sink.lock().unwrap().is_empty() {
                break;
            }
        }
        stream.stop(false);

        let captured = sink.lock().unwrap();
        assert!(!captured.is_empty(), "running stream must deliver buffers");
        assert_eq!(captured.len() % (2 * 441), 0, "buffers are whole 10 ms blocks");
    }

    #[test]
    fn test_failed_device_reports_error() {
        let err = OutputStream::start(test_engine(), Box::new(BrokenDevice), 44100)
            .expect_err("open must fail");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut stream =
            OutputStream::start(test_engine(), Box::new(CaptureDevice { frames: sink }), 44100)
                .expect("start");
        stream.stop(true);
        stream.stop(false);
    }
}
