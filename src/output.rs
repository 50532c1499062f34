// Native decode/output pipeline using cpal
//
// One session thread per prepared resource. The thread owns the decoder and
// the cpal stream outright (streams are not Send on every platform), so all
// interaction goes through atomics, the shared ring, and a command channel.
// Outcome callbacks carry the locator; a generation counter keeps threads
// of superseded sessions from speaking at all.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use parking_lot::Mutex;

use crate::catalog::MediaCatalog;
use crate::decoder::{AudioDecoder, SampleRing};
use crate::error::{PlayerError, Result};
use crate::pipeline::{MediaPipeline, PipelineListener};
use crate::track::Locator;

/// Ring buffer size in samples (4 seconds at 48kHz stereo)
const RING_BUFFER_SIZE: usize = 48000 * 2 * 4;

/// Amount decoded ahead of the ready signal, in milliseconds
const PRE_BUFFER_MS: u64 = 200;

enum SessionCmd {
    Seek(u64),
}

struct SessionHandle {
    commands: mpsc::Sender<SessionCmd>,
    thread: Option<thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    sample_rate: Arc<AtomicU64>,
    duration_ms: Arc<AtomicU64>,
}

struct Shared {
    catalog: Arc<dyn MediaCatalog>,
    listener: Mutex<Option<Arc<dyn PipelineListener>>>,
    generation: AtomicU64,
    playing: Arc<AtomicBool>,
    volume: Arc<Mutex<f32>>,
}

impl Shared {
    fn listener(&self) -> Option<Arc<dyn PipelineListener>> {
        self.listener.lock().clone()
    }

    /// True while `generation` still names the current session.
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

/// cpal-backed implementation of the pipeline seam.
pub struct CpalPipeline {
    shared: Arc<Shared>,
    session: Mutex<Option<SessionHandle>>,
}

impl CpalPipeline {
    pub fn new(catalog: Arc<dyn MediaCatalog>) -> Self {
        Self {
            shared: Arc::new(Shared {
                catalog,
                listener: Mutex::new(None),
                generation: AtomicU64::new(0),
                playing: Arc::new(AtomicBool::new(false)),
                volume: Arc::new(Mutex::new(1.0)),
            }),
            session: Mutex::new(None),
        }
    }

    fn teardown(&self) {
        let handle = self.session.lock().take();
        if let Some(mut handle) = handle {
            handle.stop.store(true, Ordering::SeqCst);
            self.shared.playing.store(false, Ordering::SeqCst);
            if let Some(thread) = handle.thread.take() {
                // A completion callback can re-enter prepare() from the
                // session thread itself; joining there would deadlock.
                if thread.thread().id() != std::thread::current().id() {
                    let _ = thread.join();
                }
            }
        }
    }
}

impl MediaPipeline for CpalPipeline {
    fn set_listener(&self, listener: Arc<dyn PipelineListener>) {
        *self.shared.listener.lock() = Some(listener);
    }

    fn prepare(&self, locator: &Locator) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.teardown();

        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let frames = Arc::new(AtomicU64::new(0));
        let sample_rate = Arc::new(AtomicU64::new(48_000));
        let duration_ms = Arc::new(AtomicU64::new(0));

        let session = SessionWorker {
            shared: Arc::clone(&self.shared),
            locator: locator.clone(),
            generation,
            commands: rx,
            stop: Arc::clone(&stop),
            frames: Arc::clone(&frames),
            sample_rate: Arc::clone(&sample_rate),
            duration_ms: Arc::clone(&duration_ms),
        };
        let thread = thread::spawn(move || session.run());

        *self.session.lock() = Some(SessionHandle {
            commands: tx,
            thread: Some(thread),
            stop,
            frames,
            sample_rate,
            duration_ms,
        });
    }

    fn start(&self) {
        self.shared.playing.store(true, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.shared.playing.store(false, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.shared.playing.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.teardown();
    }

    fn seek(&self, position_ms: u64) {
        let session = self.session.lock();
        if let Some(handle) = session.as_ref() {
            let _ = handle.commands.send(SessionCmd::Seek(position_ms));
        }
    }

    fn set_volume(&self, volume: f32) {
        *self.shared.volume.lock() = volume.clamp(0.0, 1.0);
    }

    fn position_ms(&self) -> u64 {
        let session = self.session.lock();
        match session.as_ref() {
            Some(handle) => {
                let rate = handle.sample_rate.load(Ordering::Relaxed).max(1);
                handle.frames.load(Ordering::Relaxed) * 1000 / rate
            }
            None => 0,
        }
    }

    fn duration_ms(&self) -> u64 {
        self.session
            .lock()
            .as_ref()
            .map(|handle| handle.duration_ms.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Drop for CpalPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved onto the session thread.
struct SessionWorker {
    shared: Arc<Shared>,
    locator: Locator,
    generation: u64,
    commands: mpsc::Receiver<SessionCmd>,
    stop: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    sample_rate: Arc<AtomicU64>,
    duration_ms: Arc<AtomicU64>,
}

impl SessionWorker {
    fn run(self) {
        let mut decoder = match AudioDecoder::open(&*self.shared.catalog, &self.locator) {
            Ok(decoder) => decoder,
            Err(err) => {
                self.fail(err);
                return;
            }
        };

        self.sample_rate
            .store(decoder.format.sample_rate as u64, Ordering::Relaxed);
        self.duration_ms
            .store(decoder.format.duration_ms, Ordering::Relaxed);

        let ring = Arc::new(Mutex::new(SampleRing::new(RING_BUFFER_SIZE)));

        // The stream lives on this thread for its entire session.
        let _stream = match self.build_stream(&decoder, Arc::clone(&ring)) {
            Ok(stream) => stream,
            Err(err) => {
                self.fail(err);
                return;
            }
        };

        if let Err(err) = self.prebuffer(&mut decoder, &ring) {
            self.fail(err);
            return;
        }

        if self.superseded() {
            log::debug!("prepare of {} superseded before ready", self.locator);
            return;
        }
        if let Some(listener) = self.shared.listener() {
            listener.on_ready(&self.locator, decoder.format.duration_ms);
        }

        self.feed(&mut decoder, &ring);
    }

    fn superseded(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || !self.shared.is_current(self.generation)
    }

    fn fail(&self, err: PlayerError) {
        if self.superseded() {
            log::debug!("suppressing error from superseded session: {}", err);
            return;
        }
        log::error!("pipeline error for {}: {}", self.locator, err);
        self.shared.playing.store(false, Ordering::SeqCst);
        if let Some(listener) = self.shared.listener() {
            listener.on_error(&self.locator, &err.to_string());
        }
    }

    fn build_stream(
        &self,
        decoder: &AudioDecoder,
        ring: Arc<Mutex<SampleRing>>,
    ) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::Device("no output device available".to_string()))?;

        let channels = decoder.format.channels.max(1);
        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(decoder.format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let playing = Arc::clone(&self.shared.playing);
        let volume = Arc::clone(&self.shared.volume);
        let frames = Arc::clone(&self.frames);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !playing.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }

                    let read = ring.lock().read(data);
                    let gain = *volume.lock();
                    if (gain - 1.0).abs() > 0.001 {
                        for sample in data[..read].iter_mut() {
                            *sample *= gain;
                        }
                    }
                    if read < data.len() {
                        data[read..].fill(0.0);
                    }
                    frames.fetch_add((read / channels as usize) as u64, Ordering::Relaxed);
                },
                |err| log::error!("audio stream error: {}", err),
                None,
            )
            .map_err(|e| PlayerError::Device(format!("output stream build failed: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::Playback(format!("stream start failed: {}", e)))?;
        Ok(stream)
    }

    /// Decode ahead of the ready signal so start() has samples on hand.
    fn prebuffer(&self, decoder: &mut AudioDecoder, ring: &Mutex<SampleRing>) -> Result<()> {
        let target = (PRE_BUFFER_MS * decoder.format.sample_rate as u64 / 1000) as usize
            * decoder.format.channels as usize;
        let mut buffered = 0;
        while buffered < target {
            match decoder.decode_next()? {
                Some(samples) => {
                    let written = ring.lock().write(&samples);
                    buffered += written;
                    if written < samples.len() {
                        break;
                    }
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Main decode loop: commands, pause idling, ring feeding, completion.
    fn feed(&self, decoder: &mut AudioDecoder, ring: &Arc<Mutex<SampleRing>>) {
        loop {
            if self.superseded() {
                return;
            }

            while let Ok(cmd) = self.commands.try_recv() {
                match cmd {
                    SessionCmd::Seek(position_ms) => {
                        if let Err(err) = decoder.seek(position_ms) {
                            self.fail(err);
                            return;
                        }
                        ring.lock().clear();
                        self.frames.store(
                            position_ms * decoder.format.sample_rate as u64 / 1000,
                            Ordering::Relaxed,
                        );
                    }
                }
            }

            if !self.shared.playing.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(10));
                continue;
            }

            match decoder.decode_next() {
                Ok(Some(samples)) => {
                    let mut written = 0;
                    while written < samples.len() {
                        if self.superseded() {
                            return;
                        }
                        let n = ring.lock().write(&samples[written..]);
                        if n == 0 {
                            // Ring full; back off harder the fuller it is.
                            let fullness = ring.lock().fullness();
                            let sleep_ms = if fullness > 0.9 { 15 } else { 5 };
                            thread::sleep(Duration::from_millis(sleep_ms));
                        } else {
                            written += n;
                        }
                    }
                }
                Ok(None) => {
                    // Let the output callback drain what is buffered.
                    while ring.lock().available_read() > 0 {
                        if self.superseded() {
                            return;
                        }
                        thread::sleep(Duration::from_millis(10));
                    }
                    self.shared.playing.store(false, Ordering::SeqCst);
                    if !self.superseded() {
                        log::info!("playback of {} completed", self.locator);
                        if let Some(listener) = self.shared.listener() {
                            listener.on_complete(&self.locator);
                        }
                    }
                    return;
                }
                Err(err) => {
                    self.fail(err);
                    return;
                }
            }
        }
    }
}
