//! Local playback through cpal.
//!
//! [`NativeBackend`] is the [`MediaBackend`] used outside tests. It runs one
//! thread that owns the output stream and decodes ahead of it:
//! - Decodes the current file with symphonia
//! - Resamples to the device rate and remixes to the device channel count
//! - Hands chunks to the output callback over a bounded channel
//! - Moves to the next loaded file at end of stream and reports it
//!
//! Every load, seek and stop bumps a generation counter. Chunks carry the
//! generation they were decoded under and the callback drops stale ones, so
//! a reload is heard immediately.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{
    Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded, unbounded,
};
use parking_lot::RwLock;

use super::PlayerError;
use super::backend::{BackendEvent, BackendEventSender, MediaBackend};
use super::decoder::AudioDecoder;
use super::resampler::AudioResampler;
use crate::config::AudioConfig;
use crate::model::Track;

/// Chunks buffered between the decoder and the output callback.
const BUFFERED_CHUNKS: usize = 8;

/// How long the decoder waits for commands while the output catches up.
const BACKOFF: Duration = Duration::from_millis(10);

/// A chunk of decoded audio, already at the device rate and channel count.
struct AudioChunk {
    samples: Vec<f32>,
    position_ms: i64,
    generation: u64,
}

/// State shared by the backend handle, the decoder thread and the callback.
#[derive(Debug, Default)]
struct SharedPlayback {
    position_ms: i64,
    duration_ms: i64,
    item_index: Option<usize>,
    playing: bool,
    generation: u64,
    volume: f32,
}

enum WorkerCommand {
    Attach(BackendEventSender),
    Load {
        paths: Vec<PathBuf>,
        start_index: usize,
        start_position_ms: i64,
        generation: u64,
    },
    Play,
    Pause,
    Stop {
        generation: u64,
    },
    Seek {
        position_ms: i64,
        generation: u64,
    },
    Shutdown,
}

/// Plays files from `Track::audio_ref` on a local output device.
pub struct NativeBackend {
    commands: Sender<WorkerCommand>,
    shared: Arc<RwLock<SharedPlayback>>,
    worker: Option<JoinHandle<()>>,
}

impl NativeBackend {
    /// Open the configured output device, falling back to the default.
    pub fn new(config: &AudioConfig) -> Result<Self, PlayerError> {
        let shared = Arc::new(RwLock::new(SharedPlayback {
            volume: config.volume.clamp(0.0, 1.0),
            ..Default::default()
        }));
        let (commands, command_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);

        let device_name = config.output_device.clone();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("audio-decoder".to_string())
            .spawn(move || worker_main(&device_name, command_rx, worker_shared, ready_tx))
            .map_err(|e| PlayerError::AudioInit(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                commands,
                shared,
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(PlayerError::AudioInit("Audio thread exited".to_string()))
            }
        }
    }

    fn send(&self, command: WorkerCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!(target: "player::native", "Audio thread is gone");
        }
    }

    /// Bump the generation and apply `update` under the same lock.
    fn next_generation(&self, update: impl FnOnce(&mut SharedPlayback)) -> u64 {
        let mut shared = self.shared.write();
        shared.generation = shared.generation.wrapping_add(1);
        update(&mut shared);
        shared.generation
    }
}

impl MediaBackend for NativeBackend {
    fn attach(&mut self, events: BackendEventSender) {
        self.send(WorkerCommand::Attach(events));
    }

    fn set_queue(&mut self, items: &[Track], start_index: usize, start_position_ms: i64) {
        let start_position_ms = start_position_ms.max(0);
        let generation = self.next_generation(|shared| {
            shared.item_index = (start_index < items.len()).then_some(start_index);
            shared.position_ms = start_position_ms;
            shared.duration_ms = items.get(start_index).map_or(0, |t| t.duration_ms);
        });
        self.send(WorkerCommand::Load {
            paths: items.iter().map(|t| PathBuf::from(&t.audio_ref)).collect(),
            start_index,
            start_position_ms,
            generation,
        });
    }

    fn play(&mut self) {
        self.send(WorkerCommand::Play);
    }

    fn pause(&mut self) {
        self.send(WorkerCommand::Pause);
    }

    fn stop(&mut self) {
        let generation = self.next_generation(|shared| {
            shared.item_index = None;
            shared.position_ms = 0;
            shared.duration_ms = 0;
        });
        self.send(WorkerCommand::Stop { generation });
    }

    fn seek_to(&mut self, position_ms: i64) {
        let position_ms = position_ms.max(0);
        let generation = self.next_generation(|shared| shared.position_ms = position_ms);
        self.send(WorkerCommand::Seek {
            position_ms,
            generation,
        });
    }

    fn current_position_ms(&self) -> i64 {
        self.shared.read().position_ms
    }

    fn current_item_index(&self) -> Option<usize> {
        self.shared.read().item_index
    }

    fn duration_ms(&self) -> i64 {
        self.shared.read().duration_ms
    }
}

impl Drop for NativeBackend {
    fn drop(&mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!(target: "player::native", "Audio thread panicked");
            }
        }
    }
}

/// List available audio output devices.
pub fn list_audio_devices() -> Vec<String> {
    let host = cpal::default_host();
    host.output_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// Name of the current default output device.
pub fn current_audio_device() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| d.name().ok())
}

fn select_device(host: &cpal::Host, name: &str) -> Result<Device, PlayerError> {
    if !name.is_empty() {
        let found = host
            .output_devices()
            .map_err(|e| PlayerError::AudioInit(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == name));
        match found {
            Some(device) => return Ok(device),
            None => {
                tracing::warn!(target: "player::native", device = name, "Output device not found, using default")
            }
        }
    }
    host.default_output_device()
        .ok_or_else(|| PlayerError::AudioInit("No output device available".to_string()))
}

fn open_output(
    device_name: &str,
    audio_rx: Receiver<AudioChunk>,
    shared: Arc<RwLock<SharedPlayback>>,
) -> Result<(Stream, u32, usize), PlayerError> {
    let host = cpal::default_host();
    let device = select_device(&host, device_name)?;
    let supported = device
        .default_output_config()
        .map_err(|e| PlayerError::AudioInit(e.to_string()))?;

    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    tracing::info!(
        target: "player::native",
        device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
        sample_rate,
        channels,
        "Opened audio output"
    );

    let config = StreamConfig {
        channels,
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, audio_rx, shared),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, audio_rx, shared),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, audio_rx, shared),
        format => {
            return Err(PlayerError::AudioInit(format!(
                "Unsupported sample format: {:?}",
                format
            )));
        }
    }?;
    stream
        .play()
        .map_err(|e| PlayerError::AudioInit(e.to_string()))?;

    Ok((stream, sample_rate, channels as usize))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    audio_rx: Receiver<AudioChunk>,
    shared: Arc<RwLock<SharedPlayback>>,
) -> Result<Stream, PlayerError>
where
    T: cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let silence = T::from_sample(0.0f32);
    let mut current: Option<(AudioChunk, usize)> = None;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let (playing, generation, volume) = {
                    let s = shared.read();
                    (s.playing, s.generation, s.volume)
                };
                if !playing {
                    data.fill(silence);
                    return;
                }

                let mut written = 0;
                while written < data.len() {
                    if current
                        .as_ref()
                        .is_some_and(|(chunk, _)| chunk.generation != generation)
                    {
                        current = None;
                    }

                    let Some((chunk, offset)) = current.as_mut() else {
                        match audio_rx.try_recv() {
                            Ok(chunk) if chunk.generation != generation => continue,
                            Ok(chunk) => {
                                {
                                    let mut s = shared.write();
                                    if s.generation == generation {
                                        s.position_ms = chunk.position_ms;
                                    }
                                }
                                current = Some((chunk, 0));
                                continue;
                            }
                            Err(_) => {
                                // Underrun
                                data[written..].fill(silence);
                                return;
                            }
                        }
                    };

                    let available = chunk.samples.len() - *offset;
                    let count = available.min(data.len() - written);
                    for (out, sample) in data[written..written + count]
                        .iter_mut()
                        .zip(&chunk.samples[*offset..*offset + count])
                    {
                        *out = T::from_sample(sample * volume);
                    }
                    written += count;
                    *offset += count;
                    if *offset >= chunk.samples.len() {
                        current = None;
                    }
                }
            },
            |err| tracing::error!(target: "player::native", error = %err, "Audio stream error"),
            None,
        )
        .map_err(|e| PlayerError::AudioInit(e.to_string()))
}

fn worker_main(
    device_name: &str,
    commands: Receiver<WorkerCommand>,
    shared: Arc<RwLock<SharedPlayback>>,
    ready: Sender<Result<(), PlayerError>>,
) {
    let (audio_tx, audio_rx) = bounded::<AudioChunk>(BUFFERED_CHUNKS);
    let purge = audio_rx.clone();

    // The stream lives on this thread for as long as the backend does
    let (_stream, sample_rate, channels) =
        match open_output(device_name, audio_rx, Arc::clone(&shared)) {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(target: "player::native", error = %e, "Failed to open audio output");
                let _ = ready.send(Err(e));
                return;
            }
        };
    let _ = ready.send(Ok(()));

    Worker::new(commands, shared, audio_tx, purge, sample_rate, channels).run();
    tracing::debug!(target: "player::native", "Audio thread stopped");
}

/// Decoder side of the backend. Only the worker changes `playing`.
struct Worker {
    commands: Receiver<WorkerCommand>,
    shared: Arc<RwLock<SharedPlayback>>,
    audio_tx: Sender<AudioChunk>,
    /// Receiving end used to discard buffered chunks on reload
    purge: Receiver<AudioChunk>,
    events: Option<BackendEventSender>,
    output_rate: u32,
    output_channels: usize,
    paths: Vec<PathBuf>,
    index: usize,
    generation: u64,
    decoder: Option<AudioDecoder>,
    resampler: Option<AudioResampler>,
    /// Decoded chunk the output had no room for yet
    pending: Option<AudioChunk>,
    playing: bool,
    /// Last item fully decoded; waiting for the buffer to play out
    ending: bool,
}

impl Worker {
    fn new(
        commands: Receiver<WorkerCommand>,
        shared: Arc<RwLock<SharedPlayback>>,
        audio_tx: Sender<AudioChunk>,
        purge: Receiver<AudioChunk>,
        output_rate: u32,
        output_channels: usize,
    ) -> Self {
        Self {
            commands,
            shared,
            audio_tx,
            purge,
            events: None,
            output_rate,
            output_channels: output_channels.max(1),
            paths: Vec::new(),
            index: 0,
            generation: 0,
            decoder: None,
            resampler: None,
            pending: None,
            playing: false,
            ending: false,
        }
    }

    fn run(mut self) {
        loop {
            let active = self.playing && (self.decoder.is_some() || self.ending);
            let command = if !active {
                // Idle: block until told otherwise
                match self.commands.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                }
            } else if self.ending || self.pending.is_some() || self.audio_tx.is_full() {
                match self.commands.recv_timeout(BACKOFF) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match self.commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            };

            if let Some(command) = command {
                if !self.handle(command) {
                    break;
                }
                continue;
            }

            if let Some(chunk) = self.pending.take() {
                self.send_chunk(chunk);
            } else if self.ending {
                if self.audio_tx.is_empty() {
                    self.finish();
                }
            } else if !self.audio_tx.is_full() {
                self.decode_step();
            }
        }
    }

    /// Returns false on shutdown.
    fn handle(&mut self, command: WorkerCommand) -> bool {
        match command {
            WorkerCommand::Attach(events) => self.events = Some(events),
            WorkerCommand::Load {
                paths,
                start_index,
                start_position_ms,
                generation,
            } => {
                self.generation = generation;
                self.discard_buffered();
                // A fresh load waits for play
                self.playing = false;
                self.shared.write().playing = false;
                self.paths = paths;
                self.index = start_index;
                self.open_current(start_position_ms);
            }
            WorkerCommand::Play => {
                if self.decoder.is_some() || self.ending {
                    self.set_playing(true);
                }
            }
            WorkerCommand::Pause => self.set_playing(false),
            WorkerCommand::Stop { generation } => {
                self.generation = generation;
                self.discard_buffered();
                self.paths.clear();
                self.set_playing(false);
            }
            WorkerCommand::Seek {
                position_ms,
                generation,
            } => {
                self.generation = generation;
                self.seek(position_ms);
            }
            WorkerCommand::Shutdown => return false,
        }
        true
    }

    fn discard_buffered(&mut self) {
        self.pending = None;
        while self.purge.try_recv().is_ok() {}
        self.decoder = None;
        self.resampler = None;
        self.ending = false;
    }

    fn seek(&mut self, position_ms: i64) {
        self.pending = None;
        while self.purge.try_recv().is_ok() {}
        self.ending = false;
        let Some(decoder) = self.decoder.as_mut() else {
            // Past the end of the last item; reopen it
            self.open_current(position_ms);
            return;
        };

        match decoder.seek(Duration::from_millis(position_ms.max(0) as u64)) {
            Ok(actual) => {
                if let Some(resampler) = self.resampler.as_mut() {
                    resampler.reset();
                }
                let mut shared = self.shared.write();
                if shared.generation == self.generation {
                    shared.position_ms = actual.as_millis() as i64;
                }
            }
            Err(e) => tracing::warn!(target: "player::native", error = %e, "Seek failed"),
        }
    }

    /// Open `paths[index]`, optionally starting part way in.
    fn open_current(&mut self, start_position_ms: i64) -> bool {
        let Some(path) = self.paths.get(self.index).cloned() else {
            return false;
        };

        let mut decoder = match AudioDecoder::open(&path) {
            Ok(decoder) => decoder,
            Err(e) => {
                self.fail(e.to_string());
                return false;
            }
        };
        if start_position_ms > 0 {
            if let Err(e) = decoder.seek(Duration::from_millis(start_position_ms as u64)) {
                tracing::warn!(target: "player::native", error = %e, "Could not start part way in");
            }
        }
        let resampler = match AudioResampler::new(
            decoder.sample_rate(),
            self.output_rate,
            decoder.channels() as usize,
        ) {
            Ok(resampler) => resampler,
            Err(e) => {
                self.fail(e.to_string());
                return false;
            }
        };

        let duration_ms = decoder.duration().as_millis() as i64;
        {
            let mut shared = self.shared.write();
            if shared.generation == self.generation && duration_ms > 0 {
                shared.duration_ms = duration_ms;
            }
        }
        tracing::debug!(target: "player::native", path = %path.display(), duration_ms, "Opened");

        self.decoder = Some(decoder);
        self.resampler = Some(resampler);
        true
    }

    fn decode_step(&mut self) {
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        match decoder.next_chunk() {
            Ok(Some(chunk)) => {
                let position_ms = chunk.timestamp.as_millis() as i64;
                let input_rate = decoder.sample_rate();
                if self
                    .resampler
                    .as_ref()
                    .is_none_or(|r| r.channels() != chunk.channels)
                {
                    self.resampler =
                        AudioResampler::new(input_rate, self.output_rate, chunk.channels).ok();
                }
                let samples = match self.resampler.as_mut() {
                    Some(resampler) => resampler.process(&chunk.samples),
                    None => chunk.samples,
                };
                self.push(samples, chunk.channels, position_ms);
            }
            Ok(None) => self.end_of_item(),
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn push(&mut self, samples: Vec<f32>, channels: usize, position_ms: i64) {
        let samples = remix(samples, channels, self.output_channels);
        if samples.is_empty() {
            return;
        }
        self.send_chunk(AudioChunk {
            samples,
            position_ms,
            generation: self.generation,
        });
    }

    /// Hand a chunk to the output, holding on to it while the buffer is full.
    fn send_chunk(&mut self, chunk: AudioChunk) {
        match self.audio_tx.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(chunk)) => self.pending = Some(chunk),
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!(target: "player::native", "Audio output is gone");
            }
        }
    }

    fn end_of_item(&mut self) {
        if let Some(mut resampler) = self.resampler.take() {
            let tail = resampler.flush();
            let position_ms = self.shared.read().position_ms;
            self.push(tail, resampler.channels(), position_ms);
        }
        self.decoder = None;

        if self.index + 1 >= self.paths.len() {
            self.ending = true;
            return;
        }

        // Gapless: keep the buffered tail and start decoding the next item
        self.index += 1;
        if self.open_current(0) {
            let current = {
                let mut shared = self.shared.write();
                let current = shared.generation == self.generation;
                if current {
                    shared.item_index = Some(self.index);
                }
                current
            };
            if current {
                self.emit(BackendEvent::ItemTransitioned(self.index));
            }
        }
    }

    /// Everything has played out.
    fn finish(&mut self) {
        self.ending = false;
        let current = {
            let mut shared = self.shared.write();
            let current = shared.generation == self.generation;
            if current {
                shared.item_index = None;
            }
            current
        };
        self.set_playing(false);
        if current {
            self.emit(BackendEvent::PlaybackEnded);
        }
    }

    fn fail(&mut self, message: String) {
        tracing::warn!(target: "player::native", error = %message, "Playback failed");
        self.decoder = None;
        self.resampler = None;
        self.pending = None;
        self.ending = false;
        self.playing = false;
        let current = {
            let mut shared = self.shared.write();
            shared.playing = false;
            let current = shared.generation == self.generation;
            if current {
                shared.item_index = None;
            }
            current
        };
        // A superseded load fails silently
        if current {
            self.emit(BackendEvent::Error(message));
        }
    }

    fn set_playing(&mut self, playing: bool) {
        if self.playing == playing {
            return;
        }
        self.playing = playing;
        self.shared.write().playing = playing;
        self.emit(BackendEvent::PlayingChanged(playing));
    }

    fn emit(&self, event: BackendEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Map interleaved audio from `from` channels to `to` channels.
///
/// Mono output averages; otherwise extra output channels repeat the input.
fn remix(samples: Vec<f32>, from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples;
    }
    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            out.extend((0..to).map(|c| frame[c % from]));
        }
    }
    out
}
