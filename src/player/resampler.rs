//! Sample rate conversion with rubato.
//!
//! Files are decoded at their own rate; the output device runs at its own.
//! Without conversion a 44.1 kHz track on a 48 kHz device plays fast.

use rubato::{FftFixedIn, Resampler};

use super::PlayerError;

/// Frames fed to rubato per call.
const CHUNK_FRAMES: usize = 1024;

/// Interleaved-in, interleaved-out resampler. Passes audio through when the
/// rates already match.
pub struct AudioResampler {
    inner: Option<FftFixedIn<f32>>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    /// Per-channel input waiting for a full chunk
    pending: Vec<Vec<f32>>,
}

impl AudioResampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self, PlayerError> {
        let channels = channels.max(1);
        let inner = if input_rate == output_rate {
            None
        } else {
            let resampler = FftFixedIn::<f32>::new(
                input_rate as usize,
                output_rate as usize,
                CHUNK_FRAMES,
                2,
                channels,
            )
            .map_err(|e| PlayerError::AudioInit(format!("Resampler: {}", e)))?;
            tracing::debug!(
                target: "player::native",
                input_rate,
                output_rate,
                channels,
                "Resampling enabled"
            );
            Some(resampler)
        };

        Ok(Self {
            inner,
            input_rate,
            output_rate,
            channels,
            pending: vec![Vec::new(); channels],
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    pub fn ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64
    }

    /// Resample interleaved input. Output may lag input by up to one chunk.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let Some(inner) = self.inner.as_mut() else {
            return input.to_vec();
        };

        for frame in input.chunks_exact(self.channels) {
            for (pending, sample) in self.pending.iter_mut().zip(frame) {
                pending.push(*sample);
            }
        }

        let mut output = Vec::new();
        while self.pending[0].len() >= CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|p| p.drain(..CHUNK_FRAMES).collect())
                .collect();
            match inner.process(&chunk, None) {
                Ok(planes) => interleave_into(&planes, usize::MAX, &mut output),
                Err(e) => {
                    tracing::warn!(target: "player::native", error = %e, "Resampling failed")
                }
            }
        }
        output
    }

    /// Drain buffered input at end of stream, zero-padding the last chunk.
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(inner) = self.inner.as_mut() else {
            return Vec::new();
        };
        let remaining = self.pending[0].len();
        if remaining == 0 {
            return Vec::new();
        }

        let chunk: Vec<Vec<f32>> = self
            .pending
            .iter_mut()
            .map(|p| {
                let mut plane = std::mem::take(p);
                plane.resize(CHUNK_FRAMES, 0.0);
                plane
            })
            .collect();

        let keep = (remaining as f64 * self.output_rate as f64 / self.input_rate as f64).ceil()
            as usize;
        let mut output = Vec::new();
        match inner.process(&chunk, None) {
            Ok(planes) => interleave_into(&planes, keep, &mut output),
            Err(e) => {
                tracing::warn!(target: "player::native", error = %e, "Resampler flush failed")
            }
        }
        output
    }

    /// Drop buffered input and filter state, e.g. after a seek.
    pub fn reset(&mut self) {
        self.pending.iter_mut().for_each(Vec::clear);
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
    }
}

fn interleave_into(planes: &[Vec<f32>], max_frames: usize, output: &mut Vec<f32>) {
    let frames = planes.first().map_or(0, |p| p.len()).min(max_frames);
    output.reserve(frames * planes.len());
    for frame in 0..frames {
        output.extend(planes.iter().map(|plane| plane[frame]));
    }
}
