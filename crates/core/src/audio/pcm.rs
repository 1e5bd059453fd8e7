use rubato::{FftFixedIn, Resampler};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const RESAMPLE_CHUNK: usize = 1024;
const RESAMPLE_SUB_CHUNKS: usize = 2;

#[derive(thiserror::Error, Debug)]
pub enum ConvertError {
    #[error("failed to build resampler: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),
}

/// Interleaved f32 PCM.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PcmClip {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl PcmClip {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    pub fn empty(sample_rate: u32, channels: u16) -> Self {
        Self::new(sample_rate, channels, Vec::new())
    }

    pub fn silence(sample_rate: u32, channels: u16, duration: Duration) -> Self {
        let frames = frames_for_duration(sample_rate, duration);
        Self::new(
            sample_rate,
            channels,
            vec![0.0; frames * usize::from(channels)],
        )
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / usize::from(self.channels)
    }

    pub fn duration(&self) -> Duration {
        duration_from_frames(self.sample_rate, self.frames())
    }

    pub fn same_format(&self, other: &PcmClip) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }

    /// Appends `other`, which must already be in this clip's format.
    pub fn append(&mut self, other: &PcmClip) {
        debug_assert!(self.same_format(other));
        self.samples.extend_from_slice(&other.samples);
    }

    /// Returns this clip remixed to `channels` and resampled to `sample_rate`.
    /// The frame count scales with the rate, so duration is kept.
    pub fn converted(self, sample_rate: u32, channels: u16) -> Result<PcmClip, ConvertError> {
        resample(remix(self, channels), sample_rate)
    }

    pub fn to_f32le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 4);
        for s in &self.samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }
}

pub fn frames_for_duration(sample_rate_hz: u32, duration: Duration) -> usize {
    let frames = u128::from(sample_rate_hz) * duration.as_micros() / 1_000_000;
    usize::try_from(frames).unwrap_or(usize::MAX)
}

pub fn duration_from_frames(sample_rate_hz: u32, frames: usize) -> Duration {
    if sample_rate_hz == 0 {
        return Duration::from_secs(0);
    }
    let micros = (u128::from(frames as u64) * 1_000_000u128) / u128::from(sample_rate_hz);
    Duration::from_micros(micros.min(u128::from(u64::MAX)) as u64)
}

fn remix(clip: PcmClip, channels: u16) -> PcmClip {
    if clip.channels == channels || clip.channels == 0 || channels == 0 {
        return PcmClip { channels, ..clip };
    }
    let in_ch = usize::from(clip.channels);
    let out_ch = usize::from(channels);
    let mut out = Vec::with_capacity(clip.frames() * out_ch);

    for frame in clip.samples.chunks_exact(in_ch) {
        if in_ch == 1 {
            out.extend(std::iter::repeat(frame[0]).take(out_ch));
        } else if out_ch == 1 {
            out.push(frame.iter().sum::<f32>() / in_ch as f32);
        } else {
            out.extend((0..out_ch).map(|ch| frame[ch.min(in_ch - 1)]));
        }
    }

    PcmClip::new(clip.sample_rate, channels, out)
}

fn resample(clip: PcmClip, sample_rate: u32) -> Result<PcmClip, ConvertError> {
    let in_frames = clip.frames();
    if clip.sample_rate == sample_rate || clip.sample_rate == 0 || sample_rate == 0 {
        return Ok(PcmClip {
            sample_rate,
            ..clip
        });
    }
    if in_frames == 0 {
        return Ok(PcmClip::empty(sample_rate, clip.channels));
    }

    let ch = usize::from(clip.channels);
    let mut resampler = FftFixedIn::<f32>::new(
        clip.sample_rate as usize,
        sample_rate as usize,
        RESAMPLE_CHUNK,
        RESAMPLE_SUB_CHUNKS,
        ch,
    )?;

    let planar: Vec<Vec<f32>> = (0..ch)
        .map(|c| clip.samples.iter().skip(c).step_by(ch).copied().collect())
        .collect();
    let wanted = (u128::from(in_frames as u64) * u128::from(sample_rate)
        / u128::from(clip.sample_rate)) as usize;
    let delay = resampler.output_delay();
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(wanted + delay + RESAMPLE_CHUNK); ch];

    let mut pos = 0;
    while in_frames - pos >= resampler.input_frames_next() {
        let end = pos + resampler.input_frames_next();
        let block: Vec<&[f32]> = planar.iter().map(|c| &c[pos..end]).collect();
        extend_planar(&mut out, resampler.process(&block, None)?);
        pos = end;
    }
    if pos < in_frames {
        let block: Vec<&[f32]> = planar.iter().map(|c| &c[pos..]).collect();
        extend_planar(&mut out, resampler.process_partial(Some(block.as_slice()), None)?);
    }
    // flush the filter tail until the delayed output covers the whole clip
    while out[0].len() < delay + wanted {
        let tail = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
        if tail[0].is_empty() {
            break;
        }
        extend_planar(&mut out, tail);
    }

    let mut samples = Vec::with_capacity(wanted * ch);
    for i in delay..(delay + wanted).min(out[0].len()) {
        samples.extend(out.iter().map(|c| c[i]));
    }
    Ok(PcmClip::new(sample_rate, clip.channels, samples))
}

fn extend_planar(out: &mut [Vec<f32>], block: Vec<Vec<f32>>) {
    for (dst, src) in out.iter_mut().zip(block) {
        dst.extend(src);
    }
}
