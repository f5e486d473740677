use anyhow::{anyhow, bail, Context, Result};
use log::warn;
use rubato::{FftFixedIn, Resampler};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decoded PCM audio, interleaved when `channels > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// One point of a peak envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformPoint {
    pub time_secs: f64,
    pub peak: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub sample_rate: u32,
    pub duration_secs: f64,
    pub points: Vec<WaveformPoint>,
}

pub fn db_to_amplitude(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

impl AudioClip {
    pub fn silence(duration_secs: f64, sample_rate: u32, channels: u16) -> Self {
        let frames = (duration_secs.max(0.0) * sample_rate as f64).round() as usize;
        Self {
            samples: vec![0.0; frames * channels as usize],
            sample_rate,
            channels,
        }
    }

    /// Wraps raw little-endian signed 16-bit PCM, as returned by providers
    /// asked for a `pcm_*` output format.
    pub fn from_pcm16_le(bytes: &[u8], sample_rate: u32, channels: u16) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect();
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).context("Not a WAV file")?;
        let spec = reader.spec();
        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        })
    }

    /// Decodes any container symphonia knows (mp3, flac, ogg, wav).
    /// `extension` only hints at the format; the bytes decide.
    pub fn decode(bytes: &[u8], extension: Option<&str>) -> Result<Self> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
        let mut hint = Hint::new();
        if let Some(extension) = extension {
            hint.with_extension(extension);
        }
        let mut format = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("Unsupported audio file")?
            .format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| anyhow!("No audio track found"))?;
        let track_id = track.id;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("Unsupported audio codec")?;

        let mut samples = Vec::new();
        let mut layout: Option<(u32, u16)> = None;
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e).context("Failed to read audio packet"),
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e).context("Failed to decode audio"),
            };
            let spec = *decoded.spec();
            layout.get_or_insert((spec.rate, spec.channels.count() as u16));
            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buffer.samples());
        }

        let Some((sample_rate, channels)) = layout else {
            bail!("Audio file holds no samples");
        };
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Encodes as 16-bit PCM WAV.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for sample in &self.samples {
                let clamped = sample.clamp(-1.0, 1.0);
                writer.write_sample((clamped * i16::MAX as f32) as i16)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn apply_gain_db(&mut self, db: f32) {
        if db == 0.0 {
            return;
        }
        let factor = db_to_amplitude(db);
        for s in &mut self.samples {
            *s *= factor;
        }
    }

    pub fn with_gain_db(&self, db: f32) -> Self {
        let mut out = self.clone();
        out.apply_gain_db(db);
        out
    }

    fn same_format(&self, other: &AudioClip) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }

    pub fn append(&mut self, other: &AudioClip) -> Result<()> {
        if !self.same_format(other) {
            return Err(anyhow!(
                "Audio format mismatch: {} Hz/{} ch vs {} Hz/{} ch. All segments must have same sample rate/channels.",
                self.sample_rate,
                self.channels,
                other.sample_rate,
                other.channels
            ));
        }
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }

    pub fn repeat(&self, count: u32) -> Self {
        let mut samples = Vec::with_capacity(self.samples.len() * count as usize);
        for _ in 0..count {
            samples.extend_from_slice(&self.samples);
        }
        Self {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Converts to another rate/channel layout. Channels are averaged down
    /// to mono or duplicated up; the rate goes through an FFT resampler.
    pub fn conform(&self, sample_rate: u32, channels: u16) -> Result<Self> {
        if self.sample_rate == sample_rate && self.channels == channels {
            return Ok(self.clone());
        }

        let src_ch = self.channels.max(1) as usize;
        let mono: Vec<f32> = self
            .samples
            .chunks(src_ch)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        let resampled = if self.sample_rate == sample_rate || mono.is_empty() {
            mono
        } else {
            resample(&mono, self.sample_rate, sample_rate)?
        };

        let mut samples = Vec::with_capacity(resampled.len() * channels as usize);
        for s in resampled {
            for _ in 0..channels {
                samples.push(s);
            }
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Mixes `other` on top of this clip starting `offset_secs` in. The
    /// result keeps this clip's length; whatever would run past it is cut.
    pub fn overlay(&self, other: &AudioClip, offset_secs: f64) -> Result<Self> {
        let other = other.conform(self.sample_rate, self.channels)?;
        let mut out = self.clone();
        let start = (offset_secs.max(0.0) * self.sample_rate as f64).round() as usize
            * self.channels as usize;
        if start >= out.samples.len() {
            return Ok(out);
        }
        for (dst, src) in out.samples[start..].iter_mut().zip(other.samples.iter()) {
            *dst += *src;
        }
        Ok(out)
    }

    /// Loops or truncates to exactly `frames` frames.
    pub fn fit_to_frames(&self, frames: usize) -> Self {
        let target = frames * self.channels as usize;
        let samples = if self.samples.is_empty() {
            vec![0.0; target]
        } else {
            self.samples.iter().copied().cycle().take(target).collect()
        };
        Self {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    pub fn fade_in(&mut self, duration_secs: f64) {
        let fade_frames = self.fade_frames(duration_secs);
        let ch = self.channels as usize;
        for frame in 0..fade_frames {
            let gain = frame as f32 / fade_frames as f32;
            for c in 0..ch {
                self.samples[frame * ch + c] *= gain;
            }
        }
    }

    pub fn fade_out(&mut self, duration_secs: f64) {
        let fade_frames = self.fade_frames(duration_secs);
        let ch = self.channels as usize;
        let total = self.frames();
        for i in 0..fade_frames {
            let frame = total - fade_frames + i;
            let gain = (fade_frames - i) as f32 / fade_frames as f32;
            for c in 0..ch {
                self.samples[frame * ch + c] *= gain;
            }
        }
    }

    fn fade_frames(&self, duration_secs: f64) -> usize {
        let frames = (duration_secs.max(0.0) * self.sample_rate as f64).round() as usize;
        frames.min(self.frames())
    }

    /// Peak envelope with `points` buckets. Bucket times come from this
    /// clip's sample rate.
    pub fn waveform(&self, points: usize) -> Waveform {
        let frames = self.frames();
        let ch = self.channels.max(1) as usize;
        let buckets = points.max(1).min(frames.max(1));
        let per_bucket = frames.div_ceil(buckets).max(1);

        let mut out = Vec::with_capacity(buckets);
        let mut start = 0;
        while start < frames {
            let end = (start + per_bucket).min(frames);
            let peak = self.samples[start * ch..end * ch]
                .iter()
                .fold(0f32, |acc, s| acc.max(s.abs()));
            out.push(WaveformPoint {
                time_secs: start as f64 / self.sample_rate as f64,
                peak,
            });
            start = end;
        }

        Waveform {
            sample_rate: self.sample_rate,
            duration_secs: self.duration_secs(),
            points: out,
        }
    }
}

const RESAMPLE_CHUNK: usize = 1024;

/// Mono rate conversion with rubato's FFT resampler. The output is trimmed
/// of the resampler delay and holds exactly `len * to / from` frames.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    let mut resampler = FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
        .context("Failed to create resampler")?;
    let expected = (samples.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let delay = resampler.output_delay();
    let chunk_size = resampler.input_frames_next();
    let mut out = Vec::with_capacity(expected + delay + resampler.output_frames_max());

    let mut chunks = samples.chunks_exact(chunk_size);
    for chunk in &mut chunks {
        let frames = resampler.process(&[chunk], None).context("Resampling failed")?;
        out.extend_from_slice(&frames[0]);
    }
    let tail = [chunks.remainder()];
    let frames = resampler
        .process_partial(Some(&tail[..]), None)
        .context("Resampling failed")?;
    out.extend_from_slice(&frames[0]);
    // flush the delay line
    while out.len() < expected + delay {
        let frames = resampler
            .process_partial::<&[f32]>(None, None)
            .context("Resampling failed")?;
        out.extend_from_slice(&frames[0]);
    }

    Ok(out.into_iter().skip(delay).take(expected).collect())
}

/// Concatenates clips with `gap_secs` of silence between neighbours.
pub fn concat_with_gaps(clips: &[AudioClip], gap_secs: f64) -> Result<AudioClip> {
    let first = clips
        .first()
        .ok_or_else(|| anyhow!("No audio clips to join"))?;
    let gap = AudioClip::silence(gap_secs, first.sample_rate, first.channels);
    let mut out = first.clone();
    for clip in &clips[1..] {
        out.append(&gap)?;
        out.append(clip)?;
    }
    Ok(out)
}
