//! Decoded PCM segments and ordered audio assembly.
//!
//! Synthesized batches come back either as self-describing WAV
//! containers or as raw PCM with no header; raw payloads are assumed to
//! be single-channel 24 kHz, 16-bit little-endian. Assembly forces
//! every segment to stereo, inserts a fixed silence gap between
//! consecutive segments, and concatenates in input order.

use std::io::Cursor;
use std::path::Path;

use thiserror::Error;

/// Sample rate assumed for raw PCM payloads without a container.
pub const FALLBACK_SAMPLE_RATE: u32 = 24_000;

/// All decoded audio is 16-bit.
pub const BITS_PER_SAMPLE: u16 = 16;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio segments to assemble")]
    Empty,

    #[error("unsupported channel count: {0}")]
    UnsupportedChannels(u16),

    #[error("segments disagree on sample rate: {0} Hz vs {1} Hz")]
    SampleRateMismatch(u32, u32),

    #[error("unsupported WAV encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("raw PCM payload ends with a partial sample")]
    TruncatedPcm,

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded PCM audio for one synthesized batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved 16-bit samples
    pub samples: Vec<i16>,
}

impl AudioSegment {
    /// A silent segment of the given duration.
    pub fn silence(duration_ms: u64, sample_rate: u32, channels: u16) -> Self {
        let frames = (u64::from(sample_rate) * duration_ms / 1000) as usize;
        Self {
            sample_rate,
            channels,
            samples: vec![0; frames * channels as usize],
        }
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Force the segment to two channels. Mono is duplicated onto both
    /// channels; anything beyond stereo is rejected.
    pub fn into_stereo(self) -> Result<Self, AudioError> {
        match self.channels {
            2 => Ok(self),
            1 => {
                let mut samples = Vec::with_capacity(self.samples.len() * 2);
                for s in self.samples {
                    samples.push(s);
                    samples.push(s);
                }
                Ok(Self {
                    sample_rate: self.sample_rate,
                    channels: 2,
                    samples,
                })
            }
            other => Err(AudioError::UnsupportedChannels(other)),
        }
    }
}

/// Decode a synthesized audio payload according to its declared format.
///
/// WAV mime types go through the container reader; anything else is
/// treated as headerless mono PCM at the fallback rate.
pub fn decode_segment(bytes: &[u8], mime_type: &str) -> Result<AudioSegment, AudioError> {
    let base_type = mime_type.split(';').next().unwrap_or(mime_type).trim();
    match base_type {
        "audio/wav" | "audio/x-wav" | "audio/wave" => decode_wav(bytes),
        _ => decode_raw_pcm(bytes),
    }
}

fn decode_wav(bytes: &[u8]) -> Result<AudioSegment, AudioError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != BITS_PER_SAMPLE {
        return Err(AudioError::UnsupportedEncoding(format!(
            "{:?} {} bit",
            spec.sample_format, spec.bits_per_sample
        )));
    }

    let samples: Vec<i16> = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;

    Ok(AudioSegment {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        samples,
    })
}

fn decode_raw_pcm(bytes: &[u8]) -> Result<AudioSegment, AudioError> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::TruncatedPcm);
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(AudioSegment {
        sample_rate: FALLBACK_SAMPLE_RATE,
        channels: 1,
        samples,
    })
}

/// Concatenate segments in order with a fixed silence gap between
/// consecutive segments, forcing stereo output.
///
/// Output duration is the sum of segment durations plus
/// `(N-1) * silence_ms` for N segments. An empty input is an error;
/// there is nothing sensible to produce.
pub fn assemble(segments: Vec<AudioSegment>, silence_ms: u64) -> Result<AudioSegment, AudioError> {
    if segments.is_empty() {
        return Err(AudioError::Empty);
    }

    let sample_rate = segments[0].sample_rate;
    let silence = AudioSegment::silence(silence_ms, sample_rate, 2);

    let mut combined = AudioSegment {
        sample_rate,
        channels: 2,
        samples: Vec::new(),
    };

    for (i, segment) in segments.into_iter().enumerate() {
        if segment.sample_rate != sample_rate {
            return Err(AudioError::SampleRateMismatch(
                sample_rate,
                segment.sample_rate,
            ));
        }
        if i > 0 {
            combined.samples.extend_from_slice(&silence.samples);
        }
        let stereo = segment.into_stereo()?;
        combined.samples.extend(stereo.samples);
    }

    Ok(combined)
}

/// Export a segment as a 16-bit PCM WAV file.
pub fn write_wav(path: &Path, segment: &AudioSegment) -> Result<(), AudioError> {
    let spec = hound::WavSpec {
        channels: segment.channels,
        sample_rate: segment.sample_rate,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in &segment.samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Duration of a WAV file from its frame count and frame rate.
pub fn wav_duration_seconds(path: &Path) -> Result<f64, AudioError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Ok(0.0);
    }
    Ok(f64::from(reader.duration()) / f64::from(spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_segment(frames: usize, rate: u32) -> AudioSegment {
        AudioSegment {
            sample_rate: rate,
            channels: 1,
            samples: vec![1000; frames],
        }
    }

    fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_decode_wav_payload() {
        let bytes = wav_bytes(24000, 1, &[1, 2, 3, 4]);
        let segment = decode_segment(&bytes, "audio/wav").unwrap();
        assert_eq!(segment.sample_rate, 24000);
        assert_eq!(segment.channels, 1);
        assert_eq!(segment.samples, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_wav_with_mime_parameters() {
        let bytes = wav_bytes(24000, 1, &[5, 6]);
        let segment = decode_segment(&bytes, "audio/wav; rate=24000").unwrap();
        assert_eq!(segment.samples, vec![5, 6]);
    }

    #[test]
    fn test_decode_raw_pcm_fallback() {
        // Two little-endian samples: 1 and -2
        let bytes = [0x01, 0x00, 0xFE, 0xFF];
        let segment = decode_segment(&bytes, "audio/pcm").unwrap();
        assert_eq!(segment.sample_rate, FALLBACK_SAMPLE_RATE);
        assert_eq!(segment.channels, 1);
        assert_eq!(segment.samples, vec![1, -2]);
    }

    #[test]
    fn test_decode_raw_pcm_rejects_partial_sample() {
        assert!(matches!(
            decode_segment(&[0x01, 0x00, 0xFE], "audio/pcm"),
            Err(AudioError::TruncatedPcm)
        ));
    }

    #[test]
    fn test_mono_to_stereo_duplicates_samples() {
        let stereo = mono_segment(3, 24000).into_stereo().unwrap();
        assert_eq!(stereo.channels, 2);
        assert_eq!(stereo.samples, vec![1000, 1000, 1000, 1000, 1000, 1000]);
        assert_eq!(stereo.frames(), 3);
    }

    #[test]
    fn test_assemble_empty_fails() {
        assert!(matches!(assemble(vec![], 50), Err(AudioError::Empty)));
    }

    #[test]
    fn test_assemble_duration_formula() {
        // Three 1-second mono segments at 24kHz with 50ms gaps:
        // 3.0 + 2 * 0.05 = 3.1 seconds.
        let segments = vec![
            mono_segment(24000, 24000),
            mono_segment(24000, 24000),
            mono_segment(24000, 24000),
        ];
        let combined = assemble(segments, 50).unwrap();
        assert_eq!(combined.channels, 2);
        assert!((combined.duration_seconds() - 3.1).abs() < 1e-9);
    }

    #[test]
    fn test_assemble_single_segment_has_no_gap() {
        let combined = assemble(vec![mono_segment(24000, 24000)], 50).unwrap();
        assert!((combined.duration_seconds() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_assemble_preserves_order() {
        let a = AudioSegment {
            sample_rate: 24000,
            channels: 1,
            samples: vec![1],
        };
        let b = AudioSegment {
            sample_rate: 24000,
            channels: 1,
            samples: vec![2],
        };
        let combined = assemble(vec![a, b], 0).unwrap();
        assert_eq!(combined.samples, vec![1, 1, 2, 2]);
    }

    #[test]
    fn test_assemble_rejects_mixed_rates() {
        let segments = vec![mono_segment(100, 24000), mono_segment(100, 44100)];
        assert!(matches!(
            assemble(segments, 50),
            Err(AudioError::SampleRateMismatch(24000, 44100))
        ));
    }

    #[test]
    fn test_wav_round_trip_and_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");

        // 240000 frames at 24kHz must read back as exactly 10 seconds.
        let segment = AudioSegment {
            sample_rate: 24000,
            channels: 1,
            samples: vec![0; 240_000],
        };
        write_wav(&path, &segment).unwrap();

        let duration = wav_duration_seconds(&path).unwrap();
        assert_eq!(duration, 10.0);
    }

    #[test]
    fn test_silence_frame_count() {
        let silence = AudioSegment::silence(50, 24000, 2);
        assert_eq!(silence.frames(), 1200);
        assert_eq!(silence.samples.len(), 2400);
        assert!(silence.samples.iter().all(|&s| s == 0));
    }
}
