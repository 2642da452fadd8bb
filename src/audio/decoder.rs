//! Audio decoding using symphonia
//!
//! Decodes audio files into a two-channel `Waveform` at the sample rate the
//! models expect. Mono is duplicated to stereo and wider layouts keep their
//! first two channels. Uses rubato for resampling with a linear fallback.

use crate::error::{DemixError, Result};
use crate::types::Waveform;
use rubato::{FftFixedInOut, Resampler};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, trace};

/// Maximum file size we'll attempt to decode (2GB)
const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Frames per rubato chunk
const CHUNK_SIZE: usize = 1024;

/// Decode an audio file to a stereo waveform at `target_rate`
pub fn decode_stereo(path: &Path, target_rate: u32) -> Result<Waveform> {
    let (interleaved, channels, source_rate) = read_interleaved(path)?;

    if channels == 0 {
        return Err(DemixError::decode_error(path, "stream reports zero channels"));
    }

    let deinterleaved: Vec<Vec<f32>> = (0..channels)
        .map(|ch| interleaved.iter().skip(ch).step_by(channels).copied().collect())
        .collect();
    let waveform = Waveform::from_channels(deinterleaved, source_rate)?.to_stereo()?;

    if channels != 2 {
        debug!("Normalized {} channels to stereo", channels);
    }

    let waveform = if source_rate != target_rate {
        let channels: Vec<Vec<f32>> = waveform
            .samples()
            .rows()
            .into_iter()
            .map(|row| row.to_vec())
            .collect();
        let resampled = resample_channels(&channels, source_rate, target_rate);
        Waveform::from_channels(resampled, target_rate)?
    } else {
        waveform
    };

    debug!(
        "Decoded {} samples per channel ({:.2}s) from {}",
        waveform.len(),
        waveform.duration(),
        path.display()
    );

    Ok(waveform)
}

/// Read every packet of the first audio track as interleaved f32
///
/// Returns the samples, channel count and source sample rate.
fn read_interleaved(path: &Path) -> Result<(Vec<f32>, usize, u32)> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DemixError::FileNotFound(path.to_path_buf())
        } else {
            DemixError::decode_error(path, format!("Failed to read file metadata: {}", e))
        }
    })?;

    if metadata.len() > MAX_FILE_SIZE {
        return Err(DemixError::decode_error(
            path,
            format!(
                "File too large ({:.1} GB). Maximum supported size is 2 GB.",
                metadata.len() as f64 / (1024.0 * 1024.0 * 1024.0)
            ),
        ));
    }

    let file = std::fs::File::open(path)
        .map_err(|e| DemixError::decode_error(path, format!("Failed to open file: {}", e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DemixError::decode_error(path, format!("Failed to probe format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DemixError::decode_error(path, "No audio tracks found"))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| DemixError::decode_error(path, "Unknown sample rate"))?;
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);

    debug!(
        "Decoding: {} @ {}Hz, {} channels",
        path.display(),
        source_rate,
        channels
    );

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DemixError::decode_error(path, format!("Failed to create decoder: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => {
                return Err(DemixError::decode_error(
                    path,
                    format!("Failed to read packet: {}", e),
                ));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                trace!("Skipping corrupted frame: {}", e);
                continue;
            }
            Err(e) => {
                return Err(DemixError::decode_error(path, format!("Decode error: {}", e)));
            }
        };

        let spec = *decoded.spec();
        // Some containers only report the layout on the first decoded frame
        channels = spec.channels.count();

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    Ok((samples, channels, source_rate))
}

/// Resample every channel to `to_rate`, keeping channels the same length
///
/// Output length is `ceil(len * to_rate / from_rate)` and the resampler's
/// delay is compensated so the output stays time-aligned with the input.
fn resample_channels(channels: &[Vec<f32>], from_rate: u32, to_rate: u32) -> Vec<Vec<f32>> {
    if from_rate == to_rate || channels.is_empty() {
        return channels.to_vec();
    }

    let input_len = channels[0].len();
    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (input_len as f64 * ratio).ceil() as usize;

    let mut resampler =
        match FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, channels.len()) {
            Ok(r) => r,
            Err(e) => {
                debug!("Rubato initialization failed ({}), using fallback", e);
                return linear_fallback(channels, from_rate, to_rate, output_len);
            }
        };

    let delay = resampler.output_delay();
    let needed = delay + output_len;
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(needed); channels.len()];

    // Keep feeding (zero-padded) chunks until the delayed output is covered
    let mut pos = 0;
    while output[0].len() < needed {
        let frames_in = resampler.input_frames_next();
        let chunk: Vec<Vec<f32>> = channels
            .iter()
            .map(|ch| {
                let start = pos.min(input_len);
                let end = (pos + frames_in).min(input_len);
                let mut chunk = ch[start..end].to_vec();
                chunk.resize(frames_in, 0.0);
                chunk
            })
            .collect();

        match resampler.process(&chunk, None) {
            Ok(resampled) => {
                for (out, res) in output.iter_mut().zip(resampled) {
                    out.extend(res);
                }
            }
            Err(e) => {
                debug!("Rubato processing error ({}), using fallback", e);
                return linear_fallback(channels, from_rate, to_rate, output_len);
            }
        }

        pos += frames_in;
    }

    output
        .into_iter()
        .map(|ch| ch[delay..delay + output_len].to_vec())
        .collect()
}

/// Linear interpolation resampler
///
/// Used only when rubato fails to initialize or process. May alias.
fn linear_fallback(
    channels: &[Vec<f32>],
    from_rate: u32,
    to_rate: u32,
    output_len: usize,
) -> Vec<Vec<f32>> {
    let step = from_rate as f64 / to_rate as f64;

    channels
        .iter()
        .map(|samples| {
            if samples.is_empty() {
                return vec![0.0; output_len];
            }
            (0..output_len)
                .map(|i| {
                    let src_pos = i as f64 * step;
                    let idx = src_pos as usize;
                    let frac = (src_pos - idx as f64) as f32;
                    if idx + 1 < samples.len() {
                        samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
                    } else {
                        samples[idx.min(samples.len() - 1)]
                    }
                })
                .collect()
        })
        .collect()
}
