// Interleaved multi-channel boundary around the mono engines: fans signed
// 16-bit PCM out to one Resampler per channel, normalizing to float on the
// way in and re-interleaving saturated integers on the way out.

use log::trace;

use crate::coeffs::Quality;
use crate::error::ResampleError;
use crate::resampler::{InputProducer, OutputConsumer, Resampler};

/// Normalization constant between signed 16-bit PCM and float; the value
/// used by Core Audio, ALSA, and libsndfile.
pub const I16_SCALE: f32 = 32768.0;

/// Fixed margin, in samples, that output buffers need beyond
/// `input_len * factor` to absorb filter startup and tail effects.
const OUTPUT_MARGIN: usize = 400;

/// Expected output length (samples or bytes, matching the input unit) for a
/// packet of `input_len` at the given factor. Callers sizing their own
/// output buffers must use this formula or risk truncated packets.
pub fn expected_output_len(input_len: usize, factor: f64) -> usize {
    (input_len as f64 * factor) as usize + OUTPUT_MARGIN
}

/// Derive the resampling factor from whichever of factor / input rate /
/// output rate the caller supplied. Exactly one of the three may be left
/// out; supplying all three is ambiguous and rejected.
pub fn calc_factor(factor: f64, input_rate: u32, output_rate: u32) -> Result<f64, ResampleError> {
    if factor > 0.0 && input_rate > 0 && output_rate > 0 {
        return Err(ResampleError::AmbiguousRateSpec);
    }
    if factor <= 0.0 {
        if input_rate == 0 || output_rate == 0 {
            return Err(ResampleError::AmbiguousRateSpec);
        }
        return Ok(output_rate as f64 / input_rate as f64);
    }
    Ok(factor)
}

/// Counterpart of `calc_factor` for a missing input sample rate.
pub fn calc_input_rate(
    factor: f64,
    input_rate: u32,
    output_rate: u32,
) -> Result<u32, ResampleError> {
    if factor > 0.0 && input_rate > 0 && output_rate > 0 {
        return Err(ResampleError::AmbiguousRateSpec);
    }
    if input_rate == 0 {
        if factor <= 0.0 || output_rate == 0 {
            return Err(ResampleError::AmbiguousRateSpec);
        }
        return Ok((output_rate as f64 / factor) as u32);
    }
    Ok(input_rate)
}

/// Counterpart of `calc_factor` for a missing output sample rate.
pub fn calc_output_rate(
    factor: f64,
    input_rate: u32,
    output_rate: u32,
) -> Result<u32, ResampleError> {
    if factor > 0.0 && input_rate > 0 && output_rate > 0 {
        return Err(ResampleError::AmbiguousRateSpec);
    }
    if output_rate == 0 {
        if factor <= 0.0 || input_rate == 0 {
            return Err(ResampleError::AmbiguousRateSpec);
        }
        return Ok((input_rate as f64 * factor) as u32);
    }
    Ok(output_rate)
}

/// Producer view of one channel of an interleaved i16 packet.
struct LaneProducer<'a> {
    data: &'a [i16],
    offset: usize,
    step: usize,
    used: usize,
}

impl InputProducer for LaneProducer<'_> {
    fn available(&self) -> usize {
        self.data.len() / self.step - self.used
    }

    fn produce(&mut self, dest: &mut [f32]) {
        for (i, d) in dest.iter_mut().enumerate() {
            let idx = self.offset + (self.used + i) * self.step;
            *d = self.data[idx] as f32 / I16_SCALE;
        }
        self.used += dest.len();
    }
}

/// Consumer view of one channel of an interleaved i16 packet. The float to
/// integer cast saturates at the i16 range.
struct LaneConsumer<'a> {
    data: &'a mut [i16],
    offset: usize,
    step: usize,
    frames: usize,
    written: usize,
}

impl OutputConsumer for LaneConsumer<'_> {
    fn capacity(&self) -> usize {
        self.frames - self.written
    }

    fn consume(&mut self, src: &[f32]) {
        for (i, &s) in src.iter().enumerate() {
            let idx = self.offset + (self.written + i) * self.step;
            self.data[idx] = (s * I16_SCALE) as i16;
        }
        self.written += src.len();
    }
}

/// Packet-oriented resampler for interleaved signed 16-bit PCM, mono or
/// stereo. Every channel runs its own `Resampler` with the same factor and
/// batch flag, so all channels stay frame-aligned by construction.
pub struct StreamResampler {
    factor: f64,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    lanes: Vec<Resampler>,
    in_packets: u64,
    in_bytes: u64,
    out_bytes: u64,
}

impl StreamResampler {
    /// Build from explicit input and output sample rates.
    pub fn new(
        quality: Quality,
        channels: usize,
        input_rate: u32,
        output_rate: u32,
    ) -> Result<Self, ResampleError> {
        Self::with_factor(quality, 0.0, channels, input_rate, output_rate)
    }

    /// Build from a factor, sample rates, or a valid mix of both; see
    /// `calc_factor` for which combinations are accepted.
    pub fn with_factor(
        quality: Quality,
        factor: f64,
        channels: usize,
        input_rate: u32,
        output_rate: u32,
    ) -> Result<Self, ResampleError> {
        if channels == 0 || channels > 2 {
            return Err(ResampleError::UnsupportedChannels(channels));
        }

        // Each helper works from the caller's raw arguments, so exactly the
        // combinations documented on `calc_factor` get through.
        let derived = calc_factor(factor, input_rate, output_rate)?;
        let derived_in = calc_input_rate(factor, input_rate, output_rate)?;
        let derived_out = calc_output_rate(factor, input_rate, output_rate)?;
        let (input_rate, output_rate) = (derived_in, derived_out);

        let lanes = (0..channels)
            .map(|_| Resampler::new(quality, derived, derived))
            .collect::<Result<Vec<_>, _>>()?;

        trace!(
            "stream resampler: {} ch, {} -> {} Hz (factor {:.6})",
            channels, input_rate, output_rate, derived
        );

        Ok(Self {
            factor: derived,
            input_rate,
            output_rate,
            channels,
            lanes,
            in_packets: 0,
            in_bytes: 0,
            out_bytes: 0,
        })
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Per-channel filter half-width in samples.
    pub fn filter_width(&self) -> usize {
        self.lanes[0].filter_width()
    }

    /// Input packets seen so far.
    pub fn in_packet_count(&self) -> u64 {
        self.in_packets
    }

    /// Input bytes processed so far.
    pub fn in_bytes_processed(&self) -> u64 {
        self.in_bytes
    }

    /// Output bytes generated so far.
    pub fn out_bytes_generated(&self) -> u64 {
        self.out_bytes
    }

    /// Resample one interleaved packet, returning the number of interleaved
    /// output samples written.
    ///
    /// The output buffer must be sized per `expected_output_len` so the
    /// whole packet can be consumed in one call: a packet this size never
    /// leaves pending output behind, which is what keeps every channel in
    /// lockstep. An undersized output surfaces as `InputNotConsumed`.
    pub fn process_i16(
        &mut self,
        last_batch: bool,
        input: &[i16],
        output: &mut [i16],
    ) -> Result<usize, ResampleError> {
        let ch = self.channels;
        if input.len() % ch != 0 {
            return Err(ResampleError::MisalignedBuffer {
                len: input.len(),
                unit: ch,
            });
        }
        if output.len() % ch != 0 {
            return Err(ResampleError::MisalignedBuffer {
                len: output.len(),
                unit: ch,
            });
        }

        let in_frames = input.len() / ch;
        let out_frames = output.len() / ch;
        let mut frames_written: Option<usize> = None;

        for (idx, lane) in self.lanes.iter_mut().enumerate() {
            let mut producer = LaneProducer {
                data: input,
                offset: idx,
                step: ch,
                used: 0,
            };
            let mut consumer = LaneConsumer {
                data: output,
                offset: idx,
                step: ch,
                frames: out_frames,
                written: 0,
            };
            lane.process(self.factor, &mut producer, &mut consumer, last_batch)?;

            if producer.used < in_frames {
                return Err(ResampleError::InputNotConsumed {
                    channel: idx,
                    remaining: in_frames - producer.used,
                });
            }
            match frames_written {
                None => frames_written = Some(consumer.written),
                Some(w) if w != consumer.written => {
                    return Err(ResampleError::ChannelOutputMismatch(w, consumer.written));
                }
                Some(_) => {}
            }
        }

        let written = frames_written.unwrap_or(0) * ch;
        self.in_packets += 1;
        self.in_bytes += (input.len() * 2) as u64;
        self.out_bytes += (written * 2) as u64;
        Ok(written)
    }

    /// Byte-buffer variant: little-endian bytes reinterpreted as i16.
    /// Returns the number of output bytes written.
    pub fn process_bytes(
        &mut self,
        last_batch: bool,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, ResampleError> {
        if input.len() % 2 != 0 {
            return Err(ResampleError::MisalignedBuffer {
                len: input.len(),
                unit: 2,
            });
        }
        if output.len() % 2 != 0 {
            return Err(ResampleError::MisalignedBuffer {
                len: output.len(),
                unit: 2,
            });
        }

        let in_samples: Vec<i16> = input
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        let mut out_samples = vec![0i16; output.len() / 2];

        let n = self.process_i16(last_batch, &in_samples, &mut out_samples)?;

        for (dst, s) in output.chunks_exact_mut(2).zip(&out_samples[..n]) {
            dst.copy_from_slice(&s.to_le_bytes());
        }
        Ok(n * 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn sine_i16(n: usize, freq: f64, rate: f64, amp: f64) -> Vec<i16> {
        (0..n)
            .map(|i| ((TAU * freq * i as f64 / rate).sin() * amp * 32767.0) as i16)
            .collect()
    }

    fn interleave(l: &[i16], r: &[i16]) -> Vec<i16> {
        l.iter()
            .zip(r)
            .flat_map(|(&a, &b)| [a, b])
            .collect()
    }

    #[test]
    fn factor_derivation_rules() {
        assert_eq!(calc_factor(0.0, 16000, 48000).unwrap(), 3.0);
        assert_eq!(calc_factor(2.0, 0, 0).unwrap(), 2.0);
        assert_eq!(calc_factor(2.0, 16000, 0).unwrap(), 2.0);
        assert!(matches!(
            calc_factor(2.0, 16000, 48000),
            Err(ResampleError::AmbiguousRateSpec)
        ));
        assert!(matches!(
            calc_factor(0.0, 16000, 0),
            Err(ResampleError::AmbiguousRateSpec)
        ));
        assert_eq!(calc_output_rate(2.0, 16000, 0).unwrap(), 32000);
        assert_eq!(calc_input_rate(0.5, 0, 22050).unwrap(), 44100);
    }

    #[test]
    fn channel_counts_outside_one_or_two_are_rejected() {
        for ch in [0usize, 3, 8] {
            assert!(matches!(
                StreamResampler::new(Quality::Fast, ch, 16000, 8000),
                Err(ResampleError::UnsupportedChannels(_))
            ));
        }
    }

    #[test]
    fn mono_packet_roundtrip_produces_expected_length() {
        let input = sine_i16(8000, 1000.0, 16000.0, 0.8);
        let mut rs = StreamResampler::new(Quality::High, 1, 16000, 8000).unwrap();

        let mut total = 0usize;
        let mut out = vec![0i16; expected_output_len(input.len(), rs.factor())];
        for (i, packet) in input.chunks(500).enumerate() {
            let last = (i + 1) * 500 >= input.len();
            let mut buf = vec![0i16; expected_output_len(packet.len(), rs.factor())];
            let n = rs.process_i16(last, packet, &mut buf).unwrap();
            out[total..total + n].copy_from_slice(&buf[..n]);
            total += n;
        }

        assert!((total as i64 - 4000).abs() <= 2, "got {}", total);
        assert_eq!(rs.in_packet_count(), 16);
        assert_eq!(rs.in_bytes_processed(), 16000);
        assert_eq!(rs.out_bytes_generated(), total as u64 * 2);
    }

    #[test]
    fn stereo_channels_do_not_leak_into_each_other() {
        // Left carries a tone, right carries silence; after resampling the
        // right channel must still be (near) silent.
        let n = 6000;
        let left = sine_i16(n, 440.0, 16000.0, 0.8);
        let right = vec![0i16; n];
        let input = interleave(&left, &right);

        let mut rs = StreamResampler::new(Quality::High, 2, 16000, 24000).unwrap();
        let mut out = vec![0i16; expected_output_len(input.len(), rs.factor())];
        let written = rs.process_i16(true, &input, &mut out).unwrap();
        assert!(written > 0 && written % 2 == 0);

        let out_left: Vec<i16> = out[..written].iter().step_by(2).copied().collect();
        let out_right: Vec<i16> = out[1..written].iter().step_by(2).copied().collect();

        let peak_l = out_left.iter().map(|&v| (v as i32).abs()).max().unwrap();
        let peak_r = out_right.iter().map(|&v| (v as i32).abs()).max().unwrap();
        assert!(peak_l > 20000, "left tone lost (peak {})", peak_l);
        assert_eq!(peak_r, 0, "silence leaked (peak {})", peak_r);
    }

    #[test]
    fn stereo_matches_two_independent_mono_runs() {
        let n = 4000;
        let left = sine_i16(n, 440.0, 16000.0, 0.7);
        let right = sine_i16(n, 1200.0, 16000.0, 0.5);
        let input = interleave(&left, &right);

        let mut stereo = StreamResampler::new(Quality::Fast, 2, 16000, 8000).unwrap();
        let mut out = vec![0i16; expected_output_len(input.len(), stereo.factor())];
        let written = stereo.process_i16(true, &input, &mut out).unwrap();

        let run_mono = |data: &[i16]| -> Vec<i16> {
            let mut rs = StreamResampler::new(Quality::Fast, 1, 16000, 8000).unwrap();
            let mut buf = vec![0i16; expected_output_len(data.len(), rs.factor())];
            let n = rs.process_i16(true, data, &mut buf).unwrap();
            buf.truncate(n);
            buf
        };
        let mono_l = run_mono(&left);
        let mono_r = run_mono(&right);

        assert_eq!(written, mono_l.len() + mono_r.len());
        for (i, (&l, &r)) in mono_l.iter().zip(&mono_r).enumerate() {
            assert_eq!(out[2 * i], l, "left sample {} diverged", i);
            assert_eq!(out[2 * i + 1], r, "right sample {} diverged", i);
        }
    }

    #[test]
    fn undersized_output_is_a_protocol_error() {
        let input = sine_i16(4000, 440.0, 16000.0, 0.8);
        let mut rs = StreamResampler::new(Quality::Fast, 1, 16000, 16000).unwrap();
        let mut out = vec![0i16; 100];
        assert!(matches!(
            rs.process_i16(true, &input, &mut out),
            Err(ResampleError::InputNotConsumed { .. })
        ));
    }

    #[test]
    fn byte_variant_matches_sample_variant() {
        let input = sine_i16(3000, 700.0, 16000.0, 0.6);
        let in_bytes: Vec<u8> = input.iter().flat_map(|s| s.to_le_bytes()).collect();

        let mut a = StreamResampler::new(Quality::Fast, 1, 16000, 8000).unwrap();
        let mut out_s = vec![0i16; expected_output_len(input.len(), a.factor())];
        let n_s = a.process_i16(true, &input, &mut out_s).unwrap();

        let mut b = StreamResampler::new(Quality::Fast, 1, 16000, 8000).unwrap();
        let mut out_b = vec![0u8; expected_output_len(in_bytes.len(), b.factor())];
        // Byte buffers must come in even lengths.
        assert!(matches!(
            b.process_bytes(true, &in_bytes[..5], &mut out_b),
            Err(ResampleError::MisalignedBuffer { .. })
        ));
        let mut b = StreamResampler::new(Quality::Fast, 1, 16000, 8000).unwrap();
        let mut out_b = vec![0u8; (expected_output_len(input.len(), b.factor())) * 2];
        let n_b = b.process_bytes(true, &in_bytes, &mut out_b).unwrap();

        assert_eq!(n_b, n_s * 2);
        for (i, &s) in out_s[..n_s].iter().enumerate() {
            assert_eq!(
                i16::from_le_bytes([out_b[2 * i], out_b[2 * i + 1]]),
                s
            );
        }
    }
}
