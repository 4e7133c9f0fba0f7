// Streaming band-limited resampling engine. One instance per mono channel;
// the caller feeds input and drains output through the producer/consumer
// callbacks in as many calls as it likes, and the engine keeps phase
// continuity across call boundaries so chunked and one-shot processing
// produce identical output.

use std::sync::Arc;

use crate::coeffs::{FilterTable, NPC, Quality};
use crate::error::ResampleError;
use crate::filter_kit;

/// Extra sub-slot interpolation between filter-table entries. The table is
/// oversampled densely enough (NPC slots per sample) that plain lookup is
/// within the filter's own ripple, so this stays off in both quality tiers.
const INTERP_FILT: bool = false;

/// Source of input samples for a `process` call. Values must lie in
/// [-1.0, 1.0]; the engine pulls at most `available()` samples total.
pub trait InputProducer {
    /// Number of input samples still available for this call.
    fn available(&self) -> usize;

    /// Fill `dest` with the next `dest.len()` samples.
    fn produce(&mut self, dest: &mut [f32]);
}

/// Sink for generated output samples. The engine pushes at most
/// `capacity()` samples total per call; whatever does not fit is retained
/// as pending output for a later call.
pub trait OutputConsumer {
    /// Number of output samples this sink still has room for.
    fn capacity(&self) -> usize;

    /// Accept the next `src.len()` generated samples.
    fn consume(&mut self, src: &[f32]);
}

/// Producer over a borrowed slice, tracking how much the engine has taken.
pub struct SliceProducer<'a> {
    data: &'a [f32],
    pos: usize,
}

impl<'a> SliceProducer<'a> {
    pub fn new(data: &'a [f32]) -> Self {
        Self { data, pos: 0 }
    }

    /// Samples the engine has pulled so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }
}

impl InputProducer for SliceProducer<'_> {
    fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    fn produce(&mut self, dest: &mut [f32]) {
        let n = dest.len();
        dest.copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
    }
}

/// Consumer over a borrowed output slice, tracking how much was written.
pub struct SliceConsumer<'a> {
    data: &'a mut [f32],
    pos: usize,
}

impl<'a> SliceConsumer<'a> {
    pub fn new(data: &'a mut [f32]) -> Self {
        Self { data, pos: 0 }
    }

    /// Samples written so far.
    pub fn written(&self) -> usize {
        self.pos
    }
}

impl OutputConsumer for SliceConsumer<'_> {
    fn capacity(&self) -> usize {
        self.data.len() - self.pos
    }

    fn consume(&mut self, src: &[f32]) {
        self.data[self.pos..self.pos + src.len()].copy_from_slice(src);
        self.pos += src.len();
    }
}

/// Unbounded appending sink; handy when the caller sizes memory elsewhere.
impl OutputConsumer for Vec<f32> {
    fn capacity(&self) -> usize {
        usize::MAX
    }

    fn consume(&mut self, src: &[f32]) {
        self.extend_from_slice(src);
    }
}

/// Bounded input window over the stream.
///
/// Layout invariant: `buf[0..xoff)` is carried-over history for the filter's
/// left wing, `buf[xoff..filled)` is unconsumed input, and the slice keeps
/// `xoff` slots of slack past `size` for the end-of-stream zero padding.
#[derive(Clone)]
struct InputWindow {
    buf: Vec<f32>,
    size: usize,
    filled: usize,
}

impl InputWindow {
    fn new(size: usize, xoff: usize) -> Self {
        Self {
            buf: vec![0.0; size + xoff],
            size,
            filled: xoff,
        }
    }

    fn free(&self) -> usize {
        self.size - self.filled
    }

    fn filled(&self) -> usize {
        self.filled
    }

    fn as_slice(&self) -> &[f32] {
        &self.buf
    }

    fn fill_from<P: InputProducer + ?Sized>(&mut self, producer: &mut P, len: usize) {
        if len > 0 {
            producer.produce(&mut self.buf[self.filled..self.filled + len]);
            self.filled += len;
        }
    }

    /// Zero the tail slack so the filter's right wing can run past the last
    /// real sample at end of stream.
    fn zero_pad_tail(&mut self, xoff: usize) {
        self.buf[self.filled..self.filled + xoff].fill(0.0);
    }

    /// Retire consumed samples: everything from `keep_from` on (history plus
    /// unread lookahead) shifts down to index 0 so the fixed-size window can
    /// represent an unbounded stream.
    fn retire(&mut self, keep_from: usize) {
        debug_assert!(keep_from <= self.filled);
        self.buf.copy_within(keep_from..self.filled, 0);
        self.filled -= keep_from;
    }
}

/// Generated-but-undelivered output awaiting a future call.
#[derive(Clone)]
struct PendingOutput {
    buf: Vec<f32>,
    len: usize,
}

impl PendingOutput {
    fn new(size: usize) -> Self {
        Self {
            buf: vec![0.0; size],
            len: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn scratch(&mut self) -> &mut [f32] {
        &mut self.buf
    }

    fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.buf.len());
        self.len = len;
    }

    /// Push up to `room` pending samples into the consumer, left-shifting
    /// the remainder to index 0. Returns how many were delivered.
    fn drain<C: OutputConsumer + ?Sized>(&mut self, output: &mut C, room: usize) -> usize {
        let n = room.min(self.len);
        if n > 0 {
            output.consume(&self.buf[..n]);
            self.buf.copy_within(n..self.len, 0);
            self.len -= n;
        }
        n
    }
}

/// Streaming sample-rate converter for one mono channel.
///
/// Constructed with fixed factor bounds that size the internal buffers once
/// and for all; every `process` call may pick a different factor within
/// them. Cloning an engine copies the stream state and shares the filter
/// table, so a clone resumes exactly where the original left off.
#[derive(Clone)]
pub struct Resampler {
    table: Arc<FilterTable>,
    lp_scale: f32,
    min_factor: f64,
    max_factor: f64,
    /// Filter half-width in input samples: lookbehind kept on the left,
    /// lookahead reserved on the right.
    xoff: usize,
    x: InputWindow,
    y: PendingOutput,
    /// Fractional cursor into the input window; always >= xoff.
    time: f64,
    /// Integer "now" pointer paired with `time` during retirement.
    xp: usize,
}

impl Resampler {
    pub fn new(quality: Quality, min_factor: f64, max_factor: f64) -> Result<Self, ResampleError> {
        if !(min_factor > 0.0) || !(max_factor > 0.0) {
            return Err(ResampleError::InvalidFactorBounds {
                min: min_factor,
                max: max_factor,
            });
        }
        if max_factor < min_factor {
            return Err(ResampleError::InvertedFactorBounds {
                min: min_factor,
                max: max_factor,
            });
        }

        let table = FilterTable::shared(quality);
        let nmult = table.nmult;

        // Half-width of the filter's support in input samples, at the widest
        // stretch either factor bound can demand, plus slack.
        let xoff_for =
            |f: f64| ((nmult + 1) as f64 / 2.0 * f64::max(1.0, 1.0 / f) + 10.0) as usize;
        let xoff = xoff_for(min_factor).max(xoff_for(max_factor));

        let x_size = (2 * xoff + 10).max(4096);
        let y_size = (x_size as f64 * max_factor + 2.0) as usize;

        Ok(Self {
            table,
            lp_scale: 1.0,
            min_factor,
            max_factor,
            xoff,
            x: InputWindow::new(x_size, xoff),
            y: PendingOutput::new(y_size),
            time: xoff as f64,
            xp: xoff,
        })
    }

    /// Filter half-width in input samples; also the worst-case startup and
    /// tail padding callers should budget for when sizing output.
    pub fn filter_width(&self) -> usize {
        self.xoff
    }

    /// Run the converter: drain pending output, pull input, filter, deliver.
    ///
    /// `last_batch` signals that no further input will ever arrive for this
    /// stream; once the producer is fully consumed the input tail is
    /// zero-padded by `filter_width()` samples so the filter runs to the true
    /// end of stream. Returns `true` if the call made no progress at all
    /// (consumed nothing, emitted nothing) — the caller must then supply
    /// more input or more output room before anything further can happen.
    pub fn process<P, C>(
        &mut self,
        factor: f64,
        input: &mut P,
        output: &mut C,
        last_batch: bool,
    ) -> Result<bool, ResampleError>
    where
        P: InputProducer + ?Sized,
        C: OutputConsumer + ?Sized,
    {
        if factor < self.min_factor || factor > self.max_factor {
            return Err(ResampleError::FactorOutOfBounds {
                factor,
                min: self.min_factor,
                max: self.max_factor,
            });
        }

        let out_len = output.capacity();
        let in_len = input.available();
        let mut in_used = 0usize;
        let mut out_emitted = 0usize;

        // Pending output from a prior call goes first; until it is fully
        // drained the engine accepts no new input. This bounds memory and is
        // the backpressure path, not an error.
        out_emitted += self.y.drain(output, out_len);
        if !self.y.is_empty() {
            return Ok(in_used == 0 && out_emitted == 0);
        }

        // Decimation folds the stopband down across the output Nyquist rate,
        // so the passband gain is pre-scaled to compensate. No correction is
        // needed when purely upsampling.
        let mut lp_scale = self.lp_scale;
        if factor < 1.0 {
            lp_scale *= factor as f32;
        }

        loop {
            let len = self.x.free().min(in_len - in_used);
            self.x.fill_from(input, len);
            in_used += len;

            let nx = if last_batch && in_used == in_len {
                self.x.zero_pad_tail(self.xoff);
                self.x.filled() as isize - self.xoff as isize
            } else {
                self.x.filled() as isize - 2 * self.xoff as isize
            };
            if nx <= 0 {
                break;
            }
            let nx = nx as usize;

            let nout = if factor >= 1.0 {
                self.src_up(factor, nx, lp_scale)
            } else {
                self.src_ud(factor, nx, lp_scale)
            };

            // Retire the nx samples just filtered, folding any whole-sample
            // creep of the fractional cursor into the integer pointer, then
            // shift the remaining history + lookahead down to the start.
            self.time -= nx as f64;
            self.xp += nx;
            let ncreep = self.time as isize - self.xoff as isize;
            if ncreep != 0 {
                self.time -= ncreep as f64;
                self.xp = (self.xp as isize + ncreep) as usize;
            }
            self.x.retire(self.xp - self.xoff);
            self.xp = self.xoff;

            out_emitted += self.y.drain(output, out_len - out_emitted);
            if !self.y.is_empty() {
                break;
            }
        }

        Ok(in_used == 0 && out_emitted == 0)
    }

    /// Filter `nx` input samples in pure upsampling mode (factor >= 1):
    /// the table is walked at its full stride.
    fn src_up(&mut self, factor: f64, nx: usize, lp_scale: f32) -> usize {
        let table = &self.table;
        let x = self.x.as_slice();
        let y = self.y.scratch();

        let dt = 1.0 / factor;
        let end_time = self.time + nx as f64;
        let mut t = self.time;
        let mut nout = 0usize;
        while t < end_time {
            let left_phase = t - t.floor();
            let right_phase = 1.0 - left_phase;
            let xp = t as isize;

            let mut v = filter_kit::filter_up(table, INTERP_FILT, x, xp, left_phase, -1);
            v += filter_kit::filter_up(table, INTERP_FILT, x, xp + 1, right_phase, 1);

            y[nout] = v * lp_scale;
            nout += 1;
            t += dt;
        }
        self.time = t;
        self.y.set_len(nout);
        nout
    }

    /// Filter `nx` input samples in combined up/down mode (factor < 1): the
    /// table stride shrinks with the factor, widening the filter's support
    /// so decimation cannot alias.
    fn src_ud(&mut self, factor: f64, nx: usize, lp_scale: f32) -> usize {
        let table = &self.table;
        let x = self.x.as_slice();
        let y = self.y.scratch();

        let dt = 1.0 / factor;
        let dh = f64::min(NPC as f64, factor * NPC as f64);
        let end_time = self.time + nx as f64;
        let mut t = self.time;
        let mut nout = 0usize;
        while t < end_time {
            let left_phase = t - t.floor();
            let right_phase = 1.0 - left_phase;
            let xp = t as isize;

            let mut v = filter_kit::filter_ud(table, INTERP_FILT, x, xp, left_phase, -1, dh);
            v += filter_kit::filter_ud(table, INTERP_FILT, x, xp + 1, right_phase, 1, dh);

            y[nout] = v * lp_scale;
            nout += 1;
            t += dt;
        }
        self.time = t;
        self.y.set_len(nout);
        nout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn sine(n: usize, freq: f64, rate: f64) -> Vec<f32> {
        (0..n)
            .map(|i| (TAU * freq * i as f64 / rate).sin() as f32)
            .collect()
    }

    fn rms(s: &[f32]) -> f64 {
        (s.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>() / s.len() as f64).sqrt()
    }

    fn sign_changes(s: &[f32]) -> usize {
        s.windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count()
    }

    /// Feed `input` in fixed-size chunks through a fresh engine, collecting
    /// everything with an unbounded sink.
    fn run_chunked(quality: Quality, factor: f64, input: &[f32], chunk: usize) -> Vec<f32> {
        let mut eng = Resampler::new(quality, factor, factor).unwrap();
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < input.len() {
            let end = (pos + chunk).min(input.len());
            let mut prod = SliceProducer::new(&input[pos..end]);
            eng.process(factor, &mut prod, &mut out, end == input.len())
                .unwrap();
            // Output is unbounded, so each chunk must be fully consumed.
            assert_eq!(prod.consumed(), end - pos);
            pos = end;
        }
        out
    }

    /// Consumer with a per-call room limit, appending into a shared Vec.
    struct BoundedSink<'a> {
        out: &'a mut Vec<f32>,
        room: usize,
    }

    impl OutputConsumer for BoundedSink<'_> {
        fn capacity(&self) -> usize {
            self.room
        }

        fn consume(&mut self, src: &[f32]) {
            self.room -= src.len();
            self.out.extend_from_slice(src);
        }
    }

    #[test]
    fn identity_factor_on_silence_is_silence_of_equal_length() {
        let n = 5000;
        let input = vec![0.0f32; n];
        let out = run_chunked(Quality::Fast, 1.0, &input, n);
        assert_eq!(out.len(), n);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn chunking_does_not_change_the_output() {
        let input = sine(4000, 440.0, 16000.0);
        let factor = 0.73;
        let whole = run_chunked(Quality::High, factor, &input, input.len());
        for chunk in [1usize, 7, 512] {
            let chunked = run_chunked(Quality::High, factor, &input, chunk);
            assert_eq!(whole, chunked, "chunk size {} diverged", chunk);
        }
    }

    #[test]
    fn backpressure_loses_and_duplicates_nothing() {
        let input = sine(3000, 440.0, 16000.0);
        let factor = 0.5;
        let whole = run_chunked(Quality::Fast, factor, &input, input.len());

        let mut eng = Resampler::new(Quality::Fast, factor, factor).unwrap();
        let mut out = Vec::new();
        let mut pos = 0;
        loop {
            let mut prod = SliceProducer::new(&input[pos..]);
            let mut sink = BoundedSink {
                out: &mut out,
                room: 100,
            };
            let no_progress = eng.process(factor, &mut prod, &mut sink, true).unwrap();
            pos += prod.consumed();
            if no_progress && pos == input.len() {
                break;
            }
        }
        assert_eq!(whole, out);
    }

    #[test]
    fn internal_buffers_never_grow() {
        let mut eng = Resampler::new(Quality::Fast, 0.9, 1.1).unwrap();
        let x_len = eng.x.buf.len();
        let y_len = eng.y.buf.len();

        let input = sine(50_000, 100.0, 48000.0);
        let mut out = Vec::new();
        for (i, block) in input.chunks(997).enumerate() {
            // Vary the factor per call within the configured bounds.
            let factor = if i % 2 == 0 { 0.95 } else { 1.05 };
            let mut prod = SliceProducer::new(block);
            eng.process(factor, &mut prod, &mut out, false).unwrap();
        }

        assert_eq!(eng.x.buf.len(), x_len);
        assert_eq!(eng.y.buf.len(), y_len);
    }

    #[test]
    fn invalid_bounds_are_rejected_at_construction() {
        assert!(matches!(
            Resampler::new(Quality::Fast, 2.0, 1.0),
            Err(ResampleError::InvertedFactorBounds { .. })
        ));
        assert!(matches!(
            Resampler::new(Quality::Fast, -1.0, 1.0),
            Err(ResampleError::InvalidFactorBounds { .. })
        ));
        assert!(matches!(
            Resampler::new(Quality::Fast, 1.0, 0.0),
            Err(ResampleError::InvalidFactorBounds { .. })
        ));
    }

    #[test]
    fn out_of_bounds_factor_fails_without_touching_state() {
        let input = sine(2000, 440.0, 16000.0);

        let mut eng = Resampler::new(Quality::Fast, 1.0, 1.0).unwrap();
        let mut prod = SliceProducer::new(&input);
        let mut out = Vec::new();
        let err = eng.process(0.5, &mut prod, &mut out, true);
        assert!(matches!(err, Err(ResampleError::FactorOutOfBounds { .. })));
        assert_eq!(prod.consumed(), 0);
        assert!(out.is_empty());

        // The rejected call left the engine pristine: a correct call now
        // matches a fresh engine bit for bit.
        let mut prod = SliceProducer::new(&input);
        eng.process(1.0, &mut prod, &mut out, true).unwrap();
        let fresh = run_chunked(Quality::Fast, 1.0, &input, input.len());
        assert_eq!(out, fresh);
    }

    #[test]
    fn two_to_one_downsample_preserves_a_sine() {
        // 8000 samples of a 1 kHz sine at 16 kHz, fed in chunks of 500,
        // downsampled 2:1 to an implied 8 kHz rate.
        let input = sine(8000, 1000.0, 16000.0);
        let out = run_chunked(Quality::High, 0.5, &input, 500);

        assert!((out.len() as i64 - 4000).abs() <= 2, "got {}", out.len());

        // Steady-state region away from filter startup and tail.
        let trimmed = &out[200..out.len() - 200];
        let r = rms(trimmed);
        assert!((r - 1.0 / 2f64.sqrt()).abs() < 0.02, "rms {}", r);

        // 1 kHz at 8 kHz crosses zero every 4 samples.
        let crossings = sign_changes(trimmed);
        let expected = trimmed.len() as f64 / 4.0;
        assert!(
            (crossings as f64 - expected).abs() < expected * 0.01,
            "crossings {} vs {}",
            crossings,
            expected
        );
    }

    #[test]
    fn round_trip_keeps_amplitude_and_frequency_bounded() {
        let rate = 16000.0;
        let input = sine(8000, 440.0, rate);

        let up = run_chunked(Quality::High, 2.0, &input, 1024);
        let back = run_chunked(Quality::High, 0.5, &up, 1024);

        assert!((back.len() as i64 - input.len() as i64).abs() <= 4);

        let trimmed = &back[400..back.len() - 400];
        let r = rms(trimmed);
        assert!((r - 1.0 / 2f64.sqrt()).abs() < 0.02, "rms {}", r);

        // Frequency is preserved: compare zero-crossing densities.
        let in_trimmed = &input[400..input.len() - 400];
        let d_in = sign_changes(in_trimmed) as f64 / in_trimmed.len() as f64;
        let d_back = sign_changes(trimmed) as f64 / trimmed.len() as f64;
        assert!((d_in - d_back).abs() < d_in * 0.02);
    }

    #[test]
    fn clone_resumes_mid_stream() {
        let input = sine(6000, 440.0, 16000.0);
        let factor = 1.25;

        let mut a = Resampler::new(Quality::Fast, factor, factor).unwrap();
        let mut out_a = Vec::new();
        let mut prod = SliceProducer::new(&input[..3000]);
        a.process(factor, &mut prod, &mut out_a, false).unwrap();

        let mut b = a.clone();
        let mut out_b = out_a.clone();

        let mut prod = SliceProducer::new(&input[3000..]);
        a.process(factor, &mut prod, &mut out_a, true).unwrap();
        let mut prod = SliceProducer::new(&input[3000..]);
        b.process(factor, &mut prod, &mut out_b, true).unwrap();

        assert_eq!(out_a, out_b);
    }
}
