use thiserror::Error;

/// Errors surfaced by the resampling engine and the stream adapter.
///
/// Configuration errors mean the instance (or call) was parameterized
/// wrongly and must be reconstructed with valid values. Protocol errors mean
/// the caller broke the streaming contract mid-stream; the engine refuses to
/// continue rather than corrupt its state. Running out of output room is not
/// an error at all: the engine reports partial progress and retains pending
/// samples for the next call.
#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("min_factor and max_factor must be positive (got {min} and {max})")]
    InvalidFactorBounds { min: f64, max: f64 },

    #[error("min_factor {min} must be less than or equal to max_factor {max}")]
    InvertedFactorBounds { min: f64, max: f64 },

    #[error("factor {factor} is not between min_factor={min} and max_factor={max}")]
    FactorOutOfBounds { factor: f64, min: f64, max: f64 },

    #[error("unsupported channel count {0}; only 1 or 2 channels are handled")]
    UnsupportedChannels(usize),

    #[error(
        "provide only a factor, only input and output sample rates, or a factor plus one sample rate"
    )]
    AmbiguousRateSpec,

    #[error("interleaved buffer length {len} is not a multiple of {unit}")]
    MisalignedBuffer { len: usize, unit: usize },

    #[error(
        "channel {channel} left {remaining} input samples unconsumed; output buffer too small for this packet"
    )]
    InputNotConsumed { channel: usize, remaining: usize },

    #[error("channel output lengths disagree ({0} vs {1} samples); channels desynchronized")]
    ChannelOutputMismatch(usize, usize),
}
