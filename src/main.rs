use std::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread::available_parallelism;
use std::time::Instant;

use clap::Parser;
use colored::Colorize;
use common_path::common_path_all;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use log::{info, trace, warn};
use rayon::prelude::*;
use rsresample::{ColorLogger, Quality, StreamResampler, TermResult, expected_output_len};

#[derive(Parser)]
#[command(name = "rsresample", version)]
struct Cli {
    /// Output directory path for converted files. Directory must already
    /// exist but any subdirectories will be created as needed.
    /// [default: same as input file]
    #[arg(short = 'p', long = "path", default_value = None)]
    path: Option<PathBuf>,

    /// Output sample rate in Hz
    #[arg(short = 'r', long = "rate", default_value = "44100")]
    rate: u32,

    /// Resampling quality: F (fast) or H (high)
    #[arg(short = 'Q', long = "quality", default_value = "H")]
    quality: char,

    /// Frames fed to the resampler per packet. Only set this if you know
    /// what you're doing.
    #[arg(short = 's', long = "bs", default_value = "4096")]
    block_size: usize,

    /// Append abbreviated output rate to the file name (e.g., _96K, _44_1K)
    #[arg(short = 'a', long = "append")]
    append_rate: bool,

    /// Print diagnostic messages
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Quiet mode: suppress all log output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Input WAV files (16-bit integer, mono or stereo)
    #[arg(name = "FILES", required = true)]
    files: Vec<PathBuf>,
}

/// Per-file conversion settings, cheap to hand to Rayon workers.
#[derive(Clone)]
struct Job {
    rate: u32,
    quality: Quality,
    block_size: usize,
    out_dir: Option<PathBuf>,
    append_rate: bool,
}

fn main() -> TermResult {
    match run() {
        Ok(()) => TermResult(Ok(())),
        Err(e) => TermResult(Err(e)),
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let logger = ColorLogger::new(cli.quiet, cli.verbose);
    let multi = MultiProgress::new();
    LogWrapper::new(multi.clone(), logger).try_init()?;

    let quality = match cli.quality.to_ascii_lowercase() {
        'f' => Quality::Fast,
        'h' => Quality::High,
        _ => return Err("Invalid quality; must be F (fast) or H (high)".into()),
    };

    if cli.block_size == 0 {
        return Err("Block size must be positive".into());
    }

    let avail_par = available_parallelism().map(|n| n.get()).unwrap_or(1);
    let thread_count = (avail_par / 2).max(1);
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build_global()
    {
        warn!(
            "Rayon pool initialization error ({} threads). Details: {:?}",
            thread_count, e
        );
    } else {
        trace!("Configured Rayon pool with {} threads", thread_count);
    }

    let mut inputs = cli.files.clone();
    inputs.sort();
    inputs.dedup();

    // Drop any unexpanded glob patterns, canonicalize the rest.
    let paths = inputs
        .iter()
        .filter_map(|input| {
            if input.to_string_lossy().contains('*') {
                warn!(
                    "Unexpanded glob pattern detected in input: \"{}\". Skipping.",
                    input.display()
                );
                None
            } else {
                Some(input)
            }
        })
        .map(|p| p.canonicalize())
        .collect::<Result<Vec<_>, io::Error>>()?;

    // Base directory against which output subpaths are rebuilt when an
    // output folder is specified.
    let base_dir = if paths.len() == 1 {
        paths[0].parent().unwrap_or(Path::new("/")).to_path_buf()
    } else {
        common_path_all(paths.iter().map(|p| p.as_path())).unwrap_or(PathBuf::from("/"))
    };

    let job = Job {
        rate: cli.rate,
        quality,
        block_size: cli.block_size,
        out_dir: cli.path.clone(),
        append_rate: cli.append_rate,
    };

    let total_inputs = paths.len();
    let wall_start = Instant::now();

    paths
        .into_par_iter()
        .try_for_each(|path| convert_file(&path, &job, &base_dir, &multi))
        .map_err(|e| -> Box<dyn Error> { Box::new(io::Error::other(e)) })?;

    let total_secs = wall_start.elapsed().as_secs();
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    info!(
        "Processed {} inputs in {:02}:{:02}:{:02}",
        total_inputs, h, m, s
    );

    Ok(())
}

/// Resample a single WAV file; runs inside a Rayon worker.
fn convert_file(
    path: &Path,
    job: &Job,
    base_dir: &Path,
    multi: &MultiProgress,
) -> Result<(), String> {
    let mut reader = WavReader::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let spec = reader.spec();

    if spec.channels < 1 || spec.channels > 2 {
        return Err(format!(
            "{}: unsupported channel count {} (only mono and stereo)",
            path.display(),
            spec.channels
        ));
    }
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(format!(
            "{}: unsupported sample format (only 16-bit integer PCM)",
            path.display()
        ));
    }

    let channels = spec.channels as usize;
    let mut resampler = StreamResampler::new(job.quality, channels, spec.sample_rate, job.rate)
        .map_err(|e| format!("{}: {}", path.display(), e))?;

    trace!(
        "{}: {} Hz -> {} Hz, factor {:.6}, filter width {}",
        path.display(),
        resampler.input_rate(),
        resampler.output_rate(),
        resampler.factor(),
        resampler.filter_width()
    );

    let samples = reader
        .samples::<i16>()
        .collect::<Result<Vec<i16>, _>>()
        .map_err(|e| format!("{}: {}", path.display(), e))?;

    let out_path = output_path(path, job, base_dir)?;
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }

    let out_spec = WavSpec {
        channels: spec.channels,
        sample_rate: job.rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&out_path, out_spec).map_err(|e| e.to_string())?;

    let packet_len = job.block_size * channels;
    let packet_count = samples.len().div_ceil(packet_len).max(1);

    let style = ProgressStyle::with_template("{prefix} {bar:20.cyan/blue} {percent}{msg}")
        .map_err(|e| e.to_string())?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let pg = multi
        .add(ProgressBar::new(packet_count as u64))
        .with_style(style)
        .with_prefix(format!("{} {}", "[Converting]".bold(), file_name.bold()))
        .with_message("%");

    let mut out_buf = vec![0i16; expected_output_len(packet_len, resampler.factor())];
    let mut pos = 0usize;
    loop {
        let end = (pos + packet_len).min(samples.len());
        let last = end == samples.len();
        let written = resampler
            .process_i16(last, &samples[pos..end], &mut out_buf)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        for &s in &out_buf[..written] {
            writer.write_sample(s).map_err(|e| e.to_string())?;
        }
        pg.inc(1);
        if last {
            break;
        }
        pos = end;
    }
    pg.finish_and_clear();

    writer.finalize().map_err(|e| e.to_string())?;

    info!(
        "{}: {} packets, {} bytes in, {} bytes out -> {}",
        file_name,
        resampler.in_packet_count(),
        resampler.in_bytes_processed(),
        resampler.out_bytes_generated(),
        out_path.display()
    );

    Ok(())
}

/// Build the output path: the optional output directory (with the input's
/// subpath below the common base preserved), the input stem, and the rate
/// suffix when requested or needed to avoid clobbering the input.
fn output_path(path: &Path, job: &Job, base_dir: &Path) -> Result<PathBuf, String> {
    let parent = path.parent().unwrap_or(Path::new("/"));
    let out_dir = match &job.out_dir {
        Some(dir) => {
            let rel = parent.strip_prefix(base_dir).unwrap_or(Path::new(""));
            dir.join(rel)
        }
        None => parent.to_path_buf(),
    };

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| format!("{}: no file name", path.display()))?;

    let mut name = stem.clone();
    if job.append_rate {
        name.push_str(&rate_suffix(job.rate));
    }
    let mut out_path = out_dir.join(format!("{}.wav", name));

    // Never overwrite the input in place.
    if out_path == path {
        out_path = out_dir.join(format!("{}{}.wav", stem, rate_suffix(job.rate)));
        if out_path == path {
            return Err(format!("{}: output would clobber input", path.display()));
        }
    }
    Ok(out_path)
}

fn rate_suffix(rate: u32) -> String {
    if rate % 1000 == 0 {
        format!("_{}K", rate / 1000)
    } else {
        format!("_{}_{}K", rate / 1000, (rate % 1000) / 100)
    }
}
