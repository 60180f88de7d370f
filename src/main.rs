use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use tilevq::config::{
    DEFAULT_BUCKETS, DEFAULT_DICTIONARY_SIZE, DEFAULT_FRAMES, DEFAULT_HEIGHT, DEFAULT_TILE_SIZE,
    DEFAULT_WIDTH,
};
use tilevq::pipeline::{DICTIONARY_STREAM, RESIDUAL_STREAM};
use tilevq::{
    decode_clip_with, encode_clip, train, DegeneratePolicy, ReaderFrameSource, StreamSummary, TileConfig,
};

#[derive(Parser)]
#[command(name = "tilevq", version, about = "Tile-dictionary video pre-compressor")]
struct Cli {
    #[arg(short, long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write `<prefix>-dictionary.dat` and `<prefix>-residuals.dat`.
    Encode {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        clip: ClipArgs,
    },
    /// Rebuild frames from both streams, retraining on the original clip.
    Decode {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        dictionary_stream: PathBuf,
        #[arg(long)]
        residual_stream: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        clip: ClipArgs,
    },
    /// Print the dictionary and symbol probabilities of both models.
    Stats {
        #[arg(short, long)]
        input: PathBuf,
        #[command(flatten)]
        clip: ClipArgs,
    },
}

#[derive(Args)]
struct ClipArgs {
    #[arg(long, default_value_t = DEFAULT_WIDTH)]
    width: usize,
    #[arg(long, default_value_t = DEFAULT_HEIGHT)]
    height: usize,
    #[arg(long, default_value_t = DEFAULT_FRAMES)]
    frames: usize,
    /// Frames scanned for the dictionary (defaults to all).
    #[arg(long)]
    training_frames: Option<usize>,
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    tile_size: usize,
    #[arg(long, default_value_t = DEFAULT_BUCKETS)]
    buckets: u32,
    #[arg(long, default_value_t = DEFAULT_DICTIONARY_SIZE)]
    dictionary_size: usize,
    #[arg(long, value_enum, default_value_t = Policy::Pad)]
    policy: Policy,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Pad,
    Truncate,
}

impl ClipArgs {
    fn config(&self) -> tilevq::Result<TileConfig> {
        let mut b = TileConfig::builder(self.width, self.height, self.frames)
            .tile_size(self.tile_size)
            .buckets(self.buckets)
            .dictionary_size(self.dictionary_size)
            .degenerate_policy(match self.policy {
                Policy::Pad => DegeneratePolicy::PadUnseen,
                Policy::Truncate => DegeneratePolicy::Truncate,
            });
        if let Some(n) = self.training_frames {
            b = b.training_frames(n);
        }
        b.build()
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn stream_path(prefix: &Path, stream: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(format!("-{stream}.dat"));
    PathBuf::from(name)
}

/// Remove a partly written output so it cannot be mistaken for a good one.
fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not remove failed output");
    }
}

/// Report one written stream. A failed stream's file is removed and `None`
/// returned; otherwise its size in bytes.
fn settle_stream(
    path: &Path,
    stream: &tilevq::Result<StreamSummary>,
    flush: std::io::Result<()>,
) -> Option<usize> {
    let failure = match (stream, flush) {
        (Ok(s), Ok(())) => {
            println!(
                "[tilevq] {}: {} symbols, {} bytes ({:.3} bits/symbol model entropy)",
                path.display(),
                s.symbols,
                s.bytes,
                s.entropy_bits
            );
            return Some(s.bytes);
        }
        (Err(e), _) => e.to_string(),
        (Ok(_), Err(e)) => e.to_string(),
    };
    println!("[tilevq] {}: FAILED: {failure}", path.display());
    discard(path);
    None
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Encode { input, output, clip } => {
            let config = clip.config()?;
            let mut source = ReaderFrameSource::open(&input, config.width(), config.height())?;

            let index_path = stream_path(&output, DICTIONARY_STREAM);
            let residual_path = stream_path(&output, RESIDUAL_STREAM);
            let mut index_sink = BufWriter::new(File::create(&index_path)?);
            let mut residual_sink = BufWriter::new(File::create(&residual_path)?);

            let t0 = Instant::now();
            let report = match encode_clip(&config, &mut source, &mut index_sink, &mut residual_sink) {
                Ok(r) => r,
                Err(e) => {
                    drop((index_sink, residual_sink));
                    discard(&index_path);
                    discard(&residual_path);
                    return Err(e.into());
                }
            };
            let flushed = [index_sink.flush(), residual_sink.flush()];
            drop((index_sink, residual_sink));

            let raw = (config.frame_len() * config.frames()) as f64;
            let mut total = 0usize;
            let mut failed = false;
            for ((path, stream), flush) in [
                (&index_path, &report.index_stream),
                (&residual_path, &report.residual_stream),
            ]
            .into_iter()
            .zip(flushed)
            {
                match settle_stream(path, stream, flush) {
                    Some(bytes) => total += bytes,
                    None => failed = true,
                }
            }
            if total > 0 {
                println!(
                    "[tilevq] {} frames, dictionary of {}, {:.3}x smaller than raw, {:.4} sec",
                    report.frames,
                    report.dictionary_len,
                    raw / total as f64,
                    t0.elapsed().as_secs_f64()
                );
            }

            if failed {
                return Err("one or more streams failed".into());
            }
            Ok(())
        }

        Commands::Decode {
            input,
            dictionary_stream,
            residual_stream,
            output,
            clip,
        } => {
            let config = clip.config()?;
            let mut training = ReaderFrameSource::open(&input, config.width(), config.height())?;
            let index_blob = fs::read(&dictionary_stream)?;
            let residual_blob = fs::read(&residual_stream)?;

            let mut out = BufWriter::new(File::create(&output)?);
            let t0 = Instant::now();
            let report = decode_clip_with(&config, &mut training, &index_blob, &residual_blob, |frame| {
                out.write_all(frame.as_bytes())?;
                Ok(())
            });
            let report = match report.and_then(|r| out.flush().map(|_| r).map_err(Into::into)) {
                Ok(r) => r,
                Err(e) => {
                    drop(out);
                    discard(&output);
                    return Err(e.into());
                }
            };
            drop(out);

            info!(
                frames = report.frames,
                secs = t0.elapsed().as_secs_f64(),
                "decoded"
            );
            if let Err(e) = &report.index_stream {
                println!("[tilevq] {}: FAILED: {e}", dictionary_stream.display());
                discard(&output);
                return Err("index stream failed, no frames decoded".into());
            }
            if let Err(e) = &report.residual_stream {
                println!("[tilevq] {}: FAILED: {e}", residual_stream.display());
                println!(
                    "[tilevq] Wrote {} bucket-resolution frames -> {}",
                    report.frames,
                    output.display()
                );
                return Err("residual stream failed, output is not exact".into());
            }
            println!("[tilevq] Decoded {} frames -> {}", report.frames, output.display());
            Ok(())
        }

        Commands::Stats { input, clip } => {
            let config = clip.config()?;
            let mut source = ReaderFrameSource::open(&input, config.width(), config.height())?;
            let trained = train(&config, &mut source)?;

            println!("[tilevq] Dictionary ({} entries):", trained.dictionary.len());
            for (i, code) in trained.dictionary.codes().iter().enumerate() {
                println!("  {i:3}: {code}");
            }
            for (name, model) in [
                (DICTIONARY_STREAM, &trained.index_model),
                (RESIDUAL_STREAM, &trained.residual_model),
            ] {
                println!(
                    "[tilevq] {name} model: {} symbols, {} used, {:.3} bits/symbol",
                    model.total(),
                    model.used_symbols(),
                    model.entropy_bits()
                );
                for s in 0..=255u8 {
                    let (count, total) = model.probability(s);
                    if count != 0 {
                        println!("  Symbol: {s} probability: {count}/{total}");
                    }
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilevq::TileError;

    fn scratch(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("tilevq-{}-{name}", std::process::id()));
        fs::write(&path, b"partial").unwrap();
        path
    }

    #[test]
    fn stream_paths_follow_the_prefix() {
        let p = stream_path(Path::new("out/bunny"), DICTIONARY_STREAM);
        assert_eq!(p, PathBuf::from("out/bunny-dictionary.dat"));
    }

    #[test]
    fn failed_stream_file_is_removed() {
        let path = scratch("failed");
        let stream = Err(TileError::Codec("symbol 9 has zero frequency".into()));
        assert_eq!(settle_stream(&path, &stream, Ok(())), None);
        assert!(!path.exists());

        let path = scratch("unflushed");
        let summary = StreamSummary { symbols: 4, bytes: 7, entropy_bits: 1.0 };
        let flush = Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert_eq!(settle_stream(&path, &Ok(summary), flush), None);
        assert!(!path.exists());
    }

    #[test]
    fn good_stream_file_is_kept() {
        let path = scratch("good");
        let summary = StreamSummary { symbols: 4, bytes: 7, entropy_bits: 1.0 };
        assert_eq!(settle_stream(&path, &Ok(summary), Ok(())), Some(7));
        assert!(path.exists());
        fs::remove_file(&path).unwrap();
    }
}
