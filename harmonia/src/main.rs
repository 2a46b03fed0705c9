//! Command-line entry point for the harmonic balancer.
//!
//! ```text
//! harmonia balance <input.wav> <output.wav> [--config cfg.json] [--application power|vibration]
//!                  [--base-frequency 60] [--harmonics 5] [--report report.json] [-v...]
//! harmonia synth <output.wav> --duration 1 --sample-rate 1000 --fundamental 60 --amplitudes 1,0.5,0.3
//! harmonia thd <input.wav> [--harmonics 5]
//! ```
//!
//! Input WAV files must be mono. Output is always 32-bit float.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueHint};
use log::info;

use harmonia::signal::harmonic_signal;
use harmonia::{calculate_thd, Application, BalanceReport, BalancerConfig, HarmonicBalancer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Logging verbosity
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Balance a mono WAV file
    Balance {
        #[arg(value_hint = ValueHint::FilePath)]
        input: PathBuf,
        #[arg(value_hint = ValueHint::FilePath)]
        output: PathBuf,
        /// JSON balancer configuration
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        config: Option<PathBuf>,
        /// power or vibration
        #[arg(short, long)]
        application: Option<Application>,
        #[arg(long)]
        base_frequency: Option<f64>,
        #[arg(long)]
        harmonics: Option<usize>,
        /// Write a JSON diagnostics report
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        report: Option<PathBuf>,
    },
    /// Write a synthetic harmonic test signal
    Synth {
        #[arg(value_hint = ValueHint::FilePath)]
        output: PathBuf,
        /// Seconds
        #[arg(long, default_value_t = 1.0)]
        duration: f64,
        #[arg(long, default_value_t = 1000)]
        sample_rate: u32,
        #[arg(long, default_value_t = 60.0)]
        fundamental: f64,
        /// Amplitude of each harmonic, fundamental first
        #[arg(long, value_delimiter = ',', default_values_t = vec![1.0, 0.5, 0.3])]
        amplitudes: Vec<f64>,
    },
    /// Print the THD of a mono WAV file
    Thd {
        #[arg(value_hint = ValueHint::FilePath)]
        input: PathBuf,
        #[arg(long, default_value_t = 5)]
        harmonics: usize,
    },
}

fn log_format(buf: &mut env_logger::fmt::Formatter, record: &log::Record) -> io::Result<()> {
    let ts = buf.timestamp_millis();
    let module = record.module_path().unwrap_or("");
    writeln!(buf, "{} | {} | {} {}", ts, record.level(), module, record.args())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env(env_logger::Env::default())
        .format(log_format)
        .init();

    match args.command {
        Command::Balance {
            input,
            output,
            config,
            application,
            base_frequency,
            harmonics,
            report,
        } => {
            let mut config = match config {
                Some(path) => BalancerConfig::from_json_file(&path)?,
                None => BalancerConfig::preset(application.unwrap_or(Application::Power)),
            };
            if let Some(application) = application {
                config.application = application;
            }
            if let Some(base) = base_frequency {
                config.base_frequency = base;
            }
            if let Some(h) = harmonics {
                config.num_harmonics = h;
            }
            balance(&input, &output, config, report.as_deref())
        }
        Command::Synth {
            output,
            duration,
            sample_rate,
            fundamental,
            amplitudes,
        } => {
            if !(duration > 0.0) {
                bail!("duration must be positive, got {duration}");
            }
            let samples = harmonic_signal(duration, sample_rate as f64, fundamental, &amplitudes);
            write_wav(&output, &samples, sample_rate)?;
            info!("wrote {} samples to {}", samples.len(), output.display());
            Ok(())
        }
        Command::Thd { input, harmonics } => {
            let (samples, sample_rate) = read_wav(&input)?;
            let thd = calculate_thd(&samples, sample_rate as f64, harmonics)
                .with_context(|| format!("THD of {}", input.display()))?;
            println!("{:.6} ({:.3}%)", thd, thd * 100.0);
            Ok(())
        }
    }
}

fn balance(input: &Path, output: &Path, config: BalancerConfig, report: Option<&Path>) -> Result<()> {
    let (samples, sample_rate) = read_wav(input)?;
    let mut balancer = HarmonicBalancer::from_config(config).context("invalid balancer configuration")?;
    let (balanced, summary) = BalanceReport::evaluate(&mut balancer, &samples, sample_rate as f64)
        .with_context(|| format!("balancing {}", input.display()))?;
    write_wav(output, &balanced, sample_rate)?;

    match (summary.thd_before, summary.thd_after) {
        (Some(before), Some(after)) => println!(
            "THD {:.3}% -> {:.3}% at {:.2} Hz",
            before * 100.0,
            after * 100.0,
            summary.base_frequency
        ),
        _ => println!("THD undefined (degenerate spectrum)"),
    }
    if let Some(path) = report {
        fs::write(path, summary.to_json()?)
            .with_context(|| format!("writing report {}", path.display()))?;
    }
    Ok(())
}

/// Mono samples scaled to [-1, 1] and the sample rate.
fn read_wav(path: &Path) -> Result<(Vec<f64>, u32)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    if spec.channels != 1 {
        bail!("{} has {} channels, expected mono", path.display(), spec.channels);
    }
    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        (hound::SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
            let scale = 1.0 / (1_i64 << (bits - 1)) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f64 * scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        (format, bits) => bail!("unsupported WAV format {format:?} with {bits} bits"),
    };
    Ok((samples, spec.sample_rate))
}

fn write_wav(path: &Path, samples: &[f64], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;
    for &s in samples {
        writer.write_sample(s as f32)?;
    }
    writer.finalize()?;
    Ok(())
}
