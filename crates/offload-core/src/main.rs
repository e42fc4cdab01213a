use clap::{Parser, ValueEnum};
use offload_core::{Driver, HostDriver, OffloadError, PipelineConfig, RunOutput, offload};
use rand::Rng;
use std::{fmt::Write as _, io::IsTerminal, path::PathBuf, process::ExitCode};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_COUNT: usize = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Built-in software device
    Host,
    /// System OpenCL runtime
    Opencl,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "opencl") { Backend::Opencl } else { Backend::Host }
    }
}

/// Add two random integer vectors on a compute device.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Number of elements; non-numeric or negative values mean 0
    #[arg(allow_negative_numbers = true)]
    count: Option<String>,

    /// Kernel source file
    #[arg(long, default_value = offload_core::config::DEFAULT_KERNEL_PATH)]
    kernel: PathBuf,

    /// Kernel entry point
    #[arg(long, default_value = offload_core::config::DEFAULT_ENTRY_POINT)]
    entry: String,

    /// Options passed to the program build
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    build_options: String,

    #[arg(long, value_enum, default_value_t = Backend::default())]
    backend: Backend,

    /// Don't print the arrays
    #[arg(short, long)]
    quiet: bool,
}

/// Parse like C `atoi`, clamping negatives and garbage to 0.
fn parse_count(arg: &str) -> usize {
    let s = arg.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    if negative || end == 0 {
        return 0;
    }
    // atoi yields an int
    digits[..end]
        .parse::<u64>()
        .map(|n| n.min(i32::MAX as u64) as usize)
        .unwrap_or(i32::MAX as usize)
}

fn random_vec(len: usize) -> Vec<i32> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(0..100)).collect()
}

/// Elements separated by spaces; more than 15 are abbreviated to the
/// first and last five.
fn format_array(v: &[i32]) -> String {
    fn put(s: &mut String, items: &[i32]) {
        for x in items {
            let _ = write!(s, "{x} ");
        }
    }

    let mut s = String::new();
    if v.len() > 15 {
        put(&mut s, &v[..5]);
        s.push_str(" ..... ");
        put(&mut s, &v[v.len() - 5..]);
    } else {
        put(&mut s, v);
    }
    s.push('\n');
    s.push_str(&"-".repeat(28));
    s
}

fn run<D: Driver>(driver: D, cli: &Cli, a: &[i32], b: &[i32]) -> Result<RunOutput, OffloadError> {
    let config = PipelineConfig::default()
        .with_kernel_path(&cli.kernel)
        .with_entry_point(&cli.entry)
        .with_build_options(&cli.build_options);
    offload(driver, &config, a, b)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let count = cli.count.as_deref().map_or(DEFAULT_COUNT, parse_count);

    let a = random_vec(count);
    let b = random_vec(count);
    if !cli.quiet {
        println!("{}", format_array(&a));
        println!("{}", format_array(&b));
    }

    let result = match cli.backend {
        Backend::Host => run(HostDriver::new(), &cli, &a, &b),
        #[cfg(feature = "opencl")]
        Backend::Opencl => run(offload_core::OpenClDriver::new(), &cli, &a, &b),
        #[cfg(not(feature = "opencl"))]
        Backend::Opencl => {
            eprintln!("error: this binary was built without the `opencl` feature");
            return ExitCode::from(1);
        }
    };

    match result {
        Ok(out) => {
            if !cli.quiet {
                println!("{}", format_array(&out.output));
            }
            println!("Kernel Execution Time: {:.6} ms", out.elapsed.as_secs_f64() * 1e3);
            info!(device = %out.device.info.name, released = out.teardown.released, "done");

            #[cfg(feature = "metrics")]
            offload_core::metrics::summary();

            ExitCode::SUCCESS
        }
        Err(e) => {
            debug!(stage = %e.stage(), status = e.api_code().map(|c| c.code()), "run failed");
            eprintln!("error: {} failed: {e}", e.stage());
            ExitCode::from(1)
        }
    }
}
