use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use clap::Parser;
use tracing::{event, span, Level};
use tracing_subscriber::prelude::*;

use base::prelude::*;
use cpu::{FaultCode, HostStop, ProcessorParts, SchedulingModel, System, SystemConfig};

mod load;
mod minimal;

use minimal::MinimalExecutor;

/// Run the processor cycle engine on a memory image.
#[derive(Parser, Debug)]
#[command(name = "dps8")]
struct Args {
    /// JSON file holding the system configuration.  Without this, a
    /// single processor and one system controller are configured.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Octal memory image to load before starting.
    #[arg(long)]
    load: Option<PathBuf>,

    /// Octal address at which processor 0 starts.
    #[arg(long, value_parser = parse_octal)]
    start: Option<u32>,

    /// Stop after this many cycles of each processor.
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Run each processor on a host thread of its own.
    #[arg(long)]
    threaded: bool,

    /// Report the processor state each time the instruction counter
    /// reaches this octal address.  May be given more than once.
    #[arg(long = "break", value_parser = parse_octal)]
    breakpoints: Vec<u32>,
}

fn parse_octal(s: &str) -> Result<u32, String> {
    let value = u32::from_str_radix(s, 8).map_err(|e| format!("'{s}' is not octal: {e}"))?;
    if value >> 18 != 0 {
        Err(format!("{s} does not fit in 18 bits"))
    } else {
        Ok(value)
    }
}

#[derive(Debug)]
enum Fail {
    InitialisationFailure(String),
    BadConfiguration(String),
    BadImage(String),
}

impl Display for Fail {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Fail::InitialisationFailure(msg) => f.write_str(msg.as_str()),
            Fail::BadConfiguration(msg) => write!(f, "configuration error: {msg}"),
            Fail::BadImage(msg) => write!(f, "memory image error: {msg}"),
        }
    }
}

impl Error for Fail {}

fn read_config(args: &Args) -> Result<SystemConfig, Fail> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| Fail::BadConfiguration(format!("{}: {e}", path.display())))?;
            serde_json::from_str(&text)
                .map_err(|e| Fail::BadConfiguration(format!("{}: {e}", path.display())))?
        }
        None => SystemConfig::default(),
    };
    if args.threaded {
        config.scheduling = SchedulingModel::ThreadPerProcessor;
    }
    Ok(config)
}

fn load_image(system: &System, path: &PathBuf) -> Result<(), Fail> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Fail::BadImage(format!("{}: {e}", path.display())))?;
    let segments = load::parse_image(&text)
        .map_err(|e| Fail::BadImage(format!("{}: {e}", path.display())))?;
    let mut total = 0;
    for segment in segments {
        system
            .memory()
            .load(segment.start, &segment.words)
            .map_err(|e| Fail::BadImage(e.to_string()))?;
        total += segment.words.len();
    }
    event!(
        Level::INFO,
        "loaded {} words from {}",
        total,
        path.display()
    );
    Ok(())
}

fn report(system: &System) {
    for cpu in system.processors() {
        event!(
            Level::INFO,
            "{} after {} cycles; A={:012o} Q={:012o}",
            cpu.diagnostics(),
            cpu.cycles(),
            cpu.regs.a,
            cpu.regs.q
        );
        for code in FaultCode::all_fault_codes() {
            let n = cpu.fault_count(code);
            if n > 0 {
                event!(
                    Level::INFO,
                    "cpu {}: {} {} faults",
                    cpu.index(),
                    n,
                    code.name()
                );
            }
        }
    }
}

fn run_emulator() -> Result<i32, Fail> {
    let args = Args::parse();

    // See
    // https://docs.rs/tracing-subscriber/0.3/tracing_subscriber/fmt/index.html#filtering-events-with-environment-variables
    // for instructions on how to select which trace messages get
    // printed.
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let filter_layer = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
    {
        Err(e) => {
            return Err(Fail::InitialisationFailure(format!(
                "failed to initialise tracing filter (perhaps there is a problem with environment variables): {e}"
            )));
        }
        Ok(layer) => layer,
    };
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let config = read_config(&args)?;
    let mut system = System::new(config, |_| ProcessorParts::standard(Box::new(MinimalExecutor)))
        .map_err(|e| Fail::BadConfiguration(e.to_string()))?;
    if let Some(path) = &args.load {
        load_image(&system, path)?;
    }
    if let Some(start) = args.start {
        if let Some(cpu) = system.processor_mut(0) {
            cpu.regs.ppr.ic = Word18::truncating(start);
        }
    }
    for address in args.breakpoints.iter() {
        system.host().set_breakpoint(Word18::truncating(*address));
    }

    let span = span!(Level::INFO, "run", max_cycles = ?args.max_cycles);
    let _enter = span.enter();
    let stop = loop {
        match system.run(args.max_cycles) {
            HostStop::Breakpoint => {
                report(&system);
            }
            other => break other,
        }
    };
    report(&system);
    Ok(match stop {
        HostStop::Unexpected(_) => 1,
        HostStop::ExecutorStop(code) => i32::try_from(code).unwrap_or(i32::MAX),
        HostStop::Breakpoint | HostStop::OperatorStop | HostStop::CycleLimit => 0,
    })
}

fn main() {
    match run_emulator() {
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
        Ok(status) => {
            std::process::exit(status);
        }
    }
}

#[test]
fn test_parse_octal() {
    assert_eq!(parse_octal("1000"), Ok(0o1000));
    assert!(parse_octal("9").is_err());
    assert!(parse_octal("1000000").is_err());
}
