use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use sim65::{ErrorLevel, MemoryFill, Profile, Sim, SimConfig};

fn parse_hex(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches('$').trim_start_matches("0x");
    u16::from_str_radix(digits, 16).map_err(|e| format!("bad address '{}': {}", s, e))
}

/// Run a raw 6502 binary image.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Raw binary image
    image: PathBuf,
    /// Load address (hex)
    #[arg(short, long, value_parser = parse_hex, default_value = "0600")]
    origin: u16,
    /// Entry point (hex), defaults to the load address
    #[arg(short, long, value_parser = parse_hex)]
    entry: Option<u16>,
    /// Load the image as ROM
    #[arg(long)]
    rom: bool,
    /// Label file
    #[arg(short, long)]
    labels: Option<PathBuf>,
    /// JSON configuration file; flags override its values. With a random
    /// `fill`, memory outside the image keeps the random bytes and is
    /// treated as never written.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Trace every instruction to stderr
    #[arg(short, long)]
    trace: bool,
    /// none, memory or full
    #[arg(long)]
    error_level: Option<ErrorLevel>,
    #[arg(long)]
    cycle_limit: Option<u64>,
    /// Write the execution profile here
    #[arg(long)]
    profile_out: Option<PathBuf>,
    /// Accumulate into an existing profile
    #[arg(long)]
    profile_in: Option<PathBuf>,
    /// Print a JSON summary of the N most expensive addresses
    #[arg(long, value_name = "N")]
    report: Option<usize>,
    /// Print prometheus counters to stderr when done
    #[arg(long)]
    metrics: bool,
    /// Disassemble N instructions from the entry point instead of running
    #[arg(long, value_name = "N")]
    disasm: Option<usize>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("sim65: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<SimConfig, String> {
    let mut config = match &args.config {
        Some(path) => SimConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => SimConfig::default(),
    };
    if let Some(level) = args.error_level {
        config.error_level = level;
    }
    if let Some(limit) = args.cycle_limit {
        config.cycle_limit = limit;
    }
    config.trace |= args.trace;
    config.metrics |= args.metrics;
    config.profile |=
        args.profile_out.is_some() || args.profile_in.is_some() || args.report.is_some();
    Ok(config)
}

/// Loads the image and declares the rest of memory as RAM: zeroed, or holding
/// the random fill and flagged as uninitialized.
fn load_image(
    sim: &mut Sim,
    path: &Path,
    origin: u16,
    rom: bool,
    fill: MemoryFill,
) -> Result<(), String> {
    let image = std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let size = sim.memory().size();
    if origin as usize + image.len() > size {
        return Err(format!(
            "{}: {} bytes at ${:04X} do not fit in {} bytes of memory",
            path.display(),
            image.len(),
            origin,
            size
        ));
    }
    let mem = sim.memory_mut();
    mem.add_ram(0, size, fill == MemoryFill::Zero);
    if rom {
        mem.add_rom(origin as usize, &image);
    } else {
        mem.add_data_ram(origin as usize, &image);
    }
    info!("loaded {} bytes at ${:04X}", image.len(), origin);
    Ok(())
}

fn run(args: &Args) -> Result<ExitCode, String> {
    let config = load_config(args)?;
    let mut sim = Sim::with_config(&config);
    load_image(&mut sim, &args.image, args.origin, args.rom, config.fill)?;

    if let Some(path) = &args.labels {
        let file = File::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        let count = sim
            .memory_mut()
            .load_labels(BufReader::new(file))
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        info!("loaded {} labels", count);
    }

    let entry = args.entry.unwrap_or(args.origin);
    if let Some(count) = args.disasm {
        for info in sim.memory().disassemble(entry, count) {
            println!("{}", info);
        }
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(path) = &args.profile_in {
        Profile::load_file(path)
            .and_then(|profile| sim.set_profile(profile))
            .map_err(|e| format!("{}: {}", path.display(), e))?;
    }

    let result = sim.call(entry);
    println!("{}", sim.regs);
    println!("cycles: {}", sim.cycles());

    if let Some(profile) = sim.profile() {
        if let Some(path) = &args.profile_out {
            profile
                .save_file(path)
                .map_err(|e| format!("{}: {}", path.display(), e))?;
        }
        if let Some(top) = args.report {
            let report = profile.report(sim.memory(), top);
            let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
            println!("{}", json);
        }
    }
    if config.metrics {
        eprint!("{}", sim65::metrics::render());
    }

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(fault) => {
            eprintln!("sim65: stopped: {}", fault);
            Ok(ExitCode::FAILURE)
        }
    }
}
