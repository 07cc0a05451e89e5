use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use colored::Colorize;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use oneshot::config::{Config, DEFAULT_CALL_PATTERN, DEFAULT_LOOKBACK};
use oneshot::elf::LibraryImage;
use oneshot::gadget::{self, Gadget};
use oneshot::one_gadget::{self, Source};
use oneshot::types::Arch;

#[derive(Parser)]
#[command(name = "oneshot", version, about = "Find one-shot execve(\"/bin/sh\") gadgets in libc")]
struct Cli {
    /// C library to search
    library: PathBuf,

    /// Architecture (amd64, i386); detected from the ELF header by default
    #[arg(short, long)]
    arch: Option<Arch>,

    /// Instructions kept in front of each call site
    #[arg(short, long, default_value_t = DEFAULT_LOOKBACK)]
    lookback: usize,

    /// Call targets treated as spawning a program (regex)
    #[arg(long, default_value = DEFAULT_CALL_PATTERN)]
    calls: String,

    /// Disassemble with GNU objdump instead of the built-in decoder
    #[arg(long)]
    objdump: bool,

    /// Worker threads (default: one per CPU)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Order gadgets by distance to these functions (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    near: Vec<String>,

    /// Load base added to every printed offset (hex or decimal)
    #[arg(short, long, value_parser = parse_addr, default_value = "0")]
    base: u64,

    /// Print offsets only
    #[arg(short, long, conflicts_with = "json")]
    raw: bool,

    /// Print gadgets as JSON
    #[arg(long)]
    json: bool,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_addr(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address {:?}: {}", s, e))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    SimpleLogger::new().with_level(level).env().init()?;

    if let Some(jobs) = cli.jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .context("configure worker pool")?;
    }

    let image = LibraryImage::load(&cli.library)
        .with_context(|| format!("load {}", cli.library.display()))?;
    let arch = cli.arch.unwrap_or_else(|| image.arch());
    if let Some(id) = image.build_id() {
        log::info!("{} build-id {}", image.path(), id);
    }

    let config = Config::new(cli.lookback, &cli.calls)?;
    let source = if cli.objdump { Source::Objdump } else { Source::Builtin };
    let mut gadgets = one_gadget::find_one_gadgets(&image, &config, arch, source)?;

    if !cli.near.is_empty() {
        let mut targets = Vec::new();
        for name in &cli.near {
            match image.symbol_addr(name) {
                Some(addr) => targets.push(addr),
                None => bail!("no function named {:?} in {}", name, image.path()),
            }
        }
        gadget::sort_by_proximity(&mut gadgets, &targets);
    }

    print_gadgets(&cli, &gadgets)
}

fn print_gadgets(cli: &Cli, gadgets: &[Gadget]) -> anyhow::Result<()> {
    if cli.json {
        println!("{}", gadget::to_json(gadgets)?);
    } else if cli.raw {
        println!("{}", gadget::format_raw(gadgets, cli.base));
    } else if gadgets.is_empty() {
        println!("{}", "No gadgets found.".yellow());
    } else {
        println!("{}", gadget::format_gadgets(gadgets, cli.base));
    }
    Ok(())
}
