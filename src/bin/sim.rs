//! Simulator front-end: loads an object record stream into a chosen
//! core and runs it to completion, bridging the core's virtual stdio to
//! the process's real stdio.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use corevm::cisc0;
use corevm::iris;
use corevm::object::{ObjectReader, Segment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Target {
    Iris,
    Cisc0,
}

/// Run an assembled object file against the `iris` or `cisc0` core
/// until it halts or faults.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the object file, or `-` for standard input.
    input: PathBuf,

    /// Core to run the image against.
    #[arg(short = 't', long = "target")]
    target: Target,

    /// After halting, print a human-readable summary of the register
    /// file and memory segment sizes to stderr.
    #[arg(long)]
    dump: bool,

    /// After halting, write the persisted state layout (register file,
    /// little-endian, then each memory segment in its native order) to
    /// this path, or `-` for standard output.
    #[arg(long = "dump-file")]
    dump_file: Option<PathBuf>,
}

fn write_dump(path: &std::path::Path, bytes: &[u8]) -> io::Result<()> {
    if path == std::path::Path::new("-") {
        io::stdout().write_all(bytes)
    } else {
        File::create(path)?.write_all(bytes)
    }
}

fn read_records(path: &std::path::Path) -> Result<Vec<corevm::object::Record>, io::Error> {
    let records: Result<Vec<_>, _> = if path == std::path::Path::new("-") {
        ObjectReader::new(io::stdin().lock()).collect()
    } else {
        ObjectReader::new(File::open(path)?).collect()
    };
    records.map_err(io::Error::other)
}

/// Drains the process's real stdin into the core's virtual stdin queue
/// up front, rather than blocking on a read every cycle — this binary
/// targets batch-style object files with no debugger protocol or
/// interactive stepping, so the getc device pops from an already-filled
/// queue instead of the process's stdin directly.
fn fill_stdin(devices: &mut corevm::io::Devices) {
    let mut input = Vec::new();
    if io::stdin().read_to_end(&mut input).is_ok() {
        for byte in input {
            devices.push_stdin(byte);
        }
    }
}

fn flush_stdout(devices: &mut corevm::io::Devices) {
    let out = devices.take_stdout();
    if !out.is_empty() {
        io::stdout().write_all(&out).ok();
        io::stdout().flush().ok();
    }
}

fn run_iris(records: Vec<corevm::object::Record>) -> Result<iris::interp::Core, String> {
    let mut core = iris::interp::Core::new();
    core.initialize();
    for record in &records {
        match record.segment {
            Segment::Code => core.code.write(record.address, record.value),
            Segment::Data => core.data.write(record.address, record.value),
        }
        .map_err(|e| e.to_string())?;
    }
    fill_stdin(&mut core.devices);
    while !core.halted {
        core.cycle().map_err(|e| e.to_string())?;
        flush_stdout(&mut core.devices);
    }
    Ok(core)
}

fn run_cisc0(records: Vec<corevm::object::Record>) -> Result<cisc0::interp::Core, String> {
    let mut core = cisc0::interp::Core::new();
    core.initialize();
    for record in &records {
        core.memory
            .write(record.address, record.value)
            .map_err(|e| e.to_string())?;
    }
    fill_stdin(&mut core.devices);
    while !core.halted {
        core.cycle().map_err(|e| e.to_string())?;
        flush_stdout(&mut core.devices);
    }
    Ok(core)
}

fn dump_iris(core: &iris::interp::Core) {
    eprintln!("registers:");
    for (i, value) in core.gpr.iter().enumerate() {
        eprintln!("  r{i} = {value:#06x}");
    }
    eprintln!("code: {} cells", core.code.len());
    eprintln!("data: {} words", core.data.len());
    eprintln!("stack: {} words", core.stack.len());
}

fn dump_cisc0(core: &cisc0::interp::Core) {
    eprintln!("registers:");
    for (i, value) in core.gpr.iter().enumerate() {
        eprintln!("  r{i} = {value:#010x}");
    }
    eprintln!("memory: {} words", core.memory.len());
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let records = match read_records(&args.input) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("error reading {}: {e}", args.input.display());
            return ExitCode::from(1);
        }
    };

    match args.target {
        Target::Iris => match run_iris(records) {
            Ok(core) => {
                if args.dump {
                    dump_iris(&core);
                }
                if let Some(path) = &args.dump_file {
                    if let Err(e) = write_dump(path, &core.dump()) {
                        eprintln!("error writing dump to {}: {e}", path.display());
                        return ExitCode::from(1);
                    }
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::from(1)
            }
        },
        Target::Cisc0 => match run_cisc0(records) {
            Ok(core) => {
                if args.dump {
                    dump_cisc0(&core);
                }
                if let Some(path) = &args.dump_file {
                    if let Err(e) = write_dump(path, &core.dump()) {
                        eprintln!("error writing dump to {}: {e}", path.display());
                        return ExitCode::from(1);
                    }
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::from(1)
            }
        },
    }
}
