//! Assembler front-end: reads a source file (or stdin), assembles it
//! against a chosen target dialect, and writes an object record stream
//! to a file (or stdout).

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use corevm::error::AssembleError;
use corevm::object::ObjectWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Target {
    Iris,
    Cisc0,
}

/// Assemble an `iris` or `cisc0` source file into an object record stream.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the source file, or `-` for standard input.
    input: PathBuf,

    /// Output path; `-` routes to standard output.
    #[arg(short = 'o', long = "output", default_value = "-")]
    output: PathBuf,

    /// Target dialect.
    #[arg(short = 't', long = "target")]
    target: Target,
}

fn read_source(path: &std::path::Path) -> io::Result<String> {
    if path == std::path::Path::new("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        let mut buf = String::new();
        File::open(path)?.read_to_string(&mut buf)?;
        Ok(buf)
    }
}

fn write_records(path: &std::path::Path, records: Vec<corevm::object::Record>) -> io::Result<()> {
    if path == std::path::Path::new("-") {
        let mut writer = ObjectWriter::new(io::stdout().lock());
        for record in records {
            writer.write_record(record).map_err(io::Error::other)?;
        }
    } else {
        let mut writer = ObjectWriter::new(File::create(path)?);
        for record in records {
            writer.write_record(record).map_err(io::Error::other)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let source = match read_source(&args.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error reading {}: {e}", args.input.display());
            return ExitCode::from(1);
        }
    };

    let assembled = match args.target {
        Target::Iris => corevm::iris::asm::assemble(&source),
        Target::Cisc0 => corevm::cisc0::asm::assemble(&source),
    };

    let records = match assembled {
        Ok(records) => records,
        Err(AssembleError::UndefinedLabel(name)) => {
            eprintln!("undefined label: {name}");
            return ExitCode::from(2);
        }
        Err(e @ AssembleError::Parse(..)) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = write_records(&args.output, records) {
        eprintln!("error writing {}: {e}", args.output.display());
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
