use std::collections::VecDeque;
use std::error::Error;
use std::fs;
use std::process::ExitCode;

use keras_import::{convert, onnx};

struct Args {
    /// ONNX model file to convert.
    source: String,

    /// Destination path for the Keras architecture JSON.
    dest: String,

    /// Print a layer table after conversion.
    summary: bool,

    /// Enable verbose logging for the conversion.
    verbose: bool,
}

fn parse_args() -> Result<Args, lexopt::Error> {
    use lexopt::prelude::*;

    let mut values = VecDeque::new();
    let mut summary = false;
    let mut verbose = false;

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Value(val) => values.push_back(val.string()?),
            Short('s') | Long("summary") => summary = true,
            Short('v') | Long("verbose") => verbose = true,
            Short('h') | Long("help") => {
                println!(
                    "Convert ONNX models into Keras-style layer graphs.

Usage: {bin_name} [OPTIONS] <source.onnx> <dest.json>

  -s, --summary  Print a layer summary after conversion
  -v, --verbose  Enable verbose logging
  -h, --help     Print help
",
                    bin_name = parser.bin_name().unwrap_or("keras-import")
                );
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected()),
        }
    }

    let source = values.pop_front().ok_or("missing `<source.onnx>` arg")?;
    let dest = values.pop_front().ok_or("missing `<dest.json>` arg")?;

    Ok(Args {
        source,
        dest,
        summary,
        verbose,
    })
}

fn init_logger(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let graph = onnx::load_file(&args.source)?;
    let model = convert(&graph)?;

    if args.summary {
        print!("{}", model.summary());
    }

    fs::write(&args.dest, model.to_json().to_string())?;
    Ok(())
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::FAILURE;
        }
    };
    init_logger(args.verbose);

    if let Err(err) = run(&args) {
        eprintln!("error: {}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
