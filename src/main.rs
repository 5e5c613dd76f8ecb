use std::path::PathBuf;

use clap::Parser;
use daqc::{ConvertOptions, ConverterRegistry, GraphError, compile, load_graph_from_path, logger};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Lower ONNX models into DAQ models", long_about = None)]
struct Cli {
    /// Path to the source model (.onnx or .json graph description)
    input: PathBuf,
    /// Path to write the converted model
    output: PathBuf,
    /// Output format (`daq` or `json`).
    #[arg(long, default_value = "daq")]
    format: String,
    /// Log verbosity (off, error, warn, info, debug, trace).
    #[arg(long, default_value = "warn")]
    log_level: LevelFilter,
    /// Lower the graph as is, without folding BatchNormalization into Conv.
    #[arg(long)]
    skip_optimizer: bool,
}

fn run() -> Result<(), GraphError> {
    let cli = Cli::parse();
    if let Err(err) = logger::init_log(cli.log_level) {
        eprintln!("warning: logging disabled: {}", err);
    }

    let graph = load_graph_from_path(&cli.input)?;
    let options = ConvertOptions {
        optimize: !cli.skip_optimizer,
    };
    let lowered = compile(&graph, &options)?;
    let converted = ConverterRegistry::with_defaults().convert(&cli.format, &lowered.model)?;

    std::fs::write(&cli.output, &converted.data)
        .map_err(|err| GraphError::export(cli.output.clone(), err))?;

    println!(
        "Converted `{}` to `{}` format at `{}` (type {}).",
        cli.input.display(),
        converted.format,
        cli.output.display(),
        converted.content_type
    );
    println!(
        "  {} inputs, {} tensors, {} layers",
        lowered.model.inputs.len(),
        lowered.model.tensors.len(),
        lowered.model.layers.len()
    );
    for input in &lowered.model.inputs {
        println!("  - input {}: {:?}", input.name, input.shape);
    }
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
