//! Build a packed transliteration model from TSV lexicons.
//!
//! Usage:
//!   cargo run -p libtranslit-tools --bin build_model -- --input hi.tsv --output hi.bin
//!   cargo run -p libtranslit-tools --bin build_model -- --input a.tsv --input b.tsv --output hi.json

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use libtranslit_core::model::DEFAULT_PROB_SCALE;
use libtranslit_core::ModelBuilder;
use libtranslit_tools::{init_tracing, read_lexicon, ModelFormat};

#[derive(Parser, Debug)]
#[command(name = "build_model")]
#[command(about = "Build a transliteration model from source<TAB>target<TAB>log_prob rows")]
struct Args {
    /// Lexicon TSV files; repeated pairs keep the higher log-probability
    #[arg(short, long, required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Output model file
    #[arg(short, long)]
    output: PathBuf,

    /// Output format: json or bincode (default: from the output extension)
    #[arg(short, long)]
    format: Option<String>,

    /// Probability quantization scale
    #[arg(long, default_value_t = DEFAULT_PROB_SCALE)]
    scale: f64,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut builder = ModelBuilder::new().with_default_prob(args.scale);
    for path in &args.input {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let rows = read_lexicon(BufReader::new(file), &mut builder)
            .with_context(|| format!("parse {}", path.display()))?;
        tracing::info!(path = %path.display(), rows, "read lexicon");
    }

    let model = builder.build()?;
    let format = match &args.format {
        Some(name) => ModelFormat::parse(name)?,
        None => ModelFormat::from_path(&args.output),
    };
    match format {
        ModelFormat::Json => model.save_json(&args.output)?,
        ModelFormat::Bincode => model.save_bincode(&args.output)?,
    }

    println!(
        "Wrote {} sources / {} targets to {}",
        model.source_segments.len(),
        model.target_segments.len(),
        args.output.display()
    );
    Ok(())
}
