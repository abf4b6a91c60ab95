//! Decode words against a model from the command line.
//!
//! Usage:
//!   cargo run -p libtranslit-tools --bin translit -- --model hi.bin --syllables hi.syl namaste
//!   echo namaste | cargo run -p libtranslit-tools --bin translit -- --model hi.bin --syllables hi.syl --json
//!   cargo run -p libtranslit-tools --bin translit -- --model hi.bin --syllables hi.syl \
//!       --userdict user.redb --commit namaste=नमस्ते

use std::io::BufRead;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use libtranslit_core::{Config, Engine, PersistenceStore, RedbStore, SyllableSegmenter};
use libtranslit_tools::{init_tracing, model_source, read_list};

#[derive(Parser, Debug)]
#[command(name = "translit")]
#[command(about = "Transliterate words with a packed model")]
struct Args {
    /// Model file (.json or bincode)
    #[arg(short, long)]
    model: PathBuf,

    /// Token inventory, one token per line
    #[arg(short, long)]
    syllables: PathBuf,

    /// Comma-separated initials for abbreviated input
    #[arg(long, value_delimiter = ',')]
    initials: Vec<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Persistent user dictionary (redb)
    #[arg(short, long)]
    userdict: Option<PathBuf>,

    /// Record commits before decoding, as source=target
    #[arg(long)]
    commit: Vec<String>,

    /// Candidates per word
    #[arg(short = 'n', long, default_value_t = 5)]
    results: usize,

    /// Print one JSON response per line
    #[arg(long)]
    json: bool,

    /// Words to decode (default: read lines from stdin)
    words: Vec<String>,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_toml(path)
            .map_err(|e| anyhow!("load config {}: {}", path.display(), e))?,
        None => Config::default(),
    };

    let syllables = read_list(&args.syllables)?;
    let segmenter = SyllableSegmenter::new(&syllables).with_initials(&args.initials);

    let store = match &args.userdict {
        Some(path) => {
            let store: Rc<dyn PersistenceStore> = Rc::new(RedbStore::new(path)?);
            Some(store)
        }
        None => None,
    };

    let mut engine = Engine::new(config, segmenter, store);
    engine.load_model(&*model_source(&args.model))?;

    for pair in &args.commit {
        let (source, target) = pair
            .split_once('=')
            .with_context(|| format!("commit {:?} is not source=target", pair))?;
        engine.add_user_commits(source, target);
    }

    let words: Vec<String> = if args.words.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<std::io::Result<_>>()
            .context("read stdin")?
    } else {
        args.words.clone()
    };

    for word in words.iter().map(|w| w.trim()).filter(|w| !w.is_empty()) {
        let response = engine.decode(word, args.results);
        if args.json {
            println!("{}", serde_json::to_string(&response)?);
            continue;
        }
        match response {
            Some(r) => {
                let rendered: Vec<String> = r
                    .candidates
                    .iter()
                    .map(|c| format!("{} ({:.3})", c.text, c.score))
                    .collect();
                println!("{}\t{}\t{}", word, r.tokens.join("'"), rendered.join("  "));
            }
            None => println!("{}\t-", word),
        }
    }

    if !args.commit.is_empty() {
        engine.persist()?;
    }
    Ok(())
}
