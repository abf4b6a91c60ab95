//! Export a stored user dictionary as JSON.
//!
//! Usage:
//!   cargo run -p libtranslit-tools --bin export_userdict -- --db user.redb --input-tool hi
//!   cargo run -p libtranslit-tools --bin export_userdict -- --db user.redb --all --output dump.json

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use libtranslit_core::{Config, PersistenceStore, RedbStore};
use libtranslit_tools::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "export_userdict")]
#[command(about = "Export a user dictionary from a redb store as JSON")]
struct Args {
    /// Path to the user dictionary database
    #[arg(short, long)]
    db: PathBuf,

    /// Input tool whose dictionary to export
    #[arg(short, long, default_value = "translit")]
    input_tool: String,

    /// Export every stored key instead of one input tool
    #[arg(long)]
    all: bool,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    if !args.db.exists() {
        bail!("no database at {}", args.db.display());
    }
    let store = RedbStore::new(&args.db)?;

    let keys = if args.all {
        store.keys()?
    } else {
        let config = Config {
            input_tool: args.input_tool.clone(),
            ..Config::default()
        };
        vec![config.user_dict_key()]
    };

    let mut dump: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    for key in keys {
        let Some(raw) = store.get_item(&key) else {
            tracing::warn!(key = %key, "no stored dictionary");
            continue;
        };
        let value = serde_json::from_str(&raw).with_context(|| format!("parse {}", key))?;
        dump.insert(key, value);
    }

    let output = if args.all {
        serde_json::to_string_pretty(&dump)?
    } else {
        let value = dump.into_values().next().unwrap_or(serde_json::Value::Null);
        serde_json::to_string_pretty(&value)?
    };

    if let Some(path) = args.output {
        std::fs::write(&path, output).with_context(|| format!("write {}", path.display()))?;
    } else {
        println!("{}", output);
    }
    Ok(())
}
