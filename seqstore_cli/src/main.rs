use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use rustyline::Editor;
use seqstore::SequenceStore;
use seqstore_common::config::StoreConfig;

mod shell;

use shell::{execute, Flow, HELP};

const DEFAULT_DIR: &str = "./seqstore_data";

#[derive(Parser, Debug)]
#[clap(name = "seqstore")]
struct Options {
    /// JSON config file
    #[clap(short, long)]
    config: Option<String>,

    /// Storage directory for the log segments; overrides the config file
    #[clap(short, long)]
    dir: Option<String>,
}

fn load_config(options: &Options) -> Result<StoreConfig> {
    let mut config = match &options.config {
        Some(path) => StoreConfig::from_file(path).with_context(|| format!("failed to load config {}", path))?,
        None => StoreConfig::new(DEFAULT_DIR),
    };
    if let Some(dir) = &options.dir {
        config.storage_dir = dir.clone();
    }
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::init();
    let options = Options::parse();
    let config = load_config(&options)?;
    let store = SequenceStore::open(&config)
        .with_context(|| format!("failed to open store at {}", config.storage_dir))?;

    let mut rl = Editor::<()>::new()?;
    println!("Welcome to the seqstore shell. {}", HELP);

    let mut stdout = std::io::stdout();
    loop {
        match rl.readline("seqstore> ") {
            Ok(input) => {
                rl.add_history_entry(input.as_str());
                match execute(&store, &input, &mut stdout) {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => eprintln!("Error: {:#}", e),
                }
            }
            Err(_) => break,
        }
    }

    store.flush()?;
    info!("seqstore shell exiting");
    Ok(())
}
