use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use seqstore::codec::{self, Value};
use seqstore::LogStructuredStore;

fn open(dir: &Path) -> Result<LogStructuredStore> {
    LogStructuredStore::open(dir).with_context(|| format!("failed to open log store at {}", dir.display()))
}

pub fn inspect_key(dir: &Path, key: &str) -> Result<()> {
    let store = open(dir)?;

    // Retrieve the raw value and show it decoded when possible
    match store.get(key.as_bytes())? {
        Some(raw) => match codec::decode(&raw) {
            Ok(Value::Sequence(items)) => {
                println!("Key '{}' holds a sequence of {} element(s):", key, items.len());
                for (i, item) in items.iter().enumerate() {
                    println!("  [{}] {:?}", i, item);
                }
            }
            Ok(Value::Text(text)) => println!("Key '{}' holds text: {:?}", key, text),
            Err(e) => println!("Key '{}' holds {} undecodable byte(s) ({}): {:?}", key, raw.len(), e, raw),
        },
        None => println!("Key '{}' not found in log store.", key),
    }
    Ok(())
}

pub fn list_active_keys(dir: &Path) -> Result<()> {
    let store = open(dir)?;
    let keys = store.keys()?;
    println!(
        "{} active key(s) in {} segment(s):",
        keys.len(),
        store.segment_count()?
    );
    for key in keys {
        println!("  {}", String::from_utf8_lossy(&key));
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() == 4 && args[1] == "--get" {
        // Usage: inspect_log --get <log_dir> <key>
        inspect_key(Path::new(&args[2]), &args[3])
    } else if args.len() == 3 && args[1] == "--list" {
        // Usage: inspect_log --list <log_dir>
        list_active_keys(Path::new(&args[2]))
    } else {
        eprintln!("Usage:");
        eprintln!("  {} --get <log_dir> <key>   # Show the value stored under a key", args[0]);
        eprintln!("  {} --list <log_dir>        # List all active keys", args[0]);
        std::process::exit(1);
    }
}
