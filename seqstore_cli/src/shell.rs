use std::io::Write;

use anyhow::{bail, Result};
use seqstore::{LogStructuredStore, SequenceStore};

pub const HELP: &str = "Commands: get <k>, set <k> [items...], append <k> <item>, item-get <k>, \
item-set <k> <text>, remove <k>, keys, clear, compact, quit";

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Run one shell line against `store`, writing results to `out`.
///
/// Items are whitespace separated; `item-set` keeps the rest of the line as the text.
pub fn execute(store: &SequenceStore<LogStructuredStore>, line: &str, out: &mut dyn Write) -> Result<Flow> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(cmd) = tokens.first() else {
        return Ok(Flow::Continue);
    };

    match (cmd.to_lowercase().as_str(), tokens.len()) {
        ("get", 2) => {
            let items = store.get_sequence(tokens[1])?;
            writeln!(out, "{} element(s)", items.len())?;
            for (i, item) in items.iter().enumerate() {
                writeln!(out, "  [{}] {:?}", i, item)?;
            }
        }
        ("set", n) if n >= 2 => {
            store.set_sequence(tokens[1], &tokens[2..])?;
            writeln!(out, "Stored {} element(s) under '{}'", n - 2, tokens[1])?;
        }
        ("append", 3) => {
            store.append_to_sequence(tokens[1], tokens[2])?;
            writeln!(out, "Appended to '{}'", tokens[1])?;
        }
        ("item-get", 2) => match store.get_item(tokens[1])? {
            Some(text) => writeln!(out, "{:?}", text)?,
            None => writeln!(out, "'{}' not found", tokens[1])?,
        },
        ("item-set", n) if n >= 3 => {
            store.set_item(tokens[1], &tokens[2..].join(" "))?;
            writeln!(out, "Stored text under '{}'", tokens[1])?;
        }
        ("remove", 2) => {
            store.remove_item(tokens[1])?;
            writeln!(out, "Removed '{}'", tokens[1])?;
        }
        ("keys", 1) => {
            for key in store.keys()? {
                writeln!(out, "{}", key)?;
            }
        }
        ("clear", 1) => {
            store.clear()?;
            writeln!(out, "Cleared")?;
        }
        ("compact", 1) => {
            store.compact()?;
            writeln!(out, "Compacted into {} segment(s)", store.backend().segment_count()?)?;
        }
        ("quit" | "exit", 1) => return Ok(Flow::Quit),
        ("help", _) => writeln!(out, "{}", HELP)?,
        _ => bail!("invalid command. {}", HELP),
    }
    Ok(Flow::Continue)
}
