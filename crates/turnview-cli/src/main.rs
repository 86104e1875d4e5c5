use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use turnview::{process_turn, ResponseEvent};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Some(path) = std::env::args().nth(1) else {
        bail!("Usage: turnview <recorded-turn.json>");
    };

    let raw = std::fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
    let events: Vec<ResponseEvent> =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse events in {path}"))?;

    let view = process_turn(events)?;

    println!("{}", view.rendered());

    println!("\n--- Trace ---");
    for section in &view.trace {
        println!("\n{}", section.heading);
        if section.steps.is_empty() {
            println!("  None");
            continue;
        }
        for step in &section.steps {
            println!("  Step {}", step.index);
            for fragment in &step.fragments {
                let pretty = serde_json::to_string_pretty(fragment)?;
                for line in pretty.lines() {
                    println!("    {line}");
                }
            }
        }
    }

    println!("\n--- Citations ---");
    if view.annotated.entries.is_empty() {
        println!("None");
    }
    for entry in &view.annotated.entries {
        let location = entry.location.as_deref().unwrap_or("(unresolved)");
        match &entry.title {
            Some(title) => println!(
                "[{}] reference {}: {title} ({location})",
                entry.ordinal, entry.occurrence
            ),
            None => println!("[{}] reference {}: {location}", entry.ordinal, entry.occurrence),
        }
    }

    Ok(())
}
