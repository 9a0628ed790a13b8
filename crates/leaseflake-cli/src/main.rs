#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use std::{
    io::{self, BufWriter, Write},
    sync::Arc,
    time::UNIX_EPOCH,
};

use clap::Parser;
use config::{Action, AppConfig, CliArgs};
use leaseflake::{MonotonicClock, Node, Pattern, TimeSource};
use telemetry::init_telemetry;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = AppConfig::try_from(args)?;

    init_telemetry()?;
    tracing::debug!("Starting with config: {:#?}", config);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    match config.action {
        Action::Generate {
            count,
            node_id,
            safe,
            wait,
            monotonic,
        } => {
            let builder = config
                .pattern
                .node_builder()
                .node_id(node_id)
                .safe(safe)
                .wait_method(wait);
            if monotonic {
                let node = builder.clock(MonotonicClock::new()).build()?;
                generate(&node, count, &mut out)?;
            } else {
                let node = builder.build()?;
                generate(&node, count, &mut out)?;
            }
        }
        Action::Decode { ids } => {
            for id in ids {
                decode(&config.pattern, id, &mut out)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn generate<T: TimeSource>(node: &Node<T>, count: usize, out: &mut impl Write) -> anyhow::Result<()> {
    tracing::debug!(?node, count, "Generating IDs");
    for _ in 0..count {
        writeln!(out, "{}", node.generate()?)?;
    }
    Ok(())
}

fn decode(pattern: &Arc<Pattern>, id: i64, out: &mut impl Write) -> anyhow::Result<()> {
    let parts = pattern.decompose(id);
    let millis = pattern
        .timestamp_of(id)
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    writeln!(
        out,
        "{id}\ttick={}\tnode_id={}\tsequence={}\tunix_ms={millis}",
        parts.tick, parts.node_id, parts.sequence
    )?;
    Ok(())
}
