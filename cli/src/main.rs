use std::path::Path;

use anyhow::Context;
use clap::Parser;

use buildfox::Engine;

use crate::cli::Args;

mod cli;

static FOX_CORE: &str = include_str!("../fox_core.fox");

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut engine = Engine::new();

    for define in &args.defines {
        let (name, value) = define
            .split_once('=')
            .with_context(|| format!("define '{define}' is not in NAME=VALUE form"))?;
        engine.assign(name, value)?;
    }

    if !args.no_core {
        engine.load_core(FOX_CORE)?;
    }

    let input = args.input.to_string_lossy();
    engine
        .load(&input)
        .with_context(|| format!("failed to generate from {input}"))?;

    let output = if args.output == "-" {
        None
    } else {
        Some(Path::new(&args.output))
    };
    engine.save(output)?;

    Ok(())
}
