use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use ripple_feed::config;
use ripple_feed::feed::{FeedAssembler, FeedVariant};
use ripple_feed::store;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    Following,
    Home,
    Shorts,
    Popular,
}

#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Viewer whose feed is assembled
    #[arg(long)]
    viewer: Uuid,

    #[arg(long, value_enum, default_value = "home")]
    variant: Variant,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let store = store::connect(&cfg.store).await?;
    let feed = FeedAssembler::new(store, &cfg.feed);

    let response = match args.variant {
        Variant::Following => feed.assemble(args.viewer, FeedVariant::Following, Utc::now()).await?,
        Variant::Home => feed.assemble(args.viewer, FeedVariant::Home, Utc::now()).await?,
        Variant::Shorts => feed.assemble(args.viewer, FeedVariant::Shorts, Utc::now()).await?,
        Variant::Popular => feed.popular(args.viewer).await?,
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
