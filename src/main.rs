use clap::Parser;
use tracing_subscriber::EnvFilter;

mod api;
mod app;
mod chat;
mod cli;
mod color;
mod config;
mod doc_id;
mod hover;
mod runtime;
mod similarity;
mod storage;
mod store;
mod stream;
mod view;

use app::{commands, conversation, watch, AppFactory};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("voyager=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let paths = AppFactory::get_paths()?;
    let config = AppFactory::create_config(&paths)?;

    match args.command {
        cli::Command::Watch { vault, open } => watch::handle_watch(config, vault, open),
        cli::Command::Similar { path, vault } => commands::handle_similar(&config, path, vault),
        cli::Command::Search {
            query,
            limit,
            enhanced,
            blurbs,
        } => commands::handle_search(&config, query, limit, enhanced, blurbs),
        cli::Command::Index { paths, all, vault } => {
            commands::handle_index(&config, paths, all, vault)
        }
        cli::Command::Indexed {
            filter,
            delete,
            yes,
        } => commands::handle_indexed(&config, filter, delete, yes),
        cli::Command::Chat { document, vault } => {
            conversation::handle_chat(&config, document, vault)
        }
        cli::Command::Summarize { path, vault } => {
            conversation::handle_summarize(&config, path, vault)
        }
        cli::Command::Gradient {
            start,
            end,
            preset,
            name,
        } => commands::handle_gradient(config, start, end, preset, name),
    }
}
