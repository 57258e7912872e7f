use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use chrono::DateTime;
use indicatif::{ProgressBar, ProgressStyle};

use super::errors::AppError;
use super::factory::AppFactory;
use crate::{
    api::{ApiClient, IndexRequest, IndexedDocument, SearchHit},
    color::{interpolate, Gradient, GradientSpec, PRESETS},
    config::{Config, Settings},
    doc_id::DocumentId,
    runtime::{AppEvent, EventLoop, ThreadedQueries},
    similarity::ScoreRange,
    store::Vault,
    stream::StreamAggregator,
    view::{RefreshPhase, Renderer, SimilarityRefreshOrchestrator, TerminalRenderer, ViewSettings},
};

/// File types the index endpoint has no use for.
const SKIPPED_EXTENSIONS: [&str; 5] = ["canvas", "html", "png", "jpg", "jpeg"];

/// Opens the vault containing `path` (or `vault` when given) and returns the
/// document's vault-relative name.
pub fn open_document(path: &Path, vault: Option<&Path>) -> Result<(Vault, String), AppError> {
    let root = match vault {
        Some(vault) => vault.to_path_buf(),
        None => match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        },
    };

    let vault = Vault::open(root)?;
    let doc = vault.relative(path)?;
    Ok((vault, doc))
}

/// Assigns an id if needed and uploads the document.
pub fn index_document(vault: &Vault, api: &ApiClient, doc: &str) -> Result<DocumentId, AppError> {
    let id = vault.ensure_id(doc)?;
    let request = IndexRequest {
        id: id.clone(),
        title: vault.title(doc),
        content: vault.read(doc)?,
        creation_date: vault.created_at(doc)?.to_rfc3339(),
    };

    api.index_document(&request)?;
    log::info!("indexed {doc} as {id}");
    Ok(id)
}

pub fn handle_index(
    config: &Config,
    paths: Vec<PathBuf>,
    all: Option<PathBuf>,
    vault: Option<PathBuf>,
) -> Result<()> {
    let api = AppFactory::create_api(config)?;

    if let Some(root) = all {
        let vault = Vault::open(&root).with_context(|| format!("Failed to open vault {root:?}"))?;
        return index_vault(&vault, &api);
    }

    if paths.is_empty() {
        bail!("nothing to index, pass document paths or --all VAULT");
    }

    for path in paths {
        if is_skipped(&path) {
            println!("skipping {}", path.display());
            continue;
        }

        let (vault, doc) = open_document(&path, vault.as_deref())?;
        let id = index_document(&vault, &api, &doc)?;
        println!("{doc}: {id}");
    }

    Ok(())
}

fn index_vault(vault: &Vault, api: &ApiClient) -> Result<()> {
    let documents = vault.documents();
    let bar = ProgressBar::new(documents.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .context("invalid progress template")?,
    );

    let mut failed = 0;
    for doc in &documents {
        bar.set_message(doc.clone());
        if let Err(err) = index_document(vault, api, doc) {
            failed += 1;
            bar.println(format!("failed to index {doc}: {err}"));
        }
        bar.inc(1);
    }

    bar.finish_with_message(format!(
        "{} indexed, {failed} failed",
        documents.len() - failed
    ));
    Ok(())
}

fn is_skipped(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SKIPPED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// One refresh cycle for `path`, printed once the list settles.
pub fn handle_similar(config: &Config, path: PathBuf, vault: Option<PathBuf>) -> Result<()> {
    let (vault, doc) = open_document(&path, vault.as_deref())?;
    let events = EventLoop::new();
    let api = AppFactory::create_api(config)?;
    let mut streams = AppFactory::create_streams(config, events.frame_sink())?;

    let renderer: Rc<dyn Renderer> = Rc::new(TerminalRenderer::stdout());
    let mut view = SimilarityRefreshOrchestrator::new(
        Box::new(vault),
        Box::new(ThreadedQueries::new(api, events.sender())),
        renderer,
        &config.gradient,
        ViewSettings::from_config(config),
    )?;

    view.open_document(&doc, &mut streams, Instant::now());
    run_until_idle(&mut view, &mut streams, &events);
    Ok(())
}

fn run_until_idle(
    view: &mut SimilarityRefreshOrchestrator,
    streams: &mut StreamAggregator,
    events: &EventLoop,
) {
    while view.phase() != RefreshPhase::Idle {
        match events.wait(view.next_deadline()) {
            Some(AppEvent::QueryFinished { token, result }) => {
                view.apply_result(token, result, streams, Instant::now());
            }
            Some(AppEvent::Stream(id, frame)) => streams.dispatch(id, frame),
            Some(_) | None => {}
        }
        view.fire_due(streams, Instant::now());
    }
}

pub fn handle_search(
    config: &Config,
    query: String,
    limit: usize,
    enhanced: bool,
    blurbs: bool,
) -> Result<()> {
    let api = AppFactory::create_api(config)?;
    let hits = api.search(&query, limit, enhanced)?;

    if hits.is_empty() {
        println!("No documents found.");
        return Ok(());
    }

    let renderer = TerminalRenderer::stdout();
    for (hit, color) in colorize(hits, &config.gradient)? {
        println!(
            "{} {} {}",
            renderer.paint(&color, "●"),
            renderer.paint(&color, &hit.title),
            renderer.dim(&format!("{:.3}", hit.score))
        );

        let secondary = if blurbs {
            api.generate_blurb(&query, &hit).unwrap_or_else(|err| {
                log::warn!("no blurb for {}: {err}", hit.title);
                excerpt(&hit.document)
            })
        } else {
            excerpt(&hit.document)
        };
        if !secondary.is_empty() {
            println!("    {}", renderer.dim(&secondary));
        }
    }

    Ok(())
}

fn excerpt(document: &str) -> String {
    let excerpt: String = document.chars().take(160).collect();
    excerpt.trim().to_string()
}

/// Sorts hits by descending score and colors them against their own range.
pub fn colorize(
    mut hits: Vec<SearchHit>,
    gradient: &GradientSpec,
) -> Result<Vec<(SearchHit, String)>, AppError> {
    let gradient = Gradient::new(gradient)?;
    let range = ScoreRange::of_scores(hits.iter().map(|hit| hit.score));

    hits.sort_by(|a, b| b.score.total_cmp(&a.score));

    Ok(hits
        .into_iter()
        .map(|hit| {
            let color = match range {
                Some(range) => gradient.interpolate(hit.score, range.min, range.max),
                None => gradient.spec().end_color.clone(),
            };
            (hit, color)
        })
        .collect())
}

pub fn handle_indexed(
    config: &Config,
    filter: Option<String>,
    delete: Vec<String>,
    yes: bool,
) -> Result<()> {
    let api = AppFactory::create_api(config)?;
    let documents = api.indexed_documents()?;

    if !delete.is_empty() {
        return delete_indexed(&api, &documents, delete, yes);
    }

    let shown = filter_indexed(&documents, filter.as_deref());
    if shown.is_empty() {
        println!("No indexed documents found.");
    }

    let renderer = TerminalRenderer::stdout();
    for doc in &shown {
        println!(
            "{}  {}  {}",
            doc.title,
            renderer.dim(&format_indexed_date(&doc.creation_date)),
            renderer.dim(doc.id.as_str())
        );
    }
    println!("Total documents: {}", shown.len());

    Ok(())
}

fn delete_indexed(
    api: &ApiClient,
    documents: &[IndexedDocument],
    ids: Vec<String>,
    yes: bool,
) -> Result<()> {
    if !yes {
        match inquire::prompt_confirmation(format!(
            "Are you sure you want to remove {} documents from the index?",
            ids.len()
        )) {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(err) => bail!("An error occurred: {err}"),
        }
    }

    for id in ids.into_iter().map(DocumentId::from) {
        let title = documents
            .iter()
            .find(|doc| doc.id == id)
            .map(|doc| doc.title.clone())
            .unwrap_or_else(|| id.to_string());

        match api.delete_document(&id) {
            Ok(()) => println!("Document {title:?} has been removed from the index."),
            Err(err) => log::error!("failed to delete {title:?}: {err}"),
        }
    }

    Ok(())
}

/// Documents whose title contains `filter`, ignoring case.
pub fn filter_indexed<'a>(
    documents: &'a [IndexedDocument],
    filter: Option<&str>,
) -> Vec<&'a IndexedDocument> {
    let needle = filter.map(str::to_lowercase).unwrap_or_default();
    documents
        .iter()
        .filter(|doc| doc.title.to_lowercase().contains(&needle))
        .collect()
}

fn format_indexed_date(date: &str) -> String {
    if date.trim().is_empty() {
        return "date not available".to_string();
    }

    match DateTime::parse_from_rfc3339(date.trim()) {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(_) => "invalid date".to_string(),
    }
}

/// The gradient named by `preset`, or the one spanning `start` and `end`.
pub fn resolve_gradient(
    start: Option<String>,
    end: Option<String>,
    preset: Option<String>,
) -> Result<GradientSpec> {
    match (preset, start, end) {
        (Some(preset), _, _) => GradientSpec::preset(&preset).ok_or_else(|| {
            let names: Vec<&str> = PRESETS.iter().map(|(name, _, _)| *name).collect();
            anyhow!("unknown preset {preset:?}, expected one of: {}", names.join(", "))
        }),
        (None, Some(start), Some(end)) => Ok(GradientSpec::new(&start, &end)),
        _ => bail!("pass START END or --preset NAME"),
    }
}

pub fn handle_gradient(
    config: Config,
    start: Option<String>,
    end: Option<String>,
    preset: Option<String>,
    name: Option<String>,
) -> Result<()> {
    let mut spec = resolve_gradient(start, end, preset)?;
    if let Some(name) = name {
        spec.name = name;
    }

    let mut settings = Settings::new(config);
    settings.set_gradient(spec, |gradient| {
        let renderer = TerminalRenderer::stdout();
        let preview: String = (0..=10)
            .filter_map(|step| interpolate(step as f64, 0.0, 10.0, gradient).ok())
            .map(|color| renderer.paint(&color, "█"))
            .collect();
        println!("{}: {} -> {} {preview}", gradient.name, gradient.start_color, gradient.end_color);
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colorize_sorts_and_uses_batch_range() {
        let hits = vec![
            SearchHit {
                score: 1.0,
                title: "low.md".to_string(),
                document: String::new(),
            },
            SearchHit {
                score: 3.0,
                title: "high.md".to_string(),
                document: String::new(),
            },
        ];
        let gradient = GradientSpec::new("#0000ff", "#ff0000");

        let colored = colorize(hits, &gradient).unwrap();
        assert_eq!(colored[0].0.title, "high.md");
        assert_eq!(colored[0].1, "#ff0000");
        assert_eq!(colored[1].1, "#0000ff");
    }

    #[test]
    fn test_skipped_extensions() {
        assert!(is_skipped(Path::new("board.canvas")));
        assert!(is_skipped(Path::new("photo.JPG")));
        assert!(!is_skipped(Path::new("note.md")));
    }

    #[test]
    fn test_open_document_defaults_to_parent_vault() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/note.md"), "text").unwrap();

        let (vault, doc) = open_document(&tmp.path().join("sub/note.md"), None).unwrap();
        assert_eq!(doc, "note.md");
        assert!(vault.root().ends_with("sub"));

        let (_, doc) = open_document(&tmp.path().join("sub/note.md"), Some(tmp.path())).unwrap();
        assert_eq!(doc, format!("sub{}note.md", std::path::MAIN_SEPARATOR));
    }

    fn indexed(id: &str, title: &str) -> IndexedDocument {
        IndexedDocument {
            id: DocumentId::from(id),
            title: title.to_string(),
            creation_date: String::new(),
        }
    }

    #[test]
    fn test_filter_indexed_matches_title_case_insensitively() {
        let docs = vec![
            indexed("1", "Rust Ownership.md"),
            indexed("2", "Go channels.md"),
            indexed("3", "trust.md"),
        ];

        let titles = |filter: Option<&str>| -> Vec<String> {
            filter_indexed(&docs, filter)
                .into_iter()
                .map(|doc| doc.title.clone())
                .collect()
        };

        assert_eq!(titles(Some("RUST")), vec!["Rust Ownership.md", "trust.md"]);
        assert_eq!(titles(None).len(), 3);
        assert!(titles(Some("python")).is_empty());
    }

    #[test]
    fn test_format_indexed_date() {
        assert_eq!(format_indexed_date("2024-03-01T10:00:00Z"), "2024-03-01");
        assert_eq!(format_indexed_date(""), "date not available");
        assert_eq!(format_indexed_date("yesterday"), "invalid date");
    }

    #[test]
    fn test_resolve_gradient() {
        let preset = resolve_gradient(None, None, Some("purpink".to_string())).unwrap();
        assert_eq!(preset.name, "Purpink");
        assert_eq!(preset.start_color, "#7F00FF");

        let custom =
            resolve_gradient(Some("#000000".to_string()), Some("#ffffff".to_string()), None).unwrap();
        assert_eq!(custom, GradientSpec::new("#000000", "#ffffff"));

        let err = resolve_gradient(None, None, Some("sunset".to_string())).unwrap_err();
        assert!(err.to_string().contains("Pacific Dream"));
        assert!(resolve_gradient(Some("#000".to_string()), None, None).is_err());
    }

    #[test]
    fn test_excerpt_trims_and_truncates() {
        assert_eq!(excerpt("  short  "), "short");
        assert_eq!(excerpt(&"x".repeat(500)).len(), 160);
    }
}
