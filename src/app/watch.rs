use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use super::commands::index_document;
use super::factory::AppFactory;
use crate::{
    api::ApiClient,
    color::GradientSpec,
    config::{Config, Settings},
    hover::{HoverEvent, HoverTarget},
    runtime::{AppEvent, EventLoop, ThreadedQueries},
    store::Vault,
    stream::StreamAggregator,
    view::{RefreshTrigger, Renderer, SimilarityRefreshOrchestrator, TerminalRenderer, ViewSettings},
};

const HELP: &str = "commands: open PATH | close | refresh | enter N | leave N | panel N | gradient START END | gradient PRESET | quit";

/// One line typed into the live view. Item numbers are 1-based as printed.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchCommand {
    Open(PathBuf),
    Close,
    Refresh,
    Enter(usize),
    Leave(usize),
    Panel(usize),
    Gradient(String, String),
    Preset(GradientSpec),
    Help,
    Quit,
}

impl WatchCommand {
    pub fn parse(line: &str) -> Result<WatchCommand, String> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Err("empty command".to_string());
        };

        let item = |arg: Option<&str>| -> Result<usize, String> {
            let arg = arg.ok_or_else(|| format!("{command} needs an item number"))?;
            match arg.parse::<usize>() {
                Ok(n) if n > 0 => Ok(n - 1),
                _ => Err(format!("{arg:?} is not an item number")),
            }
        };

        let parsed = match command {
            "open" => {
                let path: Vec<&str> = words.by_ref().collect();
                if path.is_empty() {
                    return Err("open needs a path".to_string());
                }
                WatchCommand::Open(PathBuf::from(path.join(" ")))
            }
            "close" => WatchCommand::Close,
            "refresh" => WatchCommand::Refresh,
            "enter" => WatchCommand::Enter(item(words.next())?),
            "leave" => WatchCommand::Leave(item(words.next())?),
            "panel" => WatchCommand::Panel(item(words.next())?),
            "gradient" => {
                let rest: Vec<&str> = words.by_ref().collect();
                match rest.as_slice() {
                    [] => return Err("gradient needs START and END colors or a preset".to_string()),
                    [start, end] if start.starts_with('#') => {
                        WatchCommand::Gradient(start.to_string(), end.to_string())
                    }
                    name => {
                        let name = name.join(" ");
                        match GradientSpec::preset(&name) {
                            Some(spec) => WatchCommand::Preset(spec),
                            None => return Err(format!("unknown gradient preset {name:?}")),
                        }
                    }
                }
            }
            "help" | "?" => WatchCommand::Help,
            "quit" | "exit" | "q" => WatchCommand::Quit,
            other => return Err(format!("unknown command {other:?}")),
        };

        if words.next().is_some() {
            return Err(format!("too many arguments for {command}"));
        }

        Ok(parsed)
    }
}

struct Watch {
    vault: Vault,
    api: Arc<ApiClient>,
    settings: Settings,
    view: SimilarityRefreshOrchestrator,
    streams: StreamAggregator,
}

/// The live similar documents view over `vault_path`.
pub fn handle_watch(config: Config, vault_path: PathBuf, open: Option<PathBuf>) -> Result<()> {
    let vault = Vault::open(&vault_path).with_context(|| format!("Failed to open vault {vault_path:?}"))?;
    let events = EventLoop::new();
    let api = AppFactory::create_api(&config)?;
    let streams = AppFactory::create_streams(&config, events.frame_sink())?;

    let renderer: Rc<dyn Renderer> = Rc::new(TerminalRenderer::stdout());
    let view = SimilarityRefreshOrchestrator::new(
        Box::new(vault.clone()),
        Box::new(ThreadedQueries::new(api.clone(), events.sender())),
        renderer,
        &config.gradient,
        ViewSettings::from_config(&config),
    )?;

    let tx = events.sender();
    let _watcher = vault.watch(move |doc| {
        let _ = tx.send(AppEvent::DocumentModified(doc));
    })?;
    events.spawn_stdin_reader()?;
    events.install_interrupt_handler()?;

    let mut watch = Watch {
        vault,
        api,
        settings: Settings::new(config),
        view,
        streams,
    };

    log::info!("watching {}", watch.vault.root().display());
    println!("{HELP}");
    match open {
        Some(path) => watch.open(path),
        None => watch.close(),
    }

    loop {
        let deadline = match (watch.view.next_deadline(), watch.streams.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        match events.wait(deadline) {
            Some(AppEvent::Stream(id, frame)) => watch.streams.dispatch(id, frame),
            Some(AppEvent::QueryFinished { token, result }) => {
                watch
                    .view
                    .apply_result(token, result, &mut watch.streams, Instant::now());
            }
            Some(AppEvent::DocumentModified(doc)) => watch.modified(doc),
            Some(AppEvent::Input(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match WatchCommand::parse(&line) {
                    Ok(WatchCommand::Quit) => break,
                    Ok(command) => watch.run(command),
                    Err(err) => eprintln!("{err}"),
                }
            }
            Some(AppEvent::InputClosed) | Some(AppEvent::Interrupt) => break,
            None => {}
        }

        let now = Instant::now();
        watch.view.fire_due(&mut watch.streams, now);
        watch.streams.expire_overdue(now);
    }

    watch.view.dispose(&mut watch.streams, Instant::now());
    log::debug!("closing {} open streams", watch.streams.active_count());
    watch.streams.cancel_all();
    Ok(())
}

impl Watch {
    fn run(&mut self, command: WatchCommand) {
        let now = Instant::now();
        match command {
            WatchCommand::Open(path) => self.open(path),
            WatchCommand::Close => self.close(),
            WatchCommand::Refresh => {
                if self.view.active_document().is_none() {
                    eprintln!("no document open");
                    return;
                }
                self.view
                    .refresh(RefreshTrigger::Manual, &mut self.streams, now);
            }
            WatchCommand::Enter(index) => {
                self.pointer(index, HoverEvent::PointerEnter(HoverTarget::Item))
            }
            WatchCommand::Leave(index) => {
                self.pointer(index, HoverEvent::PointerLeave(HoverTarget::Item))
            }
            WatchCommand::Panel(index) => {
                self.pointer(index, HoverEvent::PointerEnter(HoverTarget::Panel))
            }
            WatchCommand::Gradient(start, end) => {
                let mut spec = GradientSpec::new(&start, &end);
                spec.name = self.settings.gradient().name.clone();
                self.set_gradient(spec);
            }
            WatchCommand::Preset(spec) => self.set_gradient(spec),
            WatchCommand::Help => println!("{HELP}"),
            WatchCommand::Quit => {}
        }
    }

    fn set_gradient(&mut self, spec: GradientSpec) {
        let view = &mut self.view;
        let result = self.settings.set_gradient(spec, |gradient| {
            if let Err(err) = view.set_gradient(gradient) {
                log::error!("failed to recolor: {err}");
            }
        });
        if let Err(err) = result {
            eprintln!("{err}");
        }
    }

    fn open(&mut self, path: PathBuf) {
        let path = if path.is_relative() && self.vault.root().join(&path).exists() {
            self.vault.root().join(path)
        } else {
            path
        };

        match self.vault.relative(&path) {
            Ok(doc) => {
                self.view.open_document(&doc, &mut self.streams, Instant::now());
            }
            Err(err) => eprintln!("cannot open {}: {err}", path.display()),
        }
    }

    fn close(&mut self) {
        self.view.close_document(&mut self.streams, Instant::now());
    }

    fn pointer(&mut self, index: usize, event: HoverEvent) {
        if !self
            .view
            .pointer(index, event, &mut self.streams, Instant::now())
        {
            eprintln!("no item {}", index + 1);
            return;
        }

        if let Some(item) = self.view.list().item(index) {
            log::debug!(
                "item {}: {:?}, summary loaded: {}",
                index + 1,
                item.hover_phase(),
                item.summary_loaded()
            );
        }
    }

    fn modified(&mut self, doc: String) {
        self.view.document_modified(&doc, Instant::now());

        if !self.settings.config().auto_index_on_edit {
            return;
        }

        let vault = self.vault.clone();
        let api = self.api.clone();
        let spawned = std::thread::Builder::new()
            .name("auto-index".to_string())
            .spawn(move || {
                if let Err(err) = index_document(&vault, &api, &doc) {
                    log::warn!("failed to index {doc}: {err}");
                }
            });
        if let Err(err) = spawned {
            log::error!("failed to spawn indexer: {err}");
        }
    }
}
