use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use anyhow::{bail, Result};
use inquire::InquireError;

use super::commands::open_document;
use super::errors::AppError;
use super::factory::AppFactory;
use crate::{
    chat::{Conversation, MessageStatus},
    config::Config,
    runtime::{AppEvent, EventLoop},
    store::DocumentStore,
    stream::StreamAggregator,
    view::{Renderer, TerminalRenderer},
};

/// Interactive chat, optionally scoped to one document.
pub fn handle_chat(config: &Config, document: Option<PathBuf>, vault: Option<PathBuf>) -> Result<()> {
    let document_id = match document {
        Some(path) => {
            let (vault, doc) = open_document(&path, vault.as_deref())?;
            Some(vault.stable_id(&doc)?.ok_or(AppError::NotIndexed(doc))?)
        }
        None => None,
    };

    let events = EventLoop::new();
    events.install_interrupt_handler()?;
    let mut streams = AppFactory::create_streams(config, events.frame_sink())?;

    let renderer: Rc<dyn Renderer> = Rc::new(TerminalRenderer::stdout());
    let mut conversation = Conversation::new(document_id, renderer);
    if let Some(id) = conversation.document() {
        log::info!("chatting about {id}");
    }

    loop {
        let query = match inquire::Text::new("you>").prompt() {
            Ok(query) => query,
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => break,
            Err(err) => bail!("An error occurred: {err}"),
        };

        let query = query.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query, "/quit" | "/exit") {
            break;
        }

        if let Err(err) = conversation.send(query, &mut streams, Instant::now()) {
            log::warn!("failed to send message: {err}");
            continue;
        }
        wait_for_reply(&mut conversation, &mut streams, &events);
    }

    streams.cancel_all();
    Ok(())
}

/// Streams a summary of the document at `path`.
pub fn handle_summarize(config: &Config, path: PathBuf, vault: Option<PathBuf>) -> Result<()> {
    let (vault, doc) = open_document(&path, vault.as_deref())?;
    let Some(document_id) = vault.stable_id(&doc)? else {
        return Err(AppError::NotIndexed(doc).into());
    };

    let events = EventLoop::new();
    events.install_interrupt_handler()?;
    let mut streams = AppFactory::create_streams(config, events.frame_sink())?;

    let renderer: Rc<dyn Renderer> = Rc::new(TerminalRenderer::stdout());
    let mut conversation = Conversation::new(Some(document_id), renderer);

    conversation.summarize(&mut streams, Instant::now())?;
    wait_for_reply(&mut conversation, &mut streams, &events);

    match conversation.last_reply().map(|reply| reply.status) {
        Some(MessageStatus::Failed(reason)) => bail!("summary incomplete: {reason}"),
        _ => Ok(()),
    }
}

/// Pumps stream frames until the pending reply finishes, fails, times out
/// or is interrupted.
fn wait_for_reply(conversation: &mut Conversation, streams: &mut StreamAggregator, events: &EventLoop) {
    while conversation.is_waiting(streams) {
        match events.wait(streams.next_deadline()) {
            Some(AppEvent::Stream(id, frame)) => streams.dispatch(id, frame),
            Some(AppEvent::Interrupt) => {
                conversation.cancel(streams);
            }
            Some(_) => {}
            None => {
                streams.expire_overdue(Instant::now());
            }
        }
    }
}
