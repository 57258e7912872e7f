//! Chat conversations over the streaming endpoint.
//!
//! Every outgoing message opens its own stream session on the shared
//! [`StreamAggregator`]; the reply is rebuilt from the cumulative text on
//! each fragment. History lives in memory only.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use crate::doc_id::DocumentId;
use crate::stream::{
    SessionHandle, StreamAggregator, StreamCallbacks, StreamError, StreamRequest,
};
use crate::view::Renderer;

pub const SUMMARIZE_PROMPT: &str = "Summarize the current document";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageStatus {
    Streaming,
    Complete,
    Cancelled,
    /// The reply stopped early; whatever arrived stays in `text`.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub status: MessageStatus,
}

type SharedMessage = Rc<RefCell<ChatMessage>>;

pub struct Conversation {
    document: Option<DocumentId>,
    messages: Vec<SharedMessage>,
    pending: Option<(SessionHandle, usize, SharedMessage)>,
    renderer: Rc<dyn Renderer>,
}

impl Conversation {
    /// `document` scopes every query of this conversation, if set.
    pub fn new(document: Option<DocumentId>, renderer: Rc<dyn Renderer>) -> Self {
        Self {
            document,
            messages: vec![],
            pending: None,
            renderer,
        }
    }

    pub fn document(&self) -> Option<&DocumentId> {
        self.document.as_ref()
    }

    /// Sends `query` and streams the reply into a new assistant message.
    /// A reply still in flight is cancelled first.
    pub fn send(
        &mut self,
        query: &str,
        streams: &mut StreamAggregator,
        now: Instant,
    ) -> Result<SessionHandle, StreamError> {
        self.cancel(streams);

        let user = self.push(Role::User, query, MessageStatus::Complete);
        self.renderer.render_message(user.0, &user.1.borrow());

        let (index, reply) = self.push(Role::Assistant, "", MessageStatus::Streaming);

        let on_fragment = {
            let reply = reply.clone();
            let renderer = self.renderer.clone();
            move |text: &str| {
                let mut reply = reply.borrow_mut();
                reply.text = text.to_string();
                renderer.render_message(index, &reply);
            }
        };

        let on_complete = {
            let reply = reply.clone();
            let renderer = self.renderer.clone();
            move |text: &str| {
                let mut reply = reply.borrow_mut();
                reply.text = text.to_string();
                reply.status = MessageStatus::Complete;
                renderer.render_message(index, &reply);
            }
        };

        let on_error = {
            let reply = reply.clone();
            let renderer = self.renderer.clone();
            move |err: &StreamError, partial: &str| {
                let mut reply = reply.borrow_mut();
                reply.text = partial.to_string();
                reply.status = MessageStatus::Failed(err.to_string());
                renderer.render_message(index, &reply);
            }
        };

        let request = StreamRequest::new(query, self.document.clone());
        let callbacks = StreamCallbacks::new(on_fragment, on_complete).on_error(on_error);

        match streams.open(request, callbacks, now) {
            Ok(handle) => {
                self.pending = Some((handle, index, reply));
                Ok(handle)
            }
            Err(err) => {
                let mut reply = reply.borrow_mut();
                reply.status = MessageStatus::Failed(err.to_string());
                self.renderer.render_message(index, &reply);
                Err(err)
            }
        }
    }

    /// Asks for a summary of the conversation's document.
    pub fn summarize(
        &mut self,
        streams: &mut StreamAggregator,
        now: Instant,
    ) -> Result<SessionHandle, StreamError> {
        if self.document.is_none() {
            return Err(StreamError::Transport(
                "no document to summarize".to_string(),
            ));
        }
        self.send(SUMMARIZE_PROMPT, streams, now)
    }

    /// Stops the reply in flight, keeping what arrived. Returns false if
    /// there was nothing to cancel.
    pub fn cancel(&mut self, streams: &mut StreamAggregator) -> bool {
        let Some((handle, index, reply)) = self.pending.take() else {
            return false;
        };

        if !streams.is_active(handle) {
            return false;
        }

        streams.cancel(handle);
        let mut reply = reply.borrow_mut();
        reply.status = MessageStatus::Cancelled;
        self.renderer.render_message(index, &reply);
        true
    }

    pub fn is_waiting(&self, streams: &StreamAggregator) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|(handle, _, _)| streams.is_active(*handle))
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().map(|m| m.borrow().clone()).collect()
    }

    pub fn last_reply(&self) -> Option<ChatMessage> {
        self.messages
            .iter()
            .rev()
            .map(|m| m.borrow())
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.clone())
    }

    fn push(&mut self, role: Role, text: &str, status: MessageStatus) -> (usize, SharedMessage) {
        let message = Rc::new(RefCell::new(ChatMessage {
            role,
            text: text.to_string(),
            status,
        }));
        self.messages.push(message.clone());
        (self.messages.len() - 1, message)
    }
}
