//! Single-threaded event loop.
//!
//! Worker threads (query workers, stream readers, the vault watcher, the
//! stdin reader and the Ctrl+C handler) only ever send [`AppEvent`]s into one
//! channel. Everything that mutates view or stream state runs on the thread
//! that owns the [`EventLoop`], between two `wait` calls.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::api::{ApiError, SimilarityApi};
use crate::doc_id::DocumentId;
use crate::similarity::SimilarityResult;
use crate::stream::{Frame, FrameSink, SessionId};
use crate::view::QueryDispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Deadline queue with cancellable entries.
///
/// Cancelled entries stay in the heap until they reach the top and are
/// skipped there.
pub struct Timers<K> {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    entries: HashMap<u64, K>,
    next_id: u64,
}

impl<K> Default for Timers<K> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
            next_id: 1,
        }
    }
}

impl<K> Timers<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_at(&mut self, deadline: Instant, key: K) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;

        self.heap.push(Reverse((deadline, id)));
        self.entries.insert(id, key);
        TimerHandle(id)
    }

    /// Returns false if the timer already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.entries.remove(&handle.0).is_some()
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_cancelled();
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Removes and returns every timer due at `now`, earliest first. Timers
    /// with equal deadlines come out in scheduling order.
    pub fn pop_due(&mut self, now: Instant) -> Vec<K> {
        let mut due = vec![];

        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            if let Some(key) = self.entries.remove(&id) {
                due.push(key);
            }
        }

        due
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.entries.clear();
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse((_, id))) = self.heap.peek() {
            if self.entries.contains_key(id) {
                break;
            }
            self.heap.pop();
        }
    }
}

#[derive(Debug)]
pub enum AppEvent {
    Stream(SessionId, Frame),
    QueryFinished {
        token: u64,
        result: Result<Vec<SimilarityResult>, ApiError>,
    },
    DocumentModified(String),
    Input(String),
    InputClosed,
    Interrupt,
}

pub struct EventLoop {
    tx: Sender<AppEvent>,
    rx: Receiver<AppEvent>,
}

impl Default for EventLoop {
    fn default() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> Sender<AppEvent> {
        self.tx.clone()
    }

    /// Sink for stream transports; frames come back as [`AppEvent::Stream`].
    pub fn frame_sink(&self) -> FrameSink {
        let tx = Mutex::new(self.tx.clone());
        Arc::new(move |id, frame| {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(AppEvent::Stream(id, frame));
            }
        })
    }

    /// Blocks until an event arrives or `deadline` passes. `None` means the
    /// deadline was reached and timers should be fired.
    pub fn wait(&self, deadline: Option<Instant>) -> Option<AppEvent> {
        match deadline {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match self.rx.recv_timeout(timeout) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => None,
                    // we hold a sender ourselves
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            }
            None => self.rx.recv().ok(),
        }
    }

    /// Forwards stdin lines as [`AppEvent::Input`].
    pub fn spawn_stdin_reader(&self) -> std::io::Result<()> {
        let tx = self.sender();
        std::thread::Builder::new()
            .name("stdin".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    if tx.send(AppEvent::Input(line)).is_err() {
                        return;
                    }
                }
                let _ = tx.send(AppEvent::InputClosed);
            })?;

        Ok(())
    }

    pub fn install_interrupt_handler(&self) -> Result<(), ctrlc::Error> {
        let tx = Mutex::new(self.sender());
        ctrlc::set_handler(move || {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(AppEvent::Interrupt);
            }
        })
    }
}

/// Runs each similarity query on its own thread and reports back through
/// the event loop. Superseded queries are left to finish; their results are
/// dropped when applied.
pub struct ThreadedQueries {
    api: Arc<dyn SimilarityApi>,
    tx: Sender<AppEvent>,
}

impl ThreadedQueries {
    pub fn new(api: Arc<dyn SimilarityApi>, tx: Sender<AppEvent>) -> Self {
        Self { api, tx }
    }
}

impl QueryDispatcher for ThreadedQueries {
    fn dispatch(&self, token: u64, document_id: DocumentId, window: String) {
        let api = self.api.clone();
        let tx = self.tx.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("query-{token}"))
            .spawn(move || {
                let result = api.query_similar(&document_id, &window);
                let _ = tx.send(AppEvent::QueryFinished { token, result });
            });

        if let Err(err) = spawned {
            log::error!("failed to spawn query worker: {err}");
            let _ = self.tx.send(AppEvent::QueryFinished {
                token,
                result: Err(ApiError::Server(format!("failed to start query: {err}"))),
            });
        }
    }
}
