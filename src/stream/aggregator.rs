use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{Frame, SessionId, StreamChannel, StreamError, StreamRequest, StreamTransport};

/// Handle returned by [`StreamAggregator::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(SessionId);

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.0
    }
}

type FragmentFn = Box<dyn FnMut(&str)>;
type CompleteFn = Box<dyn FnOnce(&str)>;
type ErrorFn = Box<dyn FnOnce(&StreamError, &str)>;

/// Consumer side of a session.
///
/// `on_fragment` always receives the whole text accumulated so far, never
/// just the newest piece. Exactly one of `on_complete` / `on_error` runs,
/// unless the session is cancelled, in which case neither does.
pub struct StreamCallbacks {
    on_fragment: FragmentFn,
    on_complete: CompleteFn,
    on_error: ErrorFn,
}

impl StreamCallbacks {
    pub fn new(on_fragment: impl FnMut(&str) + 'static, on_complete: impl FnOnce(&str) + 'static) -> Self {
        Self {
            on_fragment: Box::new(on_fragment),
            on_complete: Box::new(on_complete),
            on_error: Box::new(|err, partial| {
                log::warn!("stream failed after {} chars: {err}", partial.len());
            }),
        }
    }

    pub fn on_error(mut self, on_error: impl FnOnce(&StreamError, &str) + 'static) -> Self {
        self.on_error = Box::new(on_error);
        self
    }
}

struct Session {
    accumulated: String,
    channel: Box<dyn StreamChannel>,
    callbacks: StreamCallbacks,
    opened_at: Instant,
}

/// Owns every live streaming session.
///
/// Sessions share nothing: each has its own buffer and its own completion
/// signal. A session leaves the map on complete, error, timeout or cancel,
/// and frames arriving for an id that is no longer in the map are dropped.
pub struct StreamAggregator {
    transport: Box<dyn StreamTransport>,
    sessions: HashMap<SessionId, Session>,
    next_id: u64,
    timeout: Option<Duration>,
}

impl StreamAggregator {
    pub fn new(transport: Box<dyn StreamTransport>) -> Self {
        Self {
            transport,
            sessions: HashMap::new(),
            next_id: 1,
            timeout: None,
        }
    }

    /// Fail sessions that run longer than `timeout`, see [`Self::expire_overdue`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn open(
        &mut self,
        request: StreamRequest,
        callbacks: StreamCallbacks,
        now: Instant,
    ) -> Result<SessionHandle, StreamError> {
        let id = SessionId(self.next_id);
        self.next_id += 1;

        let channel = self.transport.open(id, &request)?;
        log::debug!("{id}: opened for {:?}", request.document_id);

        self.sessions.insert(
            id,
            Session {
                accumulated: String::new(),
                channel,
                callbacks,
                opened_at: now,
            },
        );

        Ok(SessionHandle(id))
    }

    /// Applies one inbound frame. Frames must be passed in arrival order.
    pub fn dispatch(&mut self, id: SessionId, frame: Frame) {
        match frame {
            Frame::Chunk { content } => {
                let Some(session) = self.sessions.get_mut(&id) else {
                    log::debug!("{id}: dropping chunk for closed session");
                    return;
                };

                if content.is_empty() {
                    return;
                }

                session.accumulated.push_str(&content);
                (session.callbacks.on_fragment)(&session.accumulated);
            }
            Frame::Complete => {
                let Some(mut session) = self.sessions.remove(&id) else {
                    log::debug!("{id}: dropping completion for closed session");
                    return;
                };

                session.channel.close();
                log::debug!("{id}: complete ({} chars)", session.accumulated.len());
                (session.callbacks.on_complete)(&session.accumulated);
            }
            Frame::Error { message } => {
                self.fail(id, StreamError::Server(message));
            }
        }
    }

    /// Releases the channel and silences the session. No-op once finished.
    pub fn cancel(&mut self, handle: SessionHandle) {
        if let Some(mut session) = self.sessions.remove(&handle.0) {
            session.channel.close();
            log::debug!("{}: cancelled", handle.0);
        }
    }

    /// Fails every session opened more than `timeout` before `now`.
    pub fn expire_overdue(&mut self, now: Instant) -> usize {
        let Some(timeout) = self.timeout else {
            return 0;
        };

        let overdue: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.opened_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &overdue {
            self.fail(*id, StreamError::TimedOut);
        }

        overdue.len()
    }

    /// Earliest instant at which [`Self::expire_overdue`] could fail a session.
    pub fn next_deadline(&self) -> Option<Instant> {
        let timeout = self.timeout?;
        self.sessions.values().map(|s| s.opened_at + timeout).min()
    }

    pub fn is_active(&self, handle: SessionHandle) -> bool {
        self.sessions.contains_key(&handle.0)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Cancels everything, e.g. on shutdown.
    pub fn cancel_all(&mut self) {
        for (id, mut session) in self.sessions.drain() {
            session.channel.close();
            log::debug!("{id}: cancelled on shutdown");
        }
    }

    fn fail(&mut self, id: SessionId, err: StreamError) {
        let Some(mut session) = self.sessions.remove(&id) else {
            log::debug!("{id}: dropping error for closed session: {err}");
            return;
        };

        session.channel.close();
        log::warn!("{id}: {err}");
        (session.callbacks.on_error)(&err, &session.accumulated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        fragments: Vec<String>,
        completed: Vec<String>,
        errors: Vec<(StreamError, String)>,
    }

    #[derive(Clone, Default)]
    struct FakeTransport {
        opened: Rc<RefCell<Vec<(SessionId, StreamRequest)>>>,
        closed: Rc<RefCell<Vec<SessionId>>>,
        refuse: bool,
    }

    struct FakeChannel {
        id: SessionId,
        closed: Rc<RefCell<Vec<SessionId>>>,
    }

    impl StreamChannel for FakeChannel {
        fn close(&mut self) {
            self.closed.borrow_mut().push(self.id);
        }
    }

    impl StreamTransport for FakeTransport {
        fn open(
            &self,
            session: SessionId,
            request: &StreamRequest,
        ) -> Result<Box<dyn StreamChannel>, StreamError> {
            if self.refuse {
                return Err(StreamError::Transport("connection refused".into()));
            }
            self.opened.borrow_mut().push((session, request.clone()));
            Ok(Box::new(FakeChannel {
                id: session,
                closed: self.closed.clone(),
            }))
        }
    }

    fn recording_callbacks(recorder: &Rc<RefCell<Recorder>>) -> StreamCallbacks {
        let on_fragment = recorder.clone();
        let on_complete = recorder.clone();
        let on_error = recorder.clone();
        StreamCallbacks::new(
            move |text| on_fragment.borrow_mut().fragments.push(text.to_string()),
            move |text| on_complete.borrow_mut().completed.push(text.to_string()),
        )
        .on_error(move |err, partial| {
            on_error
                .borrow_mut()
                .errors
                .push((err.clone(), partial.to_string()))
        })
    }

    fn aggregator() -> (StreamAggregator, FakeTransport) {
        let transport = FakeTransport::default();
        (StreamAggregator::new(Box::new(transport.clone())), transport)
    }

    #[test]
    fn test_fragments_are_cumulative() {
        let (mut agg, transport) = aggregator();
        let recorder = Rc::new(RefCell::new(Recorder::default()));

        let handle = agg
            .open(StreamRequest::new("hi", None), recording_callbacks(&recorder), Instant::now())
            .unwrap();

        agg.dispatch(handle.id(), Frame::chunk("Hello"));
        agg.dispatch(handle.id(), Frame::chunk(" world"));
        agg.dispatch(handle.id(), Frame::Complete);

        let recorder = recorder.borrow();
        assert_eq!(recorder.fragments, vec!["Hello", "Hello world"]);
        assert_eq!(recorder.completed, vec!["Hello world"]);
        assert!(recorder.errors.is_empty());
        assert_eq!(*transport.closed.borrow(), vec![handle.id()]);
        assert!(!agg.is_active(handle));
    }

    #[test]
    fn test_nothing_fires_after_completion() {
        let (mut agg, _) = aggregator();
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        let handle = agg
            .open(StreamRequest::new("hi", None), recording_callbacks(&recorder), Instant::now())
            .unwrap();

        agg.dispatch(handle.id(), Frame::chunk("a"));
        agg.dispatch(handle.id(), Frame::Complete);
        agg.dispatch(handle.id(), Frame::chunk("b"));
        agg.dispatch(handle.id(), Frame::Complete);
        agg.dispatch(handle.id(), Frame::Error { message: "late".into() });

        let recorder = recorder.borrow();
        assert_eq!(recorder.fragments, vec!["a"]);
        assert_eq!(recorder.completed.len(), 1);
        assert!(recorder.errors.is_empty());
    }

    #[test]
    fn test_error_skips_completion_and_keeps_partial() {
        let (mut agg, transport) = aggregator();
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        let handle = agg
            .open(StreamRequest::new("hi", None), recording_callbacks(&recorder), Instant::now())
            .unwrap();

        agg.dispatch(handle.id(), Frame::chunk("partial"));
        agg.dispatch(handle.id(), Frame::Error { message: "boom".into() });

        let recorder = recorder.borrow();
        assert!(recorder.completed.is_empty());
        assert_eq!(
            recorder.errors,
            vec![(StreamError::Server("boom".into()), "partial".to_string())]
        );
        assert_eq!(transport.closed.borrow().len(), 1);
    }

    #[test]
    fn test_cancel_is_idempotent_and_silences_session() {
        let (mut agg, transport) = aggregator();
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        let handle = agg
            .open(StreamRequest::new("hi", None), recording_callbacks(&recorder), Instant::now())
            .unwrap();

        agg.dispatch(handle.id(), Frame::chunk("x"));
        agg.cancel(handle);
        agg.cancel(handle);
        agg.dispatch(handle.id(), Frame::chunk("y"));
        agg.dispatch(handle.id(), Frame::Complete);

        let recorder = recorder.borrow();
        assert_eq!(recorder.fragments, vec!["x"]);
        assert!(recorder.completed.is_empty());
        assert!(recorder.errors.is_empty());
        assert_eq!(transport.closed.borrow().len(), 1);
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let (mut agg, transport) = aggregator();
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        let handle = agg
            .open(StreamRequest::new("hi", None), recording_callbacks(&recorder), Instant::now())
            .unwrap();

        agg.dispatch(handle.id(), Frame::Complete);
        agg.cancel(handle);

        assert_eq!(transport.closed.borrow().len(), 1);
        assert_eq!(recorder.borrow().completed, vec![""]);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let (mut agg, transport) = aggregator();
        let a = Rc::new(RefCell::new(Recorder::default()));
        let b = Rc::new(RefCell::new(Recorder::default()));

        let ha = agg
            .open(StreamRequest::new("a", Some("doc-a".into())), recording_callbacks(&a), Instant::now())
            .unwrap();
        let hb = agg
            .open(StreamRequest::new("b", Some("doc-b".into())), recording_callbacks(&b), Instant::now())
            .unwrap();
        assert_ne!(ha, hb);

        agg.dispatch(ha.id(), Frame::chunk("fo"));
        agg.dispatch(hb.id(), Frame::chunk("ba"));
        agg.dispatch(ha.id(), Frame::chunk("o"));
        agg.dispatch(hb.id(), Frame::chunk("r"));
        agg.dispatch(hb.id(), Frame::Complete);
        agg.dispatch(ha.id(), Frame::Complete);

        assert_eq!(a.borrow().completed, vec!["foo"]);
        assert_eq!(b.borrow().completed, vec!["bar"]);
        assert_eq!(a.borrow().fragments, vec!["fo", "foo"]);
        assert_eq!(b.borrow().fragments, vec!["ba", "bar"]);
        assert_eq!(transport.opened.borrow().len(), 2);
    }

    #[test]
    fn test_open_failure_creates_no_session() {
        let transport = FakeTransport {
            refuse: true,
            ..Default::default()
        };
        let mut agg = StreamAggregator::new(Box::new(transport));
        let recorder = Rc::new(RefCell::new(Recorder::default()));

        let result = agg.open(
            StreamRequest::new("hi", None),
            recording_callbacks(&recorder),
            Instant::now(),
        );
        assert!(matches!(result, Err(StreamError::Transport(_))));
        assert_eq!(agg.active_count(), 0);
    }

    #[test]
    fn test_overdue_sessions_time_out() {
        let transport = FakeTransport::default();
        let mut agg =
            StreamAggregator::new(Box::new(transport.clone())).with_timeout(Duration::from_secs(5));
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        let opened = Instant::now();
        let handle = agg
            .open(StreamRequest::new("hi", None), recording_callbacks(&recorder), opened)
            .unwrap();
        agg.dispatch(handle.id(), Frame::chunk("half"));

        assert_eq!(agg.next_deadline(), Some(opened + Duration::from_secs(5)));
        assert_eq!(agg.expire_overdue(opened + Duration::from_secs(4)), 0);
        assert_eq!(agg.expire_overdue(opened + Duration::from_secs(6)), 1);

        let recorder = recorder.borrow();
        assert_eq!(
            recorder.errors,
            vec![(StreamError::TimedOut, "half".to_string())]
        );
        assert!(recorder.completed.is_empty());
        assert!(!agg.is_active(handle));
        assert_eq!(transport.closed.borrow().len(), 1);
    }
}
