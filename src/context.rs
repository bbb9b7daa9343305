//! Cancellation and deadlines for a subscription's lifetime.
//!
//! A [`Context`] is handed to every `subscribe` call and to every resolver.
//! Derived contexts inherit their parent's cancellation and deadline, so
//! cancelling a parent is observed by every child.

use crossbeam_channel::{bounded, Receiver, RecvError, Select, SelectedOperation, SendError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a context is no longer live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellation source. Dropping the sender disconnects `done`, which
/// wakes every `Select` waiting on it.
struct CancelToken {
    cancelled: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
    done: Receiver<()>,
}

impl CancelToken {
    fn new() -> Self {
        let (sender, done) = bounded(0);
        Self {
            cancelled: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            done,
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.sender.lock().take();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Carries cancellation and an optional deadline across API boundaries.
#[derive(Clone, Default)]
pub struct Context {
    tokens: Vec<Arc<CancelToken>>,
    deadline: Option<Instant>,
}

/// Cancels the context it was created with (and all contexts derived from it).
#[derive(Clone)]
pub struct CancelHandle(Arc<CancelToken>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that can be cancelled through the returned handle.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let token = Arc::new(CancelToken::new());
        let mut tokens = self.tokens.clone();
        tokens.push(Arc::clone(&token));
        let ctx = Context {
            tokens,
            deadline: self.deadline,
        };
        (ctx, CancelHandle(token))
    }

    /// Derive a context that expires at `deadline` (or earlier, if the parent does).
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Context {
            tokens: self.tokens.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `None` while the context is live; otherwise the reason it ended.
    pub fn err(&self) -> Option<ContextError> {
        if self.tokens.iter().any(|t| t.is_cancelled()) {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Block on `rx` until a message arrives, the channel disconnects, or
    /// this context ends.
    pub fn recv<T>(&self, rx: &Receiver<T>) -> Result<Result<T, RecvError>, ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        let timer = self.deadline.map(crossbeam_channel::at);
        let mut sel = Select::new();
        let target = sel.recv(rx);
        let waiters = self.register(&mut sel, timer.as_ref());
        let oper = sel.select();
        if oper.index() == target {
            return Ok(oper.recv(rx));
        }
        Err(waiters.complete(oper))
    }

    /// Block sending `msg` on `tx` until a receiver takes it, the channel
    /// disconnects, or this context ends. On cancellation the message is
    /// handed back alongside the reason.
    pub fn send<T>(&self, tx: &Sender<T>, msg: T) -> Result<Result<(), SendError<T>>, (ContextError, T)> {
        if let Some(err) = self.err() {
            return Err((err, msg));
        }
        let timer = self.deadline.map(crossbeam_channel::at);
        let mut sel = Select::new();
        let target = sel.send(tx);
        let waiters = self.register(&mut sel, timer.as_ref());
        let oper = sel.select();
        if oper.index() == target {
            return Ok(oper.send(tx, msg));
        }
        Err((waiters.complete(oper), msg))
    }

    fn register<'a>(&'a self, sel: &mut Select<'a>, timer: Option<&'a Receiver<Instant>>) -> Waiters<'a> {
        let tokens = self
            .tokens
            .iter()
            .map(|t| (sel.recv(&t.done), &t.done))
            .collect();
        let timer = timer.map(|rx| (sel.recv(rx), rx));
        Waiters { tokens, timer }
    }
}

/// The cancellation operations registered on a `Select` next to the real one.
struct Waiters<'a> {
    tokens: Vec<(usize, &'a Receiver<()>)>,
    timer: Option<(usize, &'a Receiver<Instant>)>,
}

impl Waiters<'_> {
    /// Complete a selected cancellation operation and report which one fired.
    fn complete(&self, oper: SelectedOperation<'_>) -> ContextError {
        let index = oper.index();
        if let Some((i, rx)) = self.timer {
            if i == index {
                let _ = oper.recv(rx);
                return ContextError::DeadlineExceeded;
            }
        }
        match self.tokens.iter().find(|(i, _)| *i == index) {
            Some((_, rx)) => {
                let _ = oper.recv(rx);
            }
            // Select only returns registered indices.
            None => std::mem::forget(oper),
        }
        ContextError::Canceled
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.tokens.iter().any(|t| t.is_cancelled()))
            .field("deadline", &self.deadline)
            .finish()
    }
}
