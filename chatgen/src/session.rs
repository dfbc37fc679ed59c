//! Turn API for interactive front ends.
//!
//! [`ChatSession`] owns a [`GenerationEngine`] on a dedicated worker thread
//! so the caller's thread (a UI loop, an FFI caller) never blocks on the
//! model. At most one turn is in flight: a second [`ChatSession::submit`]
//! before the first reply is taken fails with [`SessionError::Busy`].

use crate::engine::{CancelToken, GenerationEngine, TurnReply, TurnStatus};
use crate::error::ModelError;
use crate::port::ModelPort;
use crate::tokenizer::Tokenizer;
use crate::transcript::TranscriptStore;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("a turn is already in flight")]
    Busy,

    #[error("generation worker has stopped")]
    WorkerGone,
}

enum Command {
    Turn {
        text: String,
        cancel: CancelToken,
        reply_tx: Sender<TurnReply>,
    },
    Reset,
    Shutdown,
}

pub struct ChatSession {
    command_tx: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    in_flight: Arc<AtomicBool>,
}

impl ChatSession {
    /// Move `engine` onto a worker thread. Finished turns are written to
    /// `transcript` when one is given.
    pub fn spawn<M, T>(engine: GenerationEngine<M, T>, transcript: Option<TranscriptStore>) -> Self
    where
        M: ModelPort + Send + 'static,
        T: Tokenizer + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel::<Command>();
        let in_flight = Arc::new(AtomicBool::new(false));
        let worker_flag = Arc::clone(&in_flight);
        let worker =
            thread::spawn(move || worker_main(engine, transcript, command_rx, worker_flag));
        tracing::info!("Chat session worker started");
        Self {
            command_tx: Some(command_tx),
            worker: Some(worker),
            in_flight,
        }
    }

    /// Queue a turn. Blank text resolves immediately without reaching the
    /// worker.
    pub fn submit(&self, text: &str) -> Result<PendingReply, SessionError> {
        if text.trim().is_empty() {
            return Ok(PendingReply::ready(TurnReply::skipped()));
        }
        if self.worker.as_ref().map_or(true, |w| w.is_finished()) {
            return Err(SessionError::WorkerGone);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::Busy);
        }

        let (reply_tx, reply_rx) = mpsc::channel();
        let cancel = CancelToken::new();
        let command = Command::Turn {
            text: text.to_string(),
            cancel: cancel.clone(),
            reply_tx,
        };
        if self.send(command).is_err() {
            self.in_flight.store(false, Ordering::SeqCst);
            return Err(SessionError::WorkerGone);
        }
        Ok(PendingReply {
            rx: Some(reply_rx),
            ready: None,
            cancel,
        })
    }

    /// Drop the rolling context. Runs after any queued turn.
    pub fn reset(&self) -> Result<(), SessionError> {
        self.send(Command::Reset)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.command_tx
            .as_ref()
            .ok_or(SessionError::WorkerGone)?
            .send(command)
            .map_err(|_| SessionError::WorkerGone)
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(Command::Shutdown);
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Handle to a submitted turn.
pub struct PendingReply {
    rx: Option<Receiver<TurnReply>>,
    ready: Option<TurnReply>,
    cancel: CancelToken,
}

impl PendingReply {
    fn ready(reply: TurnReply) -> Self {
        Self {
            rx: None,
            ready: Some(reply),
            cancel: CancelToken::new(),
        }
    }

    /// Ask the worker to stop before its next model call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the turn finishes.
    pub fn wait(mut self) -> Result<TurnReply, SessionError> {
        if let Some(reply) = self.ready.take() {
            return Ok(reply);
        }
        match self.rx.take() {
            Some(rx) => rx.recv().map_err(|_| SessionError::WorkerGone),
            None => Err(SessionError::WorkerGone),
        }
    }

    /// Non-blocking check; `Ok(None)` while the turn is still running.
    pub fn poll(&mut self) -> Result<Option<TurnReply>, SessionError> {
        if let Some(reply) = self.ready.take() {
            return Ok(Some(reply));
        }
        let Some(rx) = self.rx.as_ref() else {
            return Ok(None);
        };
        match rx.try_recv() {
            Ok(reply) => {
                self.rx = None;
                Ok(Some(reply))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SessionError::WorkerGone),
        }
    }
}

fn worker_main<M, T>(
    mut engine: GenerationEngine<M, T>,
    transcript: Option<TranscriptStore>,
    command_rx: Receiver<Command>,
    in_flight: Arc<AtomicBool>,
) where
    M: ModelPort,
    T: Tokenizer,
{
    loop {
        match command_rx.recv() {
            Ok(Command::Turn {
                text,
                cancel,
                reply_tx,
            }) => {
                // cleared on every exit path, unwinding included
                let flight = FlightGuard(&in_flight);
                let turn = panic::catch_unwind(AssertUnwindSafe(|| {
                    engine.generate_with_cancel(&text, &cancel)
                }));
                let reply = turn.unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    tracing::error!("Model panicked during turn: {}", message);
                    TurnReply {
                        text: String::new(),
                        tokens: Vec::new(),
                        status: TurnStatus::Aborted(ModelError::Runtime(format!(
                            "model panicked: {}",
                            message
                        ))),
                    }
                });
                if let Some(store) = &transcript {
                    if reply.status != TurnStatus::Skipped {
                        if let Err(e) = store.record_turn(&text, &reply) {
                            tracing::warn!("Failed to record turn in transcript: {}", e);
                        }
                    }
                }
                // clear before replying so the caller can submit right away
                drop(flight);
                let _ = reply_tx.send(reply);
            }
            Ok(Command::Reset) => {
                engine.reset_context();
                tracing::info!("Rolling context cleared");
            }
            Ok(Command::Shutdown) => {
                tracing::info!("Chat session worker shutting down");
                break;
            }
            Err(_) => {
                tracing::debug!("Command channel closed, worker exiting");
                break;
            }
        }
    }
}

struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
