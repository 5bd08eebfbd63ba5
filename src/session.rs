//! Drives compress invocations against a [`SessionStateMachine`].
//!
//! Engine callbacks may run on any thread. They only enqueue [`Signal`]s
//! tagged with the generation that issued them; the signals are applied on
//! the caller's task by [`CompressionSession::next_update`], where anything
//! from a generation that is no longer active is dropped.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::engine::{
    CompressionEngine, CompressionRequest, Datum, EngineCallbacks, Locator, ResultDescriptor,
    StatusDescriptor,
};
use crate::error::SessionError;
use crate::fetcher::{ObjectFetcher, ResultFetcher};
use crate::file::{FileHandle, RawFile};
use crate::objects::{ObjectRegistry, ObjectUrl, ScopedObject};
use crate::state::{
    CompressionResult, Event, Generation, SessionState, SessionStateMachine, StateKind, Transition,
};
use crate::telemetry::{LogSink, TelemetrySink};

struct Signal {
    generation: Generation,
    kind: SignalKind,
}

enum SignalKind {
    Progress(Vec<Datum>),
    Status(StatusDescriptor),
    Completed(ResultDescriptor),
    Abandoned,
    Fetched {
        output: Locator,
        derived_name: String,
        result: Result<ScopedObject, SessionError>,
    },
}

/// What a call to [`CompressionSession::next_update`] did.
#[derive(Debug)]
pub enum SessionUpdate {
    Progress {
        generation: Generation,
        data: Vec<Datum>,
    },
    Status {
        generation: Generation,
        status: StatusDescriptor,
    },
    /// The engine finished and its output is being retrieved.
    Fetching {
        generation: Generation,
        output: Locator,
    },
    Transitioned(Transition),
    /// A callback from abandoned work was dropped.
    Discarded(Generation),
}

/// What the download trigger needs.
#[derive(Debug, Clone, Copy)]
pub struct Download<'a> {
    pub local_ref: &'a ObjectUrl,
    pub suggested_name: &'a str,
}

pub struct CompressionSession<E, F = ObjectFetcher> {
    machine: SessionStateMachine,
    engine: E,
    fetcher: Arc<F>,
    sink: Arc<dyn TelemetrySink>,
    signals_tx: UnboundedSender<Signal>,
    signals_rx: UnboundedReceiver<Signal>,
}

impl<E, F> CompressionSession<E, F>
where
    E: CompressionEngine,
    F: ResultFetcher + 'static,
{
    pub fn new(registry: ObjectRegistry, engine: E, fetcher: F) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        Self {
            machine: SessionStateMachine::new(registry),
            engine,
            fetcher: Arc::new(fetcher),
            sink: Arc::new(LogSink),
            signals_tx,
            signals_rx,
        }
    }

    pub fn with_sink(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn state(&self) -> &SessionState {
        self.machine.state()
    }

    pub fn kind(&self) -> StateKind {
        self.machine.kind()
    }

    pub fn file(&self) -> Option<&FileHandle> {
        self.machine.state().file()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.machine.error()
    }

    /// Replaces whatever is selected with `raw`. A rejected file leaves the
    /// session as it was apart from the error message.
    pub fn select(&mut self, raw: RawFile) -> Result<Transition, SessionError> {
        let name = raw.name.clone();
        self.machine.apply(Event::Select(raw)).map_err(|e| {
            warn!("rejected selection {}: {}", name, e);
            e
        })
    }

    /// Drops the selection and any result. Work still running is abandoned.
    pub fn remove(&mut self) {
        if let Err(e) = self.machine.apply(Event::Remove) {
            warn!("remove rejected: {}", e);
        }
    }

    /// Hands the selected file to the engine. The session is `Compressing`
    /// when this returns `Ok`; the outcome arrives through `next_update`.
    pub fn start(&mut self) -> Result<Generation, SessionError> {
        let request = match self.machine.state() {
            SessionState::FileSelected { file } => CompressionRequest {
                input: file.source_ref().clone(),
            },
            other => {
                let err = SessionError::InvalidState {
                    operation: "start",
                    state: other.kind(),
                };
                warn!("{}", err);
                return Err(err);
            }
        };

        self.machine.apply(Event::Start)?;
        let generation = self.machine.generation();

        if let Err(e) = self.engine.compress(request, self.callbacks(generation)) {
            let error = SessionError::from(e);
            warn!("{}", error);
            self.machine.apply(Event::EngineFailed {
                generation,
                error: error.clone(),
            })?;
            return Err(error);
        }
        Ok(generation)
    }

    fn callbacks(&self, generation: Generation) -> EngineCallbacks {
        let complete = self.signals_tx.clone();
        let progress = self.signals_tx.clone();
        let status = self.signals_tx.clone();
        let abandon = self.signals_tx.clone();

        // Send errors only mean the session is gone.
        EngineCallbacks::new(
            move |descriptor| {
                let _ = complete.send(Signal {
                    generation,
                    kind: SignalKind::Completed(descriptor),
                });
            },
            move |data| {
                let _ = progress.send(Signal {
                    generation,
                    kind: SignalKind::Progress(data),
                });
            },
            move |descriptor| {
                let _ = status.send(Signal {
                    generation,
                    kind: SignalKind::Status(descriptor),
                });
            },
        )
        .on_abandon(move || {
            let _ = abandon.send(Signal {
                generation,
                kind: SignalKind::Abandoned,
            });
        })
    }

    /// Waits for the next engine or fetch signal and applies it.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        let signal = self.signals_rx.recv().await?;
        Some(self.handle(signal))
    }

    /// Pumps signals until the session leaves `Compressing`.
    pub async fn settle(&mut self) -> StateKind {
        while self.machine.kind() == StateKind::Compressing {
            if self.next_update().await.is_none() {
                break;
            }
        }
        self.machine.kind()
    }

    pub fn download(&self) -> Option<Download<'_>> {
        self.machine.state().result().map(|result| Download {
            local_ref: result.local_ref(),
            suggested_name: result.derived_name(),
        })
    }

    fn handle(&mut self, signal: Signal) -> SessionUpdate {
        let Signal { generation, kind } = signal;
        match kind {
            SignalKind::Progress(data) => {
                if !self.machine.is_active(generation) {
                    debug!("dropping stale progress from {}", generation);
                    return SessionUpdate::Discarded(generation);
                }
                self.sink.progress(generation, &data);
                SessionUpdate::Progress { generation, data }
            }
            SignalKind::Status(status) => {
                if !self.machine.is_active(generation) {
                    debug!("dropping stale status from {}", generation);
                    return SessionUpdate::Discarded(generation);
                }
                self.sink.status(generation, &status);
                SessionUpdate::Status { generation, status }
            }
            SignalKind::Completed(descriptor) => {
                let Some(file) = self.machine.active_file(generation) else {
                    debug!("dropping stale completion from {}", generation);
                    self.fetcher.release(&descriptor.output);
                    return SessionUpdate::Discarded(generation);
                };
                let derived_name = file.output_name();
                self.spawn_fetch(generation, descriptor.output.clone(), derived_name);
                SessionUpdate::Fetching {
                    generation,
                    output: descriptor.output,
                }
            }
            SignalKind::Abandoned => self.apply_signal(
                generation,
                Event::EngineFailed {
                    generation,
                    error: SessionError::EngineInvocation(
                        "engine stopped without producing a result".to_string(),
                    ),
                },
            ),
            SignalKind::Fetched {
                output,
                derived_name,
                result,
            } => {
                let event = match result {
                    Ok(local) => Event::Fetched {
                        generation,
                        result: CompressionResult::new(output, derived_name, local),
                    },
                    Err(error) => {
                        warn!("{}", error);
                        Event::FetchFailed { generation, error }
                    }
                };
                self.apply_signal(generation, event)
            }
        }
    }

    fn apply_signal(&mut self, generation: Generation, event: Event) -> SessionUpdate {
        match self.machine.apply(event) {
            Ok(transition) => SessionUpdate::Transitioned(transition),
            Err(e) => {
                debug!("{}", e);
                SessionUpdate::Discarded(generation)
            }
        }
    }

    fn spawn_fetch(&self, generation: Generation, output: Locator, derived_name: String) {
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.signals_tx.clone();
        tokio::spawn(async move {
            let result = fetcher.materialize(&output).await;
            let _ = tx.send(Signal {
                generation,
                kind: SignalKind::Fetched {
                    output,
                    derived_name,
                    result,
                },
            });
        });
    }
}
