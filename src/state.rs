//! The session state machine.
//!
//! Every transition goes through [`SessionStateMachine::apply`], which takes
//! the current state by value and either produces the next state or hands the
//! old one back untouched. Resources live inside the state variants, so
//! leaving a state releases them and no partially updated state is visible.

use std::fmt;
use std::mem;

use log::{debug, info};

use crate::engine::Locator;
use crate::error::SessionError;
use crate::file::{self, FileHandle, RawFile};
use crate::objects::{ObjectRegistry, ObjectUrl, ScopedObject};

/// Identifies one compress invocation. Advanced on every start, removal and
/// selection so callbacks from abandoned work can be recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Idle,
    FileSelected,
    Compressing,
    ResultReady,
    Failed,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateKind::Idle => "idle",
            StateKind::FileSelected => "file selected",
            StateKind::Compressing => "compressing",
            StateKind::ResultReady => "result ready",
            StateKind::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A compressed artifact ready for download.
#[derive(Debug)]
pub struct CompressionResult {
    output_ref: Locator,
    derived_name: String,
    local: ScopedObject,
}

impl CompressionResult {
    pub fn new(output_ref: Locator, derived_name: String, local: ScopedObject) -> Self {
        Self {
            output_ref,
            derived_name,
            local,
        }
    }

    /// Where the engine left the output. May already be released.
    pub fn output_ref(&self) -> &Locator {
        &self.output_ref
    }

    pub fn derived_name(&self) -> &str {
        &self.derived_name
    }

    pub fn local_ref(&self) -> &ObjectUrl {
        self.local.url()
    }
}

#[derive(Debug)]
pub enum SessionState {
    Idle,
    FileSelected {
        file: FileHandle,
    },
    Compressing {
        file: FileHandle,
        generation: Generation,
    },
    ResultReady {
        file: FileHandle,
        result: CompressionResult,
    },
    Failed {
        file: FileHandle,
        reason: SessionError,
    },
}

impl SessionState {
    pub fn kind(&self) -> StateKind {
        match self {
            SessionState::Idle => StateKind::Idle,
            SessionState::FileSelected { .. } => StateKind::FileSelected,
            SessionState::Compressing { .. } => StateKind::Compressing,
            SessionState::ResultReady { .. } => StateKind::ResultReady,
            SessionState::Failed { .. } => StateKind::Failed,
        }
    }

    pub fn file(&self) -> Option<&FileHandle> {
        match self {
            SessionState::Idle => None,
            SessionState::FileSelected { file }
            | SessionState::Compressing { file, .. }
            | SessionState::ResultReady { file, .. }
            | SessionState::Failed { file, .. } => Some(file),
        }
    }

    pub fn result(&self) -> Option<&CompressionResult> {
        match self {
            SessionState::ResultReady { result, .. } => Some(result),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum Event {
    Select(RawFile),
    Remove,
    Start,
    EngineFailed {
        generation: Generation,
        error: SessionError,
    },
    Fetched {
        generation: Generation,
        result: CompressionResult,
    },
    FetchFailed {
        generation: Generation,
        error: SessionError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: StateKind,
    pub to: StateKind,
}

pub struct SessionStateMachine {
    state: SessionState,
    generation: Generation,
    error: Option<String>,
    registry: ObjectRegistry,
}

impl SessionStateMachine {
    pub fn new(registry: ObjectRegistry) -> Self {
        Self {
            state: SessionState::Idle,
            generation: Generation::default(),
            error: None,
            registry,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    /// User-facing message of the last rejected selection or failure.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The file being compressed, if `generation` is still the live one.
    pub fn active_file(&self, generation: Generation) -> Option<&FileHandle> {
        match &self.state {
            SessionState::Compressing {
                file,
                generation: active,
            } if *active == generation => Some(file),
            _ => None,
        }
    }

    pub fn is_active(&self, generation: Generation) -> bool {
        self.active_file(generation).is_some()
    }

    pub fn apply(&mut self, event: Event) -> Result<Transition, SessionError> {
        if let Event::Select(raw) = &event {
            if let Err(e) = file::validate(raw) {
                self.error = Some(e.to_string());
                return Err(e);
            }
        }

        let from = self.state.kind();
        let current = mem::replace(&mut self.state, SessionState::Idle);
        match self.step(current, event) {
            Ok(next) => {
                self.state = next;
                let transition = Transition {
                    from,
                    to: self.state.kind(),
                };
                info!("session {} -> {} ({})", from, transition.to, self.generation);
                Ok(transition)
            }
            Err((restored, err)) => {
                self.state = restored;
                debug!("session stays {}: {}", from, err);
                Err(err)
            }
        }
    }

    fn step(
        &mut self,
        current: SessionState,
        event: Event,
    ) -> Result<SessionState, (SessionState, SessionError)> {
        use SessionState::*;

        match event {
            Event::Select(raw) => {
                // The previous input and result are revoked before the new input is registered.
                drop(current);
                self.generation = self.generation.next();
                self.error = None;
                Ok(FileSelected {
                    file: FileHandle::open(&self.registry, raw),
                })
            }
            Event::Remove => {
                if !matches!(current, Idle) {
                    self.generation = self.generation.next();
                }
                drop(current);
                self.error = None;
                Ok(Idle)
            }
            Event::Start => match current {
                FileSelected { file } => {
                    self.generation = self.generation.next();
                    Ok(Compressing {
                        file,
                        generation: self.generation,
                    })
                }
                other => {
                    let state = other.kind();
                    Err((
                        other,
                        SessionError::InvalidState {
                            operation: "start",
                            state,
                        },
                    ))
                }
            },
            Event::EngineFailed { generation, error } | Event::FetchFailed { generation, error } => {
                match current {
                    Compressing {
                        file,
                        generation: active,
                    } if active == generation => {
                        self.error = Some(error.to_string());
                        Ok(Failed {
                            file,
                            reason: error,
                        })
                    }
                    other => Err((other, SessionError::StaleCallback(generation))),
                }
            }
            Event::Fetched { generation, result } => match current {
                Compressing {
                    file,
                    generation: active,
                } if active == generation => Ok(ResultReady { file, result }),
                // dropping `result` revokes its local object
                other => Err((other, SessionError::StaleCallback(generation))),
            },
        }
    }
}

impl fmt::Debug for SessionStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStateMachine")
            .field("state", &self.state.kind())
            .field("generation", &self.generation)
            .field("error", &self.error)
            .finish()
    }
}
