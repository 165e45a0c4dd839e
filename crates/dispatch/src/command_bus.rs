//! Command bus: routes a `CommandEnvelope` to a registered handler through
//! the middleware pipeline.
//!
//! The bus is a registry of `command_type -> handler`, populated by
//! `register`; it does not itself know how to load, decide, or persist
//! anything for a given command type — that load/decide/persist/publish
//! pipeline lives inside whatever a registered handler does (typically
//! built on `escore_runtime::AggregateRepository`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::instrument;

use crate::envelope::CommandEnvelope;
use crate::error::DispatchError;
use crate::middleware::Pipeline;

/// Handles one command type end to end (decide, persist, publish). Kept
/// untyped at this boundary so the registry can hold handlers for many
/// command types; `register_typed` is the ergonomic, payload-typed form.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, command: &CommandEnvelope) -> Result<(), DispatchError>;
}

impl<F> CommandHandler for F
where
    F: Fn(&CommandEnvelope) -> Result<(), DispatchError> + Send + Sync,
{
    fn handle(&self, command: &CommandEnvelope) -> Result<(), DispatchError> {
        self(command)
    }
}

/// Adapts a payload-typed handler (`Fn(T) -> Result<(), DispatchError>`)
/// to the untyped `CommandHandler` interface by decoding the envelope's
/// JSON payload into `T` before calling it.
struct TypedHandler<T, F> {
    inner: F,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, F> CommandHandler for TypedHandler<T, F>
where
    T: serde::de::DeserializeOwned,
    F: Fn(&CommandEnvelope, T) -> Result<(), DispatchError> + Send + Sync,
{
    fn handle(&self, command: &CommandEnvelope) -> Result<(), DispatchError> {
        let payload: T = command
            .decode()
            .map_err(|e| DispatchError::InvalidCommand(format!("payload decode failed: {e}")))?;
        (self.inner)(command, payload)
    }
}

/// Typed handler registry with a middleware pipeline in front of dispatch.
///
/// `register` is exclusive: re-registering a command type overwrites the
/// previous handler. The handler map is read-mostly, guarded by a coarse
/// reader/writer lock, matching the concurrency model of every other
/// shared registry in this framework.
pub struct CommandBus {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
    pipeline: Pipeline,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            pipeline: Pipeline::new(),
        }
    }

    pub fn with_pipeline(pipeline: Pipeline) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            pipeline,
        }
    }

    /// Registers `handler` for `command_type`, overwriting any previous
    /// registration for the same type.
    pub fn register(&self, command_type: impl Into<String>, handler: impl CommandHandler + 'static) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(command_type.into(), Arc::new(handler));
    }

    /// Ergonomic registration for a payload-typed handler: decodes the
    /// envelope's JSON payload into `T` before calling `handler`.
    pub fn register_typed<T, F>(&self, command_type: impl Into<String>, handler: F)
    where
        T: serde::de::DeserializeOwned + Send + Sync + 'static,
        F: Fn(&CommandEnvelope, T) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.register(
            command_type,
            TypedHandler {
                inner: handler,
                _marker: std::marker::PhantomData,
            },
        );
    }

    pub fn unregister(&self, command_type: &str) {
        self.handlers.write().unwrap_or_else(|e| e.into_inner()).remove(command_type);
    }

    pub fn is_registered(&self, command_type: &str) -> bool {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).contains_key(command_type)
    }

    /// Runs the middleware pipeline, then looks up and calls the handler
    /// registered for `command.command_type()`. Dispatched over an
    /// implicit synchronous transport: the handler's error (or success) is
    /// this call's return value, which is what the saga orchestrator and
    /// any caller depending on immediate business-failure reporting rely
    /// on (spec's transport-choice note for commands).
    #[instrument(skip(self, command), fields(command_type = %command.command_type(), aggregate_id = %command.aggregate_id()))]
    pub fn dispatch(&self, command: &mut CommandEnvelope) -> Result<(), DispatchError> {
        let command_type = command.command_type().to_string();
        self.pipeline.run(command, &move |cmd| {
            let handler = self
                .handlers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(&command_type)
                .cloned();

            match handler {
                Some(handler) => handler.handle(cmd),
                None => Err(DispatchError::HandlerNotFound(command_type.clone())),
            }
        })
    }
}
