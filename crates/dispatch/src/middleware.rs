//! Command middleware pipeline.
//!
//! A `Vec` of trait objects, composed by hand rather than via an external
//! combinator crate.
//!
//! Registration order is execution order: the first middleware registered
//! is outermost, so it sees the command first on the way in and runs last
//! on the way out. A middleware that returns `Err` without calling `next`
//! short-circuits the chain; the terminal handler and any inner middleware
//! never run.

use crate::envelope::CommandEnvelope;
use crate::error::DispatchError;

/// One link in the pipeline. Implementations may inspect or mutate the
/// command's metadata, reject it outright, or run logic both before and
/// after `next` is invoked.
pub trait Middleware: Send + Sync {
    fn handle(&self, command: &mut CommandEnvelope, next: Next<'_>) -> Result<(), DispatchError>;
}

/// The remainder of the pipeline, from the current middleware's point of
/// view: the middlewares registered after it, followed by the terminal
/// handler.
pub struct Next<'a> {
    remaining: &'a [Box<dyn Middleware>],
    terminal: &'a dyn Fn(&mut CommandEnvelope) -> Result<(), DispatchError>,
}

impl<'a> Next<'a> {
    pub fn run(self, command: &mut CommandEnvelope) -> Result<(), DispatchError> {
        match self.remaining.split_first() {
            Some((mw, rest)) => mw.handle(
                command,
                Next {
                    remaining: rest,
                    terminal: self.terminal,
                },
            ),
            None => (self.terminal)(command),
        }
    }
}

/// An ordered list of middlewares, wrapping a terminal handler.
#[derive(Default)]
pub struct Pipeline {
    middlewares: Vec<Box<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware. Middlewares added later are nested deeper
    /// (closer to the terminal handler).
    pub fn push(&mut self, middleware: Box<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Runs `command` through every middleware, in registration order,
    /// then `terminal`.
    pub fn run(
        &self,
        command: &mut CommandEnvelope,
        terminal: &dyn Fn(&mut CommandEnvelope) -> Result<(), DispatchError>,
    ) -> Result<(), DispatchError> {
        Next {
            remaining: &self.middlewares,
            terminal,
        }
        .run(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escore_core::AggregateId;
    use std::sync::{Arc, Mutex};

    fn command() -> CommandEnvelope {
        CommandEnvelope::new(
            uuid::Uuid::now_v7(),
            "test.command",
            AggregateId::new(1),
            "test",
            chrono::Utc::now(),
            Default::default(),
            serde_json::json!({}),
        )
    }

    struct Tracing {
        label: &'static str,
        trace: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Tracing {
        fn handle(&self, command: &mut CommandEnvelope, next: Next<'_>) -> Result<(), DispatchError> {
            self.trace.lock().unwrap().push(format!("{}.before", self.label));
            let result = next.run(command);
            self.trace
                .lock()
                .unwrap()
                .push(format!("{}.after({})", self.label, if result.is_ok() { "ok" } else { "err" }));
            result
        }
    }

    struct Rejecting {
        label: &'static str,
        trace: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Rejecting {
        fn handle(&self, _command: &mut CommandEnvelope, _next: Next<'_>) -> Result<(), DispatchError> {
            self.trace.lock().unwrap().push(format!("{}.before", self.label));
            Err(DispatchError::MiddlewareRejected(self.label.to_string()))
        }
    }

    #[test]
    fn executes_outer_to_inner_then_unwinds_in_reverse() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        pipeline.push(Box::new(Tracing { label: "A", trace: trace.clone() }));
        pipeline.push(Box::new(Tracing { label: "B", trace: trace.clone() }));
        pipeline.push(Box::new(Tracing { label: "C", trace: trace.clone() }));

        let handler_ran = Arc::new(Mutex::new(false));
        let handler_ran_inner = handler_ran.clone();
        let trace_handler = trace.clone();
        pipeline
            .run(&mut command(), &move |_cmd| {
                trace_handler.lock().unwrap().push("handler".to_string());
                *handler_ran_inner.lock().unwrap() = true;
                Ok(())
            })
            .unwrap();

        assert!(*handler_ran.lock().unwrap());
        assert_eq!(
            *trace.lock().unwrap(),
            vec![
                "A.before", "B.before", "C.before", "handler", "C.after(ok)", "B.after(ok)", "A.after(ok)",
            ]
        );
    }

    #[test]
    fn a_rejecting_middleware_short_circuits_and_skips_the_handler() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        pipeline.push(Box::new(Tracing { label: "A", trace: trace.clone() }));
        pipeline.push(Box::new(Rejecting { label: "B", trace: trace.clone() }));
        pipeline.push(Box::new(Tracing { label: "C", trace: trace.clone() }));

        let handler_ran = Arc::new(Mutex::new(false));
        let handler_ran_inner = handler_ran.clone();
        let err = pipeline
            .run(&mut command(), &move |_cmd| {
                *handler_ran_inner.lock().unwrap() = true;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, DispatchError::MiddlewareRejected(label) if label == "B"));
        assert!(!*handler_ran.lock().unwrap());
        assert_eq!(*trace.lock().unwrap(), vec!["A.before", "B.before", "A.after(err)"]);
    }
}
