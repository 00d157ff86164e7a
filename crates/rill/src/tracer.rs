//! Execution tracing hooks.
//!
//! The evaluator is parameterized over an [`EvalTracer`] so tracing is a
//! zero-cost abstraction: with [`NoopTracer`] every hook compiles away via
//! monomorphization, the same way [`NoLimitTracker`](crate::NoLimitTracker)
//! eliminates resource checking. [`StderrTracer`] gives a human-readable
//! execution log; [`RecordingTracer`] captures events for assertions or
//! post-mortem analysis.

/// Trace event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A statement began at the given byte offset of its source buffer.
    Statement {
        /// Byte offset of the statement's first token.
        offset: usize,
    },
    /// A function call pushed a frame.
    Call {
        /// Name the function was called through, if any.
        name: String,
        /// Scope stack depth after the push.
        depth: usize,
    },
    /// A function call popped its frame.
    Return {
        /// Scope stack depth after the pop.
        depth: usize,
    },
    /// A native callback was invoked.
    Native {
        /// Name the function was called through, if any.
        name: String,
    },
}

/// Hook points the evaluator reports execution events through.
pub trait EvalTracer {
    /// Called at the start of each executed statement.
    fn on_statement(&mut self, offset: usize) {
        let _ = offset;
    }

    /// Called when a function call pushes a frame.
    fn on_call(&mut self, name: &str, depth: usize) {
        let _ = (name, depth);
    }

    /// Called when a function call pops its frame.
    fn on_return(&mut self, depth: usize) {
        let _ = depth;
    }

    /// Called when a native callback is about to run.
    fn on_native(&mut self, name: &str) {
        let _ = name;
    }
}

/// Zero-cost no-op tracer (the default).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl EvalTracer for NoopTracer {}

/// Human-readable execution log on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrTracer;

impl EvalTracer for StderrTracer {
    fn on_statement(&mut self, offset: usize) {
        eprintln!("stmt @{offset}");
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        eprintln!("{:indent$}call {name}", "", indent = depth * 2);
    }

    fn on_return(&mut self, depth: usize) {
        eprintln!("{:indent$}return", "", indent = depth * 2);
    }

    fn on_native(&mut self, name: &str) {
        eprintln!("native {name}");
    }
}

/// Records every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    /// Captured events, in execution order.
    pub events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of captured `Call` events.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, TraceEvent::Call { .. }))
            .count()
    }
}

impl EvalTracer for RecordingTracer {
    fn on_statement(&mut self, offset: usize) {
        self.events.push(TraceEvent::Statement { offset });
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        self.events.push(TraceEvent::Call {
            name: name.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.events.push(TraceEvent::Return { depth });
    }

    fn on_native(&mut self, name: &str) {
        self.events.push(TraceEvent::Native { name: name.to_owned() });
    }
}
