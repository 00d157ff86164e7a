#![doc = include_str!("../../../README.md")]
#![expect(dead_code, reason = "the value model keeps its full predicate surface")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing follows script coercion rules")]
#![expect(clippy::cast_sign_loss, reason = "unsigned shift reinterprets the bit pattern")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors the script integer model")]
#![expect(clippy::float_cmp, reason = "script equality compares doubles exactly")]

mod context;
mod error;
mod eval;
mod heap;
mod lexer;
mod object;
mod reference;
mod resource;
mod token;
mod tracer;
mod value;

pub use crate::{
    context::{Context, FrameView, NativeCallback},
    error::{ExcKind, Exception},
    heap::{HeapDiff, HeapStats},
    object::Object,
    resource::{
        DEFAULT_MAX_RECURSION_DEPTH, LimitedTracker, MAX_DATA_RECURSION_DEPTH, NoLimitTracker, ResourceError,
        ResourceLimits, ResourceTracker,
    },
    tracer::{EvalTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
};
