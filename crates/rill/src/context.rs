//! The embedding surface: contexts, native functions and frame views.

use std::rc::Rc;

use crate::{
    error::{Exception, RunResult},
    eval::Evaluator,
    heap::{Heap, HeapId, HeapStats},
    lexer::Lexer,
    object::Object,
    resource::{LimitedTracker, NoLimitTracker, ResourceLimits, ResourceTracker},
    token::TokenKind,
    tracer::{EvalTracer, NoopTracer},
    value::{FunctionData, NativeId, RETURN_SLOT, THIS, Var},
};

/// An owned host callback invoked for a registered native function.
///
/// The callback receives a [`FrameView`] of the call frame: arguments are
/// read by name and a return value may be written back. State the callback
/// needs lives in its captures.
pub type NativeCallback<T = NoLimitTracker> = Box<dyn FnMut(&mut FrameView<'_, T>) -> Result<(), Exception>>;

pub(crate) struct NativeSlot<T: ResourceTracker> {
    /// Taken out for the duration of an invocation; `None` therefore also
    /// means "currently running".
    pub(crate) callback: Option<NativeCallback<T>>,
}

/// An interpreter context: the root scope, the value heap and the native
/// function registry.
///
/// Globals persist across [`execute`](Self::execute) calls; each call runs
/// its own fresh evaluator over the shared state, so re-entry from a native
/// callback (via [`FrameView::eval`]) is safe.
///
/// # Example
/// ```
/// use rill::{Context, Object};
///
/// let mut ctx = Context::new();
/// let result = ctx.evaluate("var a = 1 + 2 * 3; a;").unwrap();
/// assert_eq!(result, Object::Int(7));
/// ```
pub struct Context<T: ResourceTracker = NoLimitTracker> {
    heap: Heap<T>,
    root: HeapId,
    natives: Vec<NativeSlot<T>>,
}

impl Context<NoLimitTracker> {
    /// A context without resource limits (recursion depth stays bounded).
    #[must_use]
    pub fn new() -> Self {
        Self::with_tracker(NoLimitTracker)
    }
}

impl Default for Context<NoLimitTracker> {
    fn default() -> Self {
        Self::new()
    }
}

impl Context<LimitedTracker> {
    /// A context enforcing the given resource limits.
    #[must_use]
    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self::with_tracker(LimitedTracker::new(limits))
    }
}

impl<T: ResourceTracker> Context<T> {
    /// A context with a custom resource tracker.
    ///
    /// # Panics
    /// Panics if the tracker rejects the root scope allocation.
    pub fn with_tracker(tracker: T) -> Self {
        let mut heap = Heap::new(tracker);
        let root = heap
            .allocate(Var::object())
            .expect("resource limits must admit the root scope");
        Self {
            heap,
            root,
            natives: Vec::new(),
        }
    }

    /// Runs a top-level statement stream to the end of the source.
    pub fn execute(&mut self, source: &str) -> Result<(), Exception> {
        self.execute_traced(source, &mut NoopTracer)
    }

    /// Like [`execute`](Self::execute), reporting execution events to `tracer`.
    pub fn execute_traced(&mut self, source: &str, tracer: &mut impl EvalTracer) -> Result<(), Exception> {
        if let Some(result) = self.run(source, tracer)? {
            self.heap.dec_ref(result);
        }
        Ok(())
    }

    /// Runs the source and returns the value of its last executed expression
    /// statement (`Undefined` if there was none).
    pub fn evaluate(&mut self, source: &str) -> Result<Object, Exception> {
        self.evaluate_traced(source, &mut NoopTracer)
    }

    /// Like [`evaluate`](Self::evaluate), reporting execution events to `tracer`.
    pub fn evaluate_traced(&mut self, source: &str, tracer: &mut impl EvalTracer) -> Result<Object, Exception> {
        match self.run(source, tracer)? {
            Some(id) => {
                let object = Object::from_heap(&self.heap, id);
                self.heap.dec_ref(id);
                Ok(object)
            }
            None => Ok(Object::Undefined),
        }
    }

    fn run(&mut self, source: &str, tracer: &mut impl EvalTracer) -> RunResult<Option<HeapId>> {
        let lex = Lexer::new(source);
        Evaluator::new(&mut self.heap, &mut self.natives, tracer, lex, self.root).run()
    }

    /// Registers a native function callable from script.
    ///
    /// `signature` has the form `"function name(arg1, arg2)"` or
    /// `"function path.to.name(args)"`; dotted paths walk, and create,
    /// intermediate objects under the root scope.
    pub fn register_native(
        &mut self,
        signature: &str,
        callback: impl FnMut(&mut FrameView<'_, T>) -> Result<(), Exception> + 'static,
    ) -> Result<(), Exception> {
        let mut lex = Lexer::new(signature);
        lex.reset()?;
        lex.expect(TokenKind::Function)?;

        let mut path = lex.value.clone();
        lex.expect(TokenKind::Identifier)?;
        while lex.kind == TokenKind::Dot {
            lex.advance()?;
            path.push('.');
            path.push_str(&lex.value);
            lex.expect(TokenKind::Identifier)?;
        }

        lex.expect(TokenKind::LParen)?;
        let mut formals: Vec<String> = Vec::new();
        while lex.kind != TokenKind::RParen {
            formals.push(lex.value.clone());
            lex.expect(TokenKind::Identifier)?;
            if lex.kind != TokenKind::RParen {
                lex.expect(TokenKind::Comma)?;
            }
        }
        lex.expect(TokenKind::RParen)?;

        let native_id = NativeId(self.natives.len());
        let func = self.heap.allocate(Var::function(FunctionData {
            body: Rc::from(""),
            native: Some(native_id),
        }))?;
        for formal in &formals {
            let param = match self.heap.allocate(Var::undefined()) {
                Ok(param) => param,
                Err(error) => {
                    self.heap.dec_ref(func);
                    return Err(error.into());
                }
            };
            self.heap.add_child(func, formal, param);
        }

        match path.rsplit_once('.') {
            None => self.heap.add_child(self.root, &path, func),
            Some((parents, name)) => {
                let owner_ref = match self.heap.find_or_create_by_path(self.root, parents) {
                    Ok(owner) => owner,
                    Err(error) => {
                        self.heap.dec_ref(func);
                        return Err(error.into());
                    }
                };
                let owner = owner_ref.id();
                owner_ref.release(&mut self.heap);
                self.heap.add_child(owner, name, func);
            }
        }

        self.natives.push(NativeSlot {
            callback: Some(Box::new(callback)),
        });
        Ok(())
    }

    /// Installs (or replaces) a global under the root scope.
    pub fn set_global(&mut self, name: &str, value: &Object) -> Result<(), Exception> {
        let id = value.to_heap(&mut self.heap)?;
        self.heap.add_child(self.root, name, id);
        Ok(())
    }

    /// Reads a global out of the root scope.
    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<Object> {
        let child = *self.heap.get(self.root).children().get(name)?;
        Some(Object::from_heap(&self.heap, child))
    }

    /// Removes a global from the root scope.
    pub fn remove_global(&mut self, name: &str) -> Result<(), Exception> {
        self.heap.remove_child(self.root, name)
    }

    /// Snapshot of heap occupancy, for diagnostics and leak assertions.
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }
}

/// A native callback's view of its call frame.
///
/// Children of the frame are the arguments by name, `this` when the call
/// went through a member access, and the `return` slot the callback may
/// assign through [`set_return`](Self::set_return).
pub struct FrameView<'a, T: ResourceTracker = NoLimitTracker> {
    heap: &'a mut Heap<T>,
    natives: &'a mut Vec<NativeSlot<T>>,
    root: HeapId,
    frame: HeapId,
}

impl<'a, T: ResourceTracker> FrameView<'a, T> {
    pub(crate) fn new(
        heap: &'a mut Heap<T>,
        natives: &'a mut Vec<NativeSlot<T>>,
        root: HeapId,
        frame: HeapId,
    ) -> Self {
        Self {
            heap,
            natives,
            root,
            frame,
        }
    }

    fn frame_child(&self, name: &str) -> Option<HeapId> {
        self.heap.get(self.frame).children().get(name).copied()
    }

    /// The named argument as an owned [`Object`]; `Undefined` when absent.
    #[must_use]
    pub fn arg(&self, name: &str) -> Object {
        self.frame_child(name)
            .map_or(Object::Undefined, |child| Object::from_heap(self.heap, child))
    }

    /// The named argument coerced to its string form.
    #[must_use]
    pub fn arg_str(&self, name: &str) -> String {
        self.frame_child(name)
            .map_or_else(|| "undefined".to_owned(), |child| self.heap.var_to_string(child))
    }

    /// The named argument coerced to an integer.
    #[must_use]
    pub fn arg_int(&self, name: &str) -> i64 {
        self.frame_child(name).map_or(0, |child| self.heap.get(child).as_int())
    }

    /// The named argument coerced to a float.
    #[must_use]
    pub fn arg_float(&self, name: &str) -> f64 {
        self.frame_child(name).map_or(0.0, |child| self.heap.get(child).as_double())
    }

    /// The named argument coerced to a boolean (non-zero integer form).
    #[must_use]
    pub fn arg_bool(&self, name: &str) -> bool {
        self.frame_child(name).is_some_and(|child| self.heap.get(child).as_bool())
    }

    /// The receiver the function was called on, when it was called as a method.
    #[must_use]
    pub fn this(&self) -> Option<Object> {
        self.frame_child(THIS).map(|child| Object::from_heap(self.heap, child))
    }

    /// Reads a global from the root scope.
    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<Object> {
        let child = self.heap.get(self.root).children().get(name).copied()?;
        Some(Object::from_heap(self.heap, child))
    }

    /// Writes the call's return value.
    pub fn set_return(&mut self, value: &Object) -> Result<(), Exception> {
        let id = value.to_heap(self.heap)?;
        self.heap.add_child(self.frame, RETURN_SLOT, id);
        Ok(())
    }

    /// Re-entrant evaluation: runs `source` against the same context state
    /// the outer execution uses, and returns the value of its last
    /// expression statement.
    pub fn eval(&mut self, source: &str) -> Result<Object, Exception> {
        let mut tracer = NoopTracer;
        let lex = Lexer::new(source);
        let result = Evaluator::new(self.heap, self.natives, &mut tracer, lex, self.root).run()?;
        match result {
            Some(id) => {
                let object = Object::from_heap(self.heap, id);
                self.heap.dec_ref(id);
                Ok(object)
            }
            None => Ok(Object::Undefined),
        }
    }
}
