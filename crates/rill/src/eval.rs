//! The interleaved parser/evaluator.
//!
//! Single-threaded recursive descent over the token stream, evaluating as it
//! parses. The evaluator runs in one of two modes: [`Mode::Eval`] executes
//! side effects, [`Mode::Skip`] consumes tokens and validates structure
//! without reading or mutating values: untaken `if` arms, short-circuited
//! operands, skipped loop iterations and captured function bodies all pass
//! through Skip. A `return` statement flips the mode to Skip so the rest of
//! the enclosing body unwinds without executing; the call machinery flips it
//! back once the frame is popped.
//!
//! Loops never re-parse from the main cursor: `while` and `for` capture
//! sub-lexers over their condition/step/body spans at first encounter and
//! reset them on each iteration.
//!
//! Every [`VarRef`] produced during evaluation holds reference counts that
//! must be released on success and failure paths alike; `release_on_err!`
//! keeps the error paths honest.

use std::{mem, rc::Rc};

use smallvec::SmallVec;

use crate::{
    context::{FrameView, NativeSlot},
    error::{Exception, RunResult},
    heap::{DropWithHeap, Heap, HeapId},
    lexer::Lexer,
    reference::VarRef,
    resource::{MAX_DATA_RECURSION_DEPTH, ResourceError, ResourceTracker},
    token::TokenKind,
    tracer::EvalTracer,
    value::{FunctionData, NativeId, PROTOTYPE, RETURN_SLOT, THIS, Var},
};

/// Evaluation mode: execute, or consume tokens without value side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Eval,
    Skip,
}

/// Unwraps a result, releasing the held references before propagating an error.
macro_rules! release_on_err {
    ($heap:expr, $result:expr $(, $held:expr)+ $(,)?) => {
        match $result {
            Ok(value) => value,
            Err(error) => {
                $( DropWithHeap::drop_with_heap($held, &mut *$heap); )+
                return Err(error.into());
            }
        }
    };
}

pub(crate) struct Evaluator<'c, T: ResourceTracker, Tr: EvalTracer> {
    heap: &'c mut Heap<T>,
    natives: &'c mut Vec<NativeSlot<T>>,
    tracer: &'c mut Tr,
    lex: Lexer,
    /// Scope stack: the root at the bottom, call frames above. The evaluator
    /// holds one reference count per entry.
    scopes: Vec<HeapId>,
    mode: Mode,
    depth: usize,
    /// Value of the most recent executed expression statement.
    last_result: Option<HeapId>,
    /// Shared placeholder value handed out by Skip-mode factors.
    dummy: Option<HeapId>,
}

impl<'c, T: ResourceTracker, Tr: EvalTracer> Evaluator<'c, T, Tr> {
    pub(crate) fn new(
        heap: &'c mut Heap<T>,
        natives: &'c mut Vec<NativeSlot<T>>,
        tracer: &'c mut Tr,
        lex: Lexer,
        root: HeapId,
    ) -> Self {
        heap.inc_ref(root);
        Self {
            heap,
            natives,
            tracer,
            lex,
            scopes: vec![root],
            mode: Mode::Eval,
            depth: 0,
            last_result: None,
            dummy: None,
        }
    }

    /// Runs the statement stream to EOS. On success returns the value of the
    /// last executed expression statement (the caller owns one count on it);
    /// on failure all evaluator-held state is released before propagating.
    pub(crate) fn run(mut self) -> RunResult<Option<HeapId>> {
        let outcome = self.run_inner();
        // Frames are popped by the call machinery on both paths; anything
        // still stacked here (including the root's count) is released now.
        while let Some(scope) = self.scopes.pop() {
            self.heap.dec_ref(scope);
        }
        if let Some(dummy) = self.dummy.take() {
            self.heap.dec_ref(dummy);
        }
        match outcome {
            Ok(()) => Ok(self.last_result.take()),
            Err(error) => {
                if let Some(result) = self.last_result.take() {
                    self.heap.dec_ref(result);
                }
                Err(error)
            }
        }
    }

    fn run_inner(&mut self) -> RunResult<()> {
        self.lex.reset()?;
        while self.lex.kind != TokenKind::Eos {
            self.statement()?;
        }
        Ok(())
    }

    fn executing(&self) -> bool {
        self.mode == Mode::Eval
    }

    /// Runs `f` in Skip mode and restores the previous mode afterwards.
    /// Nothing inside Skip can switch back to Eval, so the restore is exact.
    fn skipped<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = mem::replace(&mut self.mode, Mode::Skip);
        let result = f(self);
        self.mode = saved;
        result
    }

    fn alloc(&mut self, var: Var) -> Result<HeapId, ResourceError> {
        self.heap.allocate(var)
    }

    fn check_depth(&self) -> RunResult<()> {
        self.heap.tracker().check_recursion_depth(self.depth)?;
        Ok(())
    }

    fn current_scope(&self) -> HeapId {
        *self.scopes.last().expect("scope stack empty")
    }

    /// Placeholder reference handed out while skipping, so the cascade has a
    /// value to thread through without touching the live heap state.
    fn dummy_ref(&mut self) -> RunResult<VarRef> {
        let id = match self.dummy {
            Some(id) => id,
            None => {
                let id = self.alloc(Var::undefined())?;
                self.dummy = Some(id);
                id
            }
        };
        Ok(VarRef::alias(self.heap, id))
    }

    /// Scans the scope stack from the innermost frame outwards.
    fn lookup(&mut self, name: &str) -> Result<Option<VarRef>, ResourceError> {
        for index in (0..self.scopes.len()).rev() {
            let scope = self.scopes[index];
            if let Some(found) = self.heap.find_child(scope, name)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    // ---- statements ----

    fn statement(&mut self) -> RunResult<()> {
        self.depth += 1;
        let result = self.statement_inner();
        self.depth -= 1;
        result
    }

    fn statement_inner(&mut self) -> RunResult<()> {
        self.check_depth()?;
        if self.executing() {
            self.tracer.on_statement(self.lex.token_start);
        }
        match self.lex.kind {
            TokenKind::Identifier
            | TokenKind::IntegerLit
            | TokenKind::FloatLit
            | TokenKind::StringLit
            | TokenKind::Minus
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Null
            | TokenKind::Undefined => {
                let result = self.base()?;
                if self.executing() {
                    self.heap.inc_ref(result.id());
                    if let Some(old) = self.last_result.replace(result.id()) {
                        self.heap.dec_ref(old);
                    }
                }
                result.release(self.heap);
                self.lex.expect(TokenKind::Semicolon)
            }
            TokenKind::LBrace => self.block(),
            TokenKind::Semicolon => self.lex.advance(),
            TokenKind::Var => self.var_statement(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Function => self.function_statement(),
            _ => self.lex.expect(TokenKind::Eos),
        }
    }

    fn block(&mut self) -> RunResult<()> {
        self.depth += 1;
        let result = self.block_inner();
        self.depth -= 1;
        result
    }

    fn block_inner(&mut self) -> RunResult<()> {
        self.check_depth()?;
        self.lex.expect(TokenKind::LBrace)?;
        if self.executing() {
            while self.lex.kind != TokenKind::RBrace && self.lex.kind != TokenKind::Eos {
                self.statement()?;
            }
            self.lex.expect(TokenKind::RBrace)
        } else {
            // Fast brace matching; statements inside are not dispatched.
            let mut brackets = 1usize;
            while self.lex.kind != TokenKind::Eos && brackets > 0 {
                match self.lex.kind {
                    TokenKind::LBrace => brackets += 1,
                    TokenKind::RBrace => brackets -= 1,
                    _ => {}
                }
                self.lex.advance()?;
            }
            if brackets > 0 {
                return Err(Exception::syntax(format!(
                    "Expected {}, got {} at {}",
                    TokenKind::RBrace,
                    TokenKind::Eos,
                    self.lex.position_of(self.lex.token_start)
                )));
            }
            Ok(())
        }
    }

    fn var_statement(&mut self) -> RunResult<()> {
        self.lex.advance()?;
        while self.lex.kind != TokenKind::Semicolon {
            let name = self.lex.value.clone();
            let mut slot: Option<VarRef> = if self.executing() {
                let scope = self.current_scope();
                Some(self.heap.find_or_create_child(scope, &name)?)
            } else {
                None
            };
            release_on_err!(self.heap, self.lex.expect(TokenKind::Identifier), slot);

            while self.lex.kind == TokenKind::Dot {
                release_on_err!(self.heap, self.lex.advance(), slot);
                let child_name = self.lex.value.clone();
                if self.executing() {
                    let parent_ref = slot.take().expect("dotted var path without a base slot");
                    let parent = parent_ref.id();
                    let child = release_on_err!(self.heap, self.heap.find_or_create_child(parent, &child_name), parent_ref);
                    parent_ref.release(self.heap);
                    slot = Some(child);
                }
                release_on_err!(self.heap, self.lex.expect(TokenKind::Identifier), slot);
            }

            if self.lex.kind == TokenKind::Assign {
                release_on_err!(self.heap, self.lex.advance(), slot);
                let value = release_on_err!(self.heap, self.base(), slot);
                if let Some(slot) = slot.as_mut() {
                    slot.reassign(self.heap, value.id());
                }
                value.release(self.heap);
            }
            if let Some(slot) = slot.take() {
                slot.release(self.heap);
            }

            if self.lex.kind != TokenKind::Semicolon {
                self.lex.expect(TokenKind::Comma)?;
            }
        }
        self.lex.expect(TokenKind::Semicolon)
    }

    fn if_statement(&mut self) -> RunResult<()> {
        self.lex.advance()?;
        self.lex.expect(TokenKind::LParen)?;
        let cond = self.base()?;
        release_on_err!(self.heap, self.lex.expect(TokenKind::RParen), cond);
        let condition_met = self.executing() && cond.var(self.heap).as_bool();
        cond.release(self.heap);

        if condition_met {
            self.statement()?;
        } else {
            self.skipped(Self::statement)?;
        }
        if self.lex.kind == TokenKind::Else {
            self.lex.advance()?;
            if condition_met {
                self.skipped(Self::statement)?;
            } else {
                self.statement()?;
            }
        }
        Ok(())
    }

    fn while_statement(&mut self) -> RunResult<()> {
        self.lex.advance()?;
        self.lex.expect(TokenKind::LParen)?;
        let cond_start = self.lex.token_start;
        let cond = self.base()?;
        let mut loop_condition = self.executing() && cond.var(self.heap).as_bool();
        cond.release(self.heap);

        let mut cond_lex = self.lex.sub_lexer(cond_start);
        self.lex.expect(TokenKind::RParen)?;
        let body_start = self.lex.token_start;

        if loop_condition {
            self.statement()?;
        } else {
            self.skipped(Self::statement)?;
        }
        let mut body_lex = self.lex.sub_lexer(body_start);

        while loop_condition {
            cond_lex.reset()?;
            mem::swap(&mut self.lex, &mut cond_lex);
            let cond = self.base();
            mem::swap(&mut self.lex, &mut cond_lex);
            let cond = cond?;
            loop_condition = self.executing() && cond.var(self.heap).as_bool();
            cond.release(self.heap);

            if loop_condition {
                body_lex.reset()?;
                mem::swap(&mut self.lex, &mut body_lex);
                let body = self.statement();
                mem::swap(&mut self.lex, &mut body_lex);
                body?;
            }
        }
        Ok(())
    }

    fn for_statement(&mut self) -> RunResult<()> {
        self.lex.advance()?;
        self.lex.expect(TokenKind::LParen)?;
        self.statement()?; // init; consumes its ';'

        let cond_start = self.lex.token_start;
        let cond = self.base()?;
        let mut loop_condition = self.executing() && cond.var(self.heap).as_bool();
        cond.release(self.heap);
        let mut cond_lex = self.lex.sub_lexer(cond_start);
        self.lex.expect(TokenKind::Semicolon)?;

        let step_start = self.lex.token_start;
        let step = self.skipped(Self::base)?;
        step.release(self.heap);
        let mut step_lex = self.lex.sub_lexer(step_start);
        self.lex.expect(TokenKind::RParen)?;

        let body_start = self.lex.token_start;
        if loop_condition {
            self.statement()?;
        } else {
            self.skipped(Self::statement)?;
        }
        let mut body_lex = self.lex.sub_lexer(body_start);

        if loop_condition {
            // The step expression runs once ahead of the first re-check.
            step_lex.reset()?;
            mem::swap(&mut self.lex, &mut step_lex);
            let step = self.base();
            mem::swap(&mut self.lex, &mut step_lex);
            step?.release(self.heap);
        }

        while self.executing() && loop_condition {
            cond_lex.reset()?;
            mem::swap(&mut self.lex, &mut cond_lex);
            let cond = self.base();
            mem::swap(&mut self.lex, &mut cond_lex);
            let cond = cond?;
            loop_condition = cond.var(self.heap).as_bool();
            cond.release(self.heap);

            if self.executing() && loop_condition {
                body_lex.reset()?;
                mem::swap(&mut self.lex, &mut body_lex);
                let body = self.statement();
                mem::swap(&mut self.lex, &mut body_lex);
                body?;
            }
            if self.executing() && loop_condition {
                step_lex.reset()?;
                mem::swap(&mut self.lex, &mut step_lex);
                let step = self.base();
                mem::swap(&mut self.lex, &mut step_lex);
                step?.release(self.heap);
            }
        }
        Ok(())
    }

    fn return_statement(&mut self) -> RunResult<()> {
        self.lex.advance()?;
        let result: Option<VarRef> = if self.lex.kind == TokenKind::Semicolon {
            None
        } else {
            Some(self.base()?)
        };

        if self.executing() {
            let frame = self.current_scope();
            let slot = release_on_err!(self.heap, self.heap.find_child(frame, RETURN_SLOT), result);
            let Some(mut slot) = slot else {
                result.drop_with_heap(self.heap);
                return Err(Exception::eval("Return statement is not inside a function scope"));
            };
            if let Some(value) = &result {
                slot.reassign(self.heap, value.id());
            }
            slot.release(self.heap);
            self.mode = Mode::Skip;
        }

        result.drop_with_heap(self.heap);
        self.lex.expect(TokenKind::Semicolon)
    }

    fn function_statement(&mut self) -> RunResult<()> {
        let func = self.function_definition()?;
        if !self.executing() {
            func.release(self.heap);
            return Ok(());
        }
        let Some(name) = func.name().map(str::to_owned) else {
            func.release(self.heap);
            return Err(Exception::eval(
                "Functions defined at statement level are expected to have a name",
            ));
        };
        let scope = self.current_scope();
        self.heap.inc_ref(func.id());
        self.heap.add_child(scope, &name, func.id());
        func.release(self.heap);
        Ok(())
    }

    /// Parses `function [name] ( formals ) { body }`, capturing the body
    /// text for later re-lexing. The formals become insertion-ordered
    /// Undefined children of the function value.
    fn function_definition(&mut self) -> RunResult<VarRef> {
        self.lex.expect(TokenKind::Function)?;
        let name: Option<String> = if self.lex.kind == TokenKind::Identifier {
            let name = self.lex.value.clone();
            self.lex.advance()?;
            Some(name)
        } else {
            None
        };

        let mut func = VarRef::adopt(self.alloc(Var::function(FunctionData::default()))?);
        if let Some(name) = &name {
            func = func.with_name(name.clone());
        }

        release_on_err!(self.heap, self.lex.expect(TokenKind::LParen), func);
        while self.lex.kind != TokenKind::RParen {
            let formal = self.lex.value.clone();
            release_on_err!(self.heap, self.lex.expect(TokenKind::Identifier), func);
            let param = release_on_err!(self.heap, self.alloc(Var::undefined()), func);
            self.heap.add_child(func.id(), &formal, param);
            if self.lex.kind != TokenKind::RParen {
                release_on_err!(self.heap, self.lex.expect(TokenKind::Comma), func);
            }
        }
        release_on_err!(self.heap, self.lex.expect(TokenKind::RParen), func);

        let body_start = self.lex.token_start;
        let parsed = self.skipped(Self::block);
        release_on_err!(self.heap, parsed, func);
        let body = self.lex.sub_string(body_start);
        self.heap.get_mut(func.id()).set_function_body(Rc::from(body));
        Ok(func)
    }

    // ---- expression cascade ----

    /// Assignment level: `=`, `+=`, `-=` over a ternary. A plain-identifier
    /// LHS that resolved nowhere is promoted to a root-scope global; any
    /// other unowned LHS is an error.
    fn base(&mut self) -> RunResult<VarRef> {
        self.depth += 1;
        let result = self.base_inner();
        self.depth -= 1;
        result
    }

    fn base_inner(&mut self) -> RunResult<VarRef> {
        self.check_depth()?;
        let mut a = self.ternary()?;
        if matches!(
            self.lex.kind,
            TokenKind::Assign | TokenKind::PlusAssign | TokenKind::MinusAssign
        ) {
            if self.executing() && !a.is_owned() {
                let root = self.scopes[0];
                match a.promote(self.heap, root) {
                    Ok(()) => {}
                    Err(error) => {
                        a.release(self.heap);
                        return Err(error);
                    }
                }
            }
            let op = self.lex.kind;
            release_on_err!(self.heap, self.lex.advance(), a);
            let b = release_on_err!(self.heap, self.base(), a);
            if self.executing() {
                match op {
                    TokenKind::Assign => a.reassign(self.heap, b.id()),
                    _ => {
                        let binop = if op == TokenKind::PlusAssign {
                            TokenKind::Plus
                        } else {
                            TokenKind::Minus
                        };
                        let result = release_on_err!(self.heap, self.heap.math_op(a.id(), b.id(), binop), a, b);
                        a.reassign(self.heap, result);
                        self.heap.dec_ref(result);
                    }
                }
            }
            b.release(self.heap);
        }
        Ok(a)
    }

    /// `cond ? a : b`. Only the chosen arm is executed; both parse.
    fn ternary(&mut self) -> RunResult<VarRef> {
        let mut a = self.logic()?;
        if self.lex.kind == TokenKind::Question {
            release_on_err!(self.heap, self.lex.advance(), a);
            if self.executing() {
                let take_first = a.var(self.heap).as_bool();
                a.release(self.heap);
                if take_first {
                    a = self.base()?;
                    release_on_err!(self.heap, self.lex.expect(TokenKind::Colon), a);
                    let untaken = self.skipped(Self::base);
                    release_on_err!(self.heap, untaken, a).release(self.heap);
                } else {
                    let untaken = self.skipped(Self::base)?;
                    untaken.release(self.heap);
                    self.lex.expect(TokenKind::Colon)?;
                    a = self.base()?;
                }
            } else {
                let first = release_on_err!(self.heap, self.base(), a);
                first.release(self.heap);
                release_on_err!(self.heap, self.lex.expect(TokenKind::Colon), a);
                let second = release_on_err!(self.heap, self.base(), a);
                second.release(self.heap);
            }
        }
        Ok(a)
    }

    /// `& | ^ && ||`. The boolean forms short-circuit by evaluating the RHS
    /// in Skip mode; when both sides run, operands are coerced to booleans
    /// and the matching bitwise operator applies. On a short-circuit the LHS
    /// value is the result, uncoerced.
    fn logic(&mut self) -> RunResult<VarRef> {
        let mut a = self.condition()?;
        while matches!(
            self.lex.kind,
            TokenKind::BitAnd | TokenKind::BitOr | TokenKind::BitXor | TokenKind::AndAnd | TokenKind::OrOr
        ) {
            let op = self.lex.kind;
            release_on_err!(self.heap, self.lex.advance(), a);
            let (bool_coerce, op, short_circuit) = match op {
                TokenKind::AndAnd => (true, TokenKind::BitAnd, self.executing() && !a.var(self.heap).as_bool()),
                TokenKind::OrOr => (true, TokenKind::BitOr, self.executing() && a.var(self.heap).as_bool()),
                other => (false, other, false),
            };
            let b = if short_circuit {
                let skipped = self.skipped(Self::condition);
                release_on_err!(self.heap, skipped, a)
            } else {
                release_on_err!(self.heap, self.condition(), a)
            };
            if self.executing() && !short_circuit {
                let (lhs, rhs) = if bool_coerce {
                    let a_bool = a.var(self.heap).as_bool();
                    let b_bool = b.var(self.heap).as_bool();
                    let lhs = release_on_err!(self.heap, self.alloc(Var::bool(a_bool)), a, b);
                    let rhs = release_on_err!(self.heap, self.alloc(Var::bool(b_bool)), lhs, a, b);
                    a.release(self.heap);
                    b.release(self.heap);
                    (VarRef::adopt(lhs), VarRef::adopt(rhs))
                } else {
                    (a, b)
                };
                a = self.combine(lhs, rhs, op)?;
            } else {
                b.release(self.heap);
            }
        }
        Ok(a)
    }

    /// Equality and relational operators.
    fn condition(&mut self) -> RunResult<VarRef> {
        let mut a = self.shift()?;
        while matches!(
            self.lex.kind,
            TokenKind::Equal
                | TokenKind::NotEqual
                | TokenKind::StrictEqual
                | TokenKind::StrictNotEqual
                | TokenKind::Lt
                | TokenKind::Lte
                | TokenKind::Gt
                | TokenKind::Gte
        ) {
            let op = self.lex.kind;
            release_on_err!(self.heap, self.lex.advance(), a);
            let b = release_on_err!(self.heap, self.shift(), a);
            a = self.combine(a, b, op)?;
        }
        Ok(a)
    }

    /// `<< >> >>>`: coerce the left value to an integer and rebind it in
    /// place with the shifted result.
    fn shift(&mut self) -> RunResult<VarRef> {
        let mut a = self.expression()?;
        while matches!(
            self.lex.kind,
            TokenKind::ShiftLeft | TokenKind::ShiftRight | TokenKind::ShiftRightUnsigned
        ) {
            let op = self.lex.kind;
            release_on_err!(self.heap, self.lex.advance(), a);
            let b = release_on_err!(self.heap, self.base(), a);
            if self.executing() {
                let amount = (b.var(self.heap).as_int() & 63) as u32;
                let value = a.var(self.heap).as_int();
                let shifted = match op {
                    TokenKind::ShiftLeft => value.wrapping_shl(amount),
                    TokenKind::ShiftRight => value.wrapping_shr(amount),
                    _ => ((value as u64) >> amount) as i64,
                };
                self.heap.get_mut(a.id()).set_int(shifted);
            }
            b.release(self.heap);
        }
        Ok(a)
    }

    /// Unary minus, binary `+ -`, and postfix `++`/`--` (which assign in
    /// place but yield the old value).
    fn expression(&mut self) -> RunResult<VarRef> {
        let negate = if self.lex.kind == TokenKind::Minus {
            self.lex.advance()?;
            true
        } else {
            false
        };
        let mut a = self.term()?;
        if negate && self.executing() {
            let zero = VarRef::adopt(release_on_err!(self.heap, self.alloc(Var::int(0)), a));
            a = self.combine(zero, a, TokenKind::Minus)?;
        }

        while matches!(
            self.lex.kind,
            TokenKind::Plus | TokenKind::Minus | TokenKind::Increment | TokenKind::Decrement
        ) {
            let op = self.lex.kind;
            release_on_err!(self.heap, self.lex.advance(), a);
            if op == TokenKind::Increment || op == TokenKind::Decrement {
                if self.executing() {
                    let binop = if op == TokenKind::Increment {
                        TokenKind::Plus
                    } else {
                        TokenKind::Minus
                    };
                    let one = release_on_err!(self.heap, self.alloc(Var::int(1)), a);
                    let stepped = release_on_err!(self.heap, self.heap.math_op(a.id(), one, binop), one, a);
                    self.heap.dec_ref(one);
                    let old = VarRef::alias(self.heap, a.id());
                    a.reassign(self.heap, stepped);
                    self.heap.dec_ref(stepped);
                    a.release(self.heap);
                    a = old;
                }
            } else {
                let b = release_on_err!(self.heap, self.term(), a);
                a = self.combine(a, b, op)?;
            }
        }
        Ok(a)
    }

    /// `* / %`.
    fn term(&mut self) -> RunResult<VarRef> {
        let mut a = self.unary()?;
        while matches!(self.lex.kind, TokenKind::Star | TokenKind::Slash | TokenKind::Percent) {
            let op = self.lex.kind;
            release_on_err!(self.heap, self.lex.advance(), a);
            let b = release_on_err!(self.heap, self.unary(), a);
            a = self.combine(a, b, op)?;
        }
        Ok(a)
    }

    /// Prefix `!`, evaluated as `operand == 0`.
    fn unary(&mut self) -> RunResult<VarRef> {
        if self.lex.kind != TokenKind::Not {
            return self.factor();
        }
        self.lex.advance()?;
        let a = self.factor()?;
        if !self.executing() {
            return Ok(a);
        }
        let zero = release_on_err!(self.heap, self.alloc(Var::int(0)), a);
        let result = release_on_err!(self.heap, self.heap.math_op(a.id(), zero, TokenKind::Equal), zero, a);
        self.heap.dec_ref(zero);
        a.release(self.heap);
        Ok(VarRef::adopt(result))
    }

    /// Applies a binary operator, releasing both operands. In Skip mode the
    /// RHS is released and the LHS passes through untouched.
    fn combine(&mut self, a: VarRef, b: VarRef, op: TokenKind) -> RunResult<VarRef> {
        if !self.executing() {
            b.release(self.heap);
            return Ok(a);
        }
        let result = release_on_err!(self.heap, self.heap.math_op(a.id(), b.id(), op), a, b);
        a.release(self.heap);
        b.release(self.heap);
        Ok(VarRef::adopt(result))
    }

    // ---- factors ----

    fn factor(&mut self) -> RunResult<VarRef> {
        match self.lex.kind {
            TokenKind::LParen => {
                self.lex.advance()?;
                let a = self.base()?;
                release_on_err!(self.heap, self.lex.expect(TokenKind::RParen), a);
                Ok(a)
            }
            TokenKind::True => self.literal_factor(Var::int(1)),
            TokenKind::False => self.literal_factor(Var::int(0)),
            TokenKind::Null => self.literal_factor(Var::null()),
            TokenKind::Undefined => self.literal_factor(Var::undefined()),
            TokenKind::IntegerLit => {
                let value = parse_int_literal(&self.lex.value);
                self.literal_factor(Var::int(value))
            }
            TokenKind::FloatLit => {
                let value = parse_float_literal(&self.lex.value);
                self.literal_factor(Var::double(value))
            }
            TokenKind::StringLit => {
                let value = self.lex.value.clone();
                self.literal_factor(Var::str(value))
            }
            TokenKind::LBrace => {
                // Object literals are accepted only in their empty form.
                self.lex.advance()?;
                self.lex.expect(TokenKind::RBrace)?;
                if self.executing() {
                    Ok(VarRef::adopt(self.alloc(Var::object())?))
                } else {
                    self.dummy_ref()
                }
            }
            TokenKind::LBracket => {
                // Likewise array literals.
                self.lex.advance()?;
                self.lex.expect(TokenKind::RBracket)?;
                if self.executing() {
                    Ok(VarRef::adopt(self.alloc(Var::array())?))
                } else {
                    self.dummy_ref()
                }
            }
            TokenKind::Function => {
                let func = self.function_definition()?;
                if func.name().is_some() {
                    let message = "Functions not defined at statement level are not expected to have a name";
                    func.release(self.heap);
                    return Err(Exception::eval(message));
                }
                Ok(func)
            }
            TokenKind::Identifier => self.identifier_factor(),
            other => Err(Exception::syntax(format!(
                "Unexpected token {} at {}",
                other,
                self.lex.position_of(self.lex.token_start)
            ))),
        }
    }

    fn literal_factor(&mut self, var: Var) -> RunResult<VarRef> {
        self.lex.advance()?;
        if self.executing() {
            Ok(VarRef::adopt(self.alloc(var)?))
        } else {
            self.dummy_ref()
        }
    }

    /// An identifier followed by any chain of `.name`, `[expr]` and
    /// `(args)` suffixes. Tracks the receiver across member accesses so
    /// calls can bind `this`.
    fn identifier_factor(&mut self) -> RunResult<VarRef> {
        let name = self.lex.value.clone();
        let mut a = if self.executing() {
            match self.lookup(&name)? {
                Some(found) => found,
                None => {
                    // Unknown identifier: a named, unowned handle. Assigning
                    // to it promotes it to a root-scope global.
                    let id = self.alloc(Var::undefined())?;
                    VarRef::adopt(id).with_name(name.clone())
                }
            }
        } else {
            self.dummy_ref()?
        };
        release_on_err!(self.heap, self.lex.expect(TokenKind::Identifier), a);

        // Receiver of the most recent member access; one count held.
        let mut receiver: Option<HeapId> = None;
        loop {
            match self.lex.kind {
                TokenKind::LParen => {
                    a = match self.function_call(a, receiver) {
                        Ok(result) => result,
                        Err(error) => {
                            receiver.drop_with_heap(self.heap);
                            return Err(error);
                        }
                    };
                }
                TokenKind::Dot => {
                    release_on_err!(self.heap, self.lex.advance(), a, receiver);
                    let member = self.lex.value.clone();
                    release_on_err!(self.heap, self.lex.expect(TokenKind::Identifier), a, receiver);
                    if self.executing() {
                        let child = release_on_err!(self.heap, self.member_lookup(a.id(), &member), a, receiver);
                        self.heap.inc_ref(a.id());
                        if let Some(old) = receiver.replace(a.id()) {
                            self.heap.dec_ref(old);
                        }
                        a.release(self.heap);
                        a = child;
                    }
                }
                TokenKind::LBracket => {
                    release_on_err!(self.heap, self.lex.advance(), a, receiver);
                    let index = release_on_err!(self.heap, self.base(), a, receiver);
                    release_on_err!(self.heap, self.lex.expect(TokenKind::RBracket), a, receiver, index);
                    if self.executing() {
                        let key = self.heap.var_to_string(index.id());
                        index.release(self.heap);
                        let child =
                            release_on_err!(self.heap, self.heap.find_or_create_child(a.id(), &key), a, receiver);
                        self.heap.inc_ref(a.id());
                        if let Some(old) = receiver.replace(a.id()) {
                            self.heap.dec_ref(old);
                        }
                        a.release(self.heap);
                        a = child;
                    } else {
                        index.release(self.heap);
                    }
                }
                _ => break,
            }
        }
        receiver.drop_with_heap(self.heap);
        Ok(a)
    }

    /// Member lookup with prototype-chain fallback; a full miss creates an
    /// Undefined child on the receiver itself.
    fn member_lookup(&mut self, parent: HeapId, name: &str) -> RunResult<VarRef> {
        if let Some(found) = self.heap.find_child(parent, name)? {
            return Ok(found);
        }
        let mut link = parent;
        let mut depth = 0usize;
        while let Some(&proto) = self.heap.get(link).children().get(PROTOTYPE) {
            if depth >= MAX_DATA_RECURSION_DEPTH {
                return Err(Exception::reference("Prototype chain exceeded the maximum depth"));
            }
            depth += 1;
            if let Some(&child) = self.heap.get(proto).children().get(name) {
                return Ok(VarRef::slot(self.heap, name, proto, child));
            }
            link = proto;
        }
        Ok(self.heap.find_or_create_child(parent, name)?)
    }

    // ---- calls ----

    /// Calls the value behind `func`. `receiver` is the object a member
    /// access resolved through, bound as `this`; its count stays with the
    /// caller.
    fn function_call(&mut self, func: VarRef, receiver: Option<HeapId>) -> RunResult<VarRef> {
        if !self.executing() {
            // Parse the argument list structurally.
            release_on_err!(self.heap, self.lex.expect(TokenKind::LParen), func);
            while self.lex.kind != TokenKind::RParen {
                let arg = release_on_err!(self.heap, self.base(), func);
                arg.release(self.heap);
                if self.lex.kind != TokenKind::RParen {
                    release_on_err!(self.heap, self.lex.expect(TokenKind::Comma), func);
                }
            }
            release_on_err!(self.heap, self.lex.expect(TokenKind::RParen), func);
            return Ok(func);
        }

        let func_name = func.name().unwrap_or("").to_owned();
        if !func.var(self.heap).is_function() {
            let message = format!("Expecting '{func_name}' to be a function");
            func.release(self.heap);
            return Err(Exception::eval(message));
        }
        release_on_err!(self.heap, self.lex.expect(TokenKind::LParen), func);

        let frame = release_on_err!(self.heap, self.alloc(Var::object()), func);
        if let Some(recv) = receiver {
            self.heap.inc_ref(recv);
            self.heap.add_child(frame, THIS, recv);
        }

        // Formal parameters are the function value's children, in order.
        let formals: SmallVec<[String; 8]> = func.var(self.heap).children().keys().cloned().collect();
        for formal in &formals {
            let arg = release_on_err!(self.heap, self.base(), func, frame);
            if arg.var(self.heap).is_basic() {
                // Scalars are copied into the frame; compound values are
                // passed by reference.
                let copy = release_on_err!(self.heap, self.heap.deep_copy(arg.id()), arg, func, frame);
                self.heap.add_child(frame, formal, copy);
            } else {
                self.heap.inc_ref(arg.id());
                self.heap.add_child(frame, formal, arg.id());
            }
            arg.release(self.heap);
            if self.lex.kind != TokenKind::RParen {
                release_on_err!(self.heap, self.lex.expect(TokenKind::Comma), func, frame);
            }
        }
        release_on_err!(self.heap, self.lex.expect(TokenKind::RParen), func, frame);

        let ret_slot = release_on_err!(self.heap, self.alloc(Var::undefined()), func, frame);
        self.heap.add_child(frame, RETURN_SLOT, ret_slot);

        // The frame's count transfers to the scope stack.
        self.scopes.push(frame);
        self.tracer.on_call(&func_name, self.scopes.len());
        self.depth += 1;

        let native = func.var(self.heap).function_data().and_then(|f| f.native);
        let body_outcome: RunResult<()> = if let Some(native_id) = native {
            self.tracer.on_native(&func_name);
            self.invoke_native(native_id, frame, &func_name)
        } else {
            let body = func
                .var(self.heap)
                .function_data()
                .map_or_else(|| Rc::from(""), |f| Rc::clone(&f.body));
            let mut body_lex = Lexer::from_shared(body);
            mem::swap(&mut self.lex, &mut body_lex);
            let outcome = self.run_function_body();
            mem::swap(&mut self.lex, &mut body_lex);
            outcome
        };
        self.heap.get_mut(func.id()).bump_exec_count();

        self.depth -= 1;
        let popped = self.scopes.pop().expect("call frame missing from the scope stack");
        self.tracer.on_return(self.scopes.len());

        if let Err(error) = body_outcome {
            // The frame must not outlive the failure.
            self.heap.dec_ref(popped);
            func.release(self.heap);
            return Err(error);
        }

        // A return statement inside the body flipped the mode to Skip; the
        // call boundary is where execution resumes.
        self.mode = Mode::Eval;

        let result = match self.heap.take_child(frame, RETURN_SLOT) {
            // The slot's count transfers to the result reference.
            Some(value) => VarRef::adopt(value),
            None => VarRef::adopt(release_on_err!(self.heap, self.alloc(Var::undefined()), func, frame)),
        };
        self.heap.dec_ref(frame);
        func.release(self.heap);
        Ok(result)
    }

    fn run_function_body(&mut self) -> RunResult<()> {
        self.lex.reset()?;
        self.block()
    }

    fn invoke_native(&mut self, native_id: NativeId, frame: HeapId, name: &str) -> RunResult<()> {
        // The callback is taken out of its slot for the duration of the call
        // so the registry stays borrowable for nested evaluation.
        let Some(mut callback) = self.natives.get_mut(native_id.0).and_then(|slot| slot.callback.take()) else {
            return Err(Exception::eval(format!("Native function '{name}' is already running")));
        };
        let root = self.scopes[0];
        let mut view = FrameView::new(self.heap, self.natives, root, frame);
        let result = callback(&mut view);
        self.natives[native_id.0].callback = Some(callback);
        result
    }
}

/// Integer literal text to value, strtol-style: `0x` prefixes parse as hex,
/// overflow saturates.
fn parse_int_literal(text: &str) -> i64 {
    if let Some(hex) = text.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).map_or(0, |value| value as i64)
    } else {
        text.parse().unwrap_or(i64::MAX)
    }
}

/// Float literal text to value, strtod-style: a trailing exponent marker or
/// dot parses as if absent.
fn parse_float_literal(text: &str) -> f64 {
    text.parse()
        .unwrap_or_else(|_| text.trim_end_matches(['e', 'E', '.']).parse().unwrap_or(0.0))
}
