//! Interpreter thread state.
//!
//! A `Thread` owns a value stack and the sample-rate record, and borrows
//! the engine for scope lookups. Threads are created freely: the REPL has
//! one, each audio player has its own, and a thread is never shared.

use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{wrong_type, Error, Result};
use crate::list::List;
use crate::value::{V, Z};

/// Hard bound on the value stack.
const STACK_LIMIT: usize = 1 << 20;

/// Sample-rate record carried by every thread.
#[derive(Debug, Clone, Copy)]
pub struct Rate {
    pub sample_rate: Z,
    pub inv_sample_rate: Z,
    pub nyquist: Z,
    pub radians_per_sample: Z,
    pub block_size: usize,
}

impl Rate {
    pub fn new(sample_rate: Z) -> Rate {
        Rate {
            sample_rate,
            inv_sample_rate: 1.0 / sample_rate,
            nyquist: 0.5 * sample_rate,
            radians_per_sample: std::f64::consts::TAU / sample_rate,
            block_size: crate::list::BLOCK_SIZE,
        }
    }
}

pub struct Thread {
    engine: Arc<Engine>,
    rate: Rate,
    pub(crate) stack: Vec<V>,
}

impl Thread {
    pub fn new(engine: Arc<Engine>) -> Thread {
        let rate = engine.rate();
        Thread {
            engine,
            rate,
            stack: Vec::with_capacity(256),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    // ── stack discipline ───────────────────────────────────────────

    pub fn push(&mut self, v: V) -> Result<()> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(Error::StackOverflow);
        }
        self.stack.push(v);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<V> {
        self.stack.pop().ok_or(Error::StackUnderflow)
    }

    /// Pop `n` values, preserving their stack order (deepest first).
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<V>> {
        if self.stack.len() < n {
            return Err(Error::StackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    pub fn top(&self) -> Result<&V> {
        self.stack.last().ok_or(Error::StackUnderflow)
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    pub(crate) fn truncate(&mut self, depth: usize) {
        self.stack.truncate(depth);
    }

    /// Remove the frame region `[base, top)`, keeping results above it.
    pub(crate) fn drain_frame(&mut self, base: usize, top: usize) {
        self.stack.drain(base..top);
    }

    pub fn peek(&self, n_from_top: usize) -> Result<&V> {
        let depth = self.stack.len();
        if n_from_top >= depth {
            return Err(Error::StackUnderflow);
        }
        Ok(&self.stack[depth - 1 - n_from_top])
    }

    // ── typed pops ─────────────────────────────────────────────────

    pub fn pop_float(&mut self) -> Result<Z> {
        let v = self.pop()?;
        match v {
            V::Real(z) => Ok(z),
            V::Ref(_) | V::ZRef(_) => Ok(v.as_float()),
            other => Err(wrong_type("argument", "Real", other.type_name())),
        }
    }

    pub fn pop_index(&mut self) -> Result<i64> {
        Ok(self.pop_float()? as i64)
    }

    pub fn pop_list(&mut self) -> Result<Arc<List>> {
        match self.pop()? {
            V::List(l) => Ok(l),
            other => Err(wrong_type("argument", "List", other.type_name())),
        }
    }

    // ── compile and run ────────────────────────────────────────────

    /// Compile source text into a zero-argument closure over the engine's
    /// workspace.
    pub fn compile(&mut self, src: &str) -> Result<Arc<crate::code::Fun>> {
        let nodes = parser::parse(src)
            .map_err(|e| Error::Syntax(e.to_string()))?;
        crate::compiler::compile_program(&nodes)
    }

    /// Compile and apply, leaving results on this thread's stack.
    pub fn run(&mut self, src: &str) -> Result<()> {
        let fun = self.compile(src)?;
        crate::interpreter::apply(self, &V::Fun(fun))
    }

    /// Compile, apply, and pop the single result.
    pub fn eval(&mut self, src: &str) -> Result<V> {
        self.run(src)?;
        self.pop()
    }
}
