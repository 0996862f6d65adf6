//! The interactive read-eval-print loop.
//!
//! Each line compiles to a zero-argument closure and runs on the REPL's
//! thread. The value stack persists across lines and is echoed after
//! each one. Errors print their kind and the offending detail, then the
//! loop recovers.

use std::sync::Arc;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::engine::Engine;
use crate::error::Result;
use crate::thread::Thread;

pub struct Repl {
    engine: Arc<Engine>,
    th: Thread,
}

impl Repl {
    pub fn new(engine: Arc<Engine>) -> Repl {
        let th = engine.new_thread();
        Repl { engine, th }
    }

    /// Run one line against the persistent stack.
    pub fn eval_line(&mut self, line: &str) -> Result<()> {
        self.th.run(line)
    }

    /// Render the current stack, top last, the way the prompt shows it.
    pub fn stack_display(&mut self) -> String {
        let mut out = String::new();
        let depth = self.th.stack_depth();
        let values: Vec<_> = (0..depth)
            .rev()
            .filter_map(|i| self.th.peek(i).ok().cloned())
            .collect();
        for v in values {
            if !out.is_empty() {
                out.push(' ');
            }
            v.print(&mut self.th, &mut out, 0);
        }
        out
    }

    /// The interactive loop; returns when the user exits.
    pub fn run(&mut self) -> std::result::Result<(), ReadlineError> {
        let mut rl = DefaultEditor::new()?;
        if !self.engine.config().quiet {
            println!("strom. type an expression, or quit to leave");
        }
        loop {
            match rl.readline("> ") {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if line == "quit" {
                        break;
                    }
                    let _ = rl.add_history_entry(line);
                    match self.eval_line(line) {
                        Ok(()) => {
                            let shown = self.stack_display();
                            if !shown.is_empty() {
                                println!("{shown}");
                            }
                        }
                        Err(e) => println!("error: {e}"),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    self.th.clear_stack();
                    println!("interrupted; stack cleared");
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e),
            }
        }
        self.engine.audio().stop_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;

    #[test]
    fn stack_persists_across_lines() {
        let mut repl = Repl::new(test_engine());
        repl.eval_line("10").unwrap();
        repl.eval_line("20").unwrap();
        repl.eval_line("+").unwrap();
        assert_eq!(repl.stack_display(), "30");
    }

    #[test]
    fn errors_leave_the_stack_usable() {
        let mut repl = Repl::new(test_engine());
        repl.eval_line("1 2").unwrap();
        assert!(repl.eval_line("no_such_word").is_err());
        repl.eval_line("+").unwrap();
        assert_eq!(repl.stack_display(), "3");
    }

    #[test]
    fn lists_render_bracketed() {
        let mut repl = Repl::new(test_engine());
        repl.eval_line("[1 2 3]").unwrap();
        assert_eq!(repl.stack_display(), "[1 2 3]");
    }
}
