//! Strategy script sandbox.
//!
//! Scripts are a small JavaScript-like language evaluated by an interpreter
//! over a closed binding table (see [`bindings`]). There are no loops, no
//! user-defined functions, and no way to name anything outside the table.
//!
//! ```text
//! let fast = ema(9);
//! let slow = ema(21);
//! if (crossover(fast, slow) && rsi()[-1] < 70) buy();
//! if (crossunder(fast, slow)) sell();
//! setConfig({ stopLoss: 1.5, takeProfit: 3, trailingStop: true });
//! ```

pub mod ast;
pub mod bindings;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod validation;
pub mod value;

use crate::domain::error::ScriptError;
use crate::domain::ohlcv::Bar;
use crate::domain::position::Signal;
use crate::domain::risk::RiskConfig;
use ast::Program;
use interpreter::Interpreter;
use serde::Serialize;

/// Result of one execution. Never carries a signal when `error` is set.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ScriptOutput {
    pub signal: Option<Signal>,
    /// Present when the script called `setConfig`.
    pub config: Option<RiskConfig>,
    pub logs: Vec<String>,
    pub error: Option<String>,
}

/// Tokenize, statically validate, and parse a script.
pub fn compile(source: &str) -> Result<Program, ScriptError> {
    validation::check_source_len(source)?;
    let tokens = lexer::tokenize(source)?;
    validation::check_tokens(&tokens)?;
    Ok(parser::parse(&tokens)?)
}

/// Check a script without running it.
pub fn validate(source: &str) -> Result<(), ScriptError> {
    compile(source).map(|_| ())
}

/// Run a compiled program against a bar window.
pub fn run(program: &Program, bars: &[Bar]) -> ScriptOutput {
    let mut interpreter = Interpreter::new(bars);
    let result = interpreter.run(program);
    let effects = interpreter.into_effects();
    match result {
        Ok(()) => ScriptOutput {
            signal: effects.signal,
            config: effects.config,
            logs: effects.logs,
            error: None,
        },
        Err(e) => ScriptOutput {
            signal: None,
            config: None,
            logs: effects.logs,
            error: Some(e.to_string()),
        },
    }
}

/// Compile and run `source` against `bars`. Failures of any kind come back
/// in [`ScriptOutput::error`].
pub fn execute(source: &str, bars: &[Bar]) -> ScriptOutput {
    match compile(source) {
        Ok(program) => run(&program, bars),
        Err(e) => ScriptOutput {
            error: Some(e.to_string()),
            ..ScriptOutput::default()
        },
    }
}
