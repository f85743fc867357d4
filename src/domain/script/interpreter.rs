//! Tree-walking interpreter over a parsed script.
//!
//! Name resolution goes user scopes first, then the closed binding table.
//! Anything else is a runtime error.

use super::ast::{BinaryOp, DeclKind, Expr, ExprKind, LogicalOp, Program, Stmt, UnaryOp};
use super::bindings::{self, Effects};
use super::value::Value;
use crate::domain::error::ScriptError;
use crate::domain::ohlcv::Bar;
use std::collections::HashMap;
use std::rc::Rc;

/// Longest string a script may build by concatenation.
pub const MAX_STRING_LEN: usize = 4 * 1024;

struct Binding {
    value: Value,
    constant: bool,
}

pub struct Interpreter<'w> {
    bars: &'w [Bar],
    scopes: Vec<HashMap<String, Binding>>,
    effects: Effects,
}

impl<'w> Interpreter<'w> {
    pub fn new(bars: &'w [Bar]) -> Self {
        Self {
            bars,
            scopes: vec![HashMap::new()],
            effects: Effects::default(),
        }
    }

    pub fn run(&mut self, program: &Program) -> Result<(), ScriptError> {
        for stmt in program {
            self.exec(stmt)?;
        }
        Ok(())
    }

    pub fn into_effects(self) -> Effects {
        self.effects
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<(), ScriptError> {
        match stmt {
            Stmt::Declare {
                kind, name, init, ..
            } => {
                let value = match init {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                self.declare(name, value, *kind == DeclKind::Const)
            }
            Stmt::Assign { name, value, .. } => {
                let value = self.eval(value)?;
                self.assign(name, value)
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval(condition)?.truthy() {
                    self.exec_scoped(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec_scoped(else_branch)
                } else {
                    Ok(())
                }
            }
            Stmt::Block(statements) => {
                self.scopes.push(HashMap::new());
                let result = statements.iter().try_for_each(|s| self.exec(s));
                self.scopes.pop();
                result
            }
            Stmt::Expr(expr) => self.eval(expr).map(|_| ()),
            Stmt::Empty => Ok(()),
        }
    }

    fn exec_scoped(&mut self, stmt: &Stmt) -> Result<(), ScriptError> {
        self.scopes.push(HashMap::new());
        let result = self.exec(stmt);
        self.scopes.pop();
        result
    }

    fn declare(&mut self, name: &str, value: Value, constant: bool) -> Result<(), ScriptError> {
        let Some(scope) = self.scopes.last_mut() else {
            return Err(ScriptError::runtime("no active scope"));
        };
        if scope.contains_key(name) {
            return Err(ScriptError::runtime(format!(
                "'{name}' has already been declared"
            )));
        }
        scope.insert(name.to_string(), Binding { value, constant });
        Ok(())
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<(), ScriptError> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(binding) = scope.get_mut(name) {
                if binding.constant {
                    return Err(ScriptError::runtime(format!(
                        "assignment to constant '{name}'"
                    )));
                }
                binding.value = value;
                return Ok(());
            }
        }
        if bindings::is_global(name) || bindings::is_function(name) {
            return Err(ScriptError::runtime(format!(
                "'{name}' is built in and cannot be assigned"
            )));
        }
        Err(ScriptError::runtime(format!("'{name}' is not defined")))
    }

    fn lookup(&self, name: &str) -> Result<Value, ScriptError> {
        for scope in self.scopes.iter().rev() {
            if let Some(binding) = scope.get(name) {
                return Ok(binding.value.clone());
            }
        }
        if let Some(value) = bindings::global(name, self.bars) {
            return Ok(value);
        }
        if bindings::is_function(name) {
            return Err(ScriptError::runtime(format!(
                "'{name}' is a function and must be called"
            )));
        }
        Err(ScriptError::runtime(format!("'{name}' is not defined")))
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Str(s) => Ok(Value::Str(Rc::from(s.as_str()))),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Ident(name) => self.lookup(name),
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary(*op, value)
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, left, right)
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.eval(left)?;
                match (op, left.truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right),
                }
            }
            ExprKind::Conditional {
                condition,
                then_value,
                else_value,
            } => {
                if self.eval(condition)?.truthy() {
                    self.eval(then_value)
                } else {
                    self.eval(else_value)
                }
            }
            ExprKind::Call { callee, args } => {
                if !bindings::is_function(callee) {
                    return Err(ScriptError::runtime(format!(
                        "'{callee}' is not a function"
                    )));
                }
                let values = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                bindings::call(callee, values, self.bars, &mut self.effects)
            }
            ExprKind::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                index_value(&target, &index)
            }
            ExprKind::Member { target, field } => {
                let target = self.eval(target)?;
                member(&target, field)
            }
            ExprKind::Object(fields) => {
                let mut values = Vec::with_capacity(fields.len());
                for (key, expr) in fields {
                    values.push((key.clone(), self.eval(expr)?));
                }
                Ok(Value::object(values))
            }
        }
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, ScriptError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
        UnaryOp::Neg | UnaryOp::Plus => match value {
            Value::Number(n) => Ok(Value::Number(if op == UnaryOp::Neg { -n } else { n })),
            Value::Null => Ok(Value::Null),
            other => Err(ScriptError::runtime(format!(
                "cannot apply unary operator to {}",
                other.type_name()
            ))),
        },
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, ScriptError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::NotEq => Ok(Value::Bool(left != right)),
        BinaryOp::Add => match (&left, &right) {
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                let joined = format!("{left}{right}");
                if joined.len() > MAX_STRING_LEN {
                    return Err(ScriptError::runtime(format!(
                        "string longer than {MAX_STRING_LEN} bytes"
                    )));
                }
                Ok(Value::Str(Rc::from(joined.as_str())))
            }
            _ => arithmetic(op, left, right),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, left, right)
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                // undefined indicator values compare false
                (Value::Null, _) | (_, Value::Null) => None,
                _ => {
                    return Err(ScriptError::runtime(format!(
                        "cannot compare {} with {}",
                        left.type_name(),
                        right.type_name()
                    )));
                }
            };
            let holds = ordering.is_some_and(|o| match op {
                BinaryOp::Lt => o.is_lt(),
                BinaryOp::Le => o.is_le(),
                BinaryOp::Gt => o.is_gt(),
                _ => o.is_ge(),
            });
            Ok(Value::Bool(holds))
        }
    }
}

fn arithmetic(op: BinaryOp, left: Value, right: Value) -> Result<Value, ScriptError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            _ => a % b,
        })),
        (Value::Null, Value::Number(_) | Value::Null) | (Value::Number(_), Value::Null) => {
            Ok(Value::Null)
        }
        (left, right) => Err(ScriptError::runtime(format!(
            "unsupported operand types: {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn index_value(target: &Value, index: &Value) -> Result<Value, ScriptError> {
    match (target, index) {
        (Value::Series(series), Value::Number(i)) => {
            if i.fract() != 0.0 || !i.is_finite() {
                return Err(ScriptError::runtime(format!(
                    "series index must be a whole number, got {i}"
                )));
            }
            let len = series.len() as i64;
            let i = *i as i64;
            let resolved = if i < 0 { len + i } else { i };
            if resolved < 0 || resolved >= len {
                return Ok(Value::Null);
            }
            Ok(Value::from_option(series[resolved as usize]))
        }
        (Value::Object(_), Value::Str(key)) => member(target, key),
        (Value::Null, _) => Err(ScriptError::runtime("cannot index null")),
        (target, index) => Err(ScriptError::runtime(format!(
            "cannot index {} with {}",
            target.type_name(),
            index.type_name()
        ))),
    }
}

fn member(target: &Value, field: &str) -> Result<Value, ScriptError> {
    match (target, field) {
        (Value::Series(series), "length") => Ok(Value::Number(series.len() as f64)),
        (Value::Str(s), "length") => Ok(Value::Number(s.chars().count() as f64)),
        (Value::Object(fields), _) => Ok(fields.get(field).cloned().unwrap_or(Value::Null)),
        (Value::Null, _) => Err(ScriptError::runtime(format!(
            "cannot read '{field}' of null"
        ))),
        (other, _) => Err(ScriptError::runtime(format!(
            "{} has no property '{field}'",
            other.type_name()
        ))),
    }
}
