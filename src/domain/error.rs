//! Domain error types.

/// A parse error with position information for script parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with the offending source line and a caret under the
    /// error position.
    pub fn display_with_context(&self, input: &str) -> String {
        let position = self.position.min(input.len());
        let line_start = input[..position].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = input[position..]
            .find('\n')
            .map(|i| position + i)
            .unwrap_or(input.len());
        let line_no = input[..line_start].matches('\n').count() + 1;
        let column = input[line_start..position].chars().count();
        let caret = " ".repeat(column) + "^";
        format!(
            "line {line_no}: {line}\n{pad}{caret}\n{err}",
            line = &input[line_start..line_end],
            pad = " ".repeat(format!("line {line_no}: ").len()),
            err = self
        )
    }
}

/// Everything that can go wrong between receiving script text and finishing
/// one execution of it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("forbidden construct '{construct}' at position {position}")]
    Rejected { construct: String, position: usize },

    #[error("runtime error: {message}")]
    Runtime { message: String },
}

impl ScriptError {
    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptError::Runtime {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarketDataError {
    #[error("market data unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("subscription failed: {reason}")]
    SubscriptionFailed { reason: String },

    #[error("malformed market data: {reason}")]
    Malformed { reason: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoutingError {
    /// The venue answered and refused the order.
    #[error("order rejected: {reason}")]
    Rejected { reason: String },

    /// The venue could not be reached or did not answer in time.
    #[error("order routing unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Top-level error type for tradescript.
#[derive(Debug, thiserror::Error)]
pub enum TradescriptError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("insufficient data for {pair}: have {bars} bars, need {minimum}")]
    InsufficientData {
        pair: String,
        bars: usize,
        minimum: usize,
    },

    #[error("no bot with id '{id}'")]
    UnknownBot { id: String },

    #[error("bot '{id}' is already running")]
    BotAlreadyRunning { id: String },

    #[error(transparent)]
    MarketData(#[from] MarketDataError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("fee accounting error: {reason}")]
    Fee { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&TradescriptError> for std::process::ExitCode {
    fn from(err: &TradescriptError) -> Self {
        let code: u8 = match err {
            TradescriptError::Io(_)
            | TradescriptError::UnknownBot { .. }
            | TradescriptError::BotAlreadyRunning { .. }
            | TradescriptError::MarketData(_)
            | TradescriptError::Routing(_)
            | TradescriptError::Fee { .. } => 1,
            TradescriptError::ConfigParse { .. }
            | TradescriptError::ConfigMissing { .. }
            | TradescriptError::ConfigInvalid { .. } => 2,
            TradescriptError::Script(_) => 3,
            TradescriptError::Data { .. } | TradescriptError::InsufficientData { .. } => 4,
            TradescriptError::Database { .. } | TradescriptError::DatabaseQuery { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
