//! Fee accounting collaborator.

use crate::domain::error::TradescriptError;

pub trait FeePort: Send + Sync {
    /// Record a volume fee for a fill and return the amount charged.
    fn apply_volume_fee(&self, price: f64, quantity: f64) -> Result<f64, TradescriptError>;
}
