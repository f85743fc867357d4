//! Flat basis-point volume fee with a running total.

use crate::domain::error::TradescriptError;
use crate::ports::fee_port::FeePort;
use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FeeTotals {
    pub fills: u64,
    pub volume: f64,
    pub fees: f64,
}

#[derive(Debug)]
pub struct BpsFeeModel {
    bps: f64,
    totals: Mutex<FeeTotals>,
}

impl BpsFeeModel {
    pub fn new(bps: f64) -> Result<Self, TradescriptError> {
        if !(bps >= 0.0 && bps.is_finite()) {
            return Err(TradescriptError::Fee {
                reason: format!("fee rate must be non-negative, got {bps} bps"),
            });
        }
        Ok(Self {
            bps,
            totals: Mutex::new(FeeTotals::default()),
        })
    }

    pub fn totals(&self) -> FeeTotals {
        *self
            .totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FeePort for BpsFeeModel {
    fn apply_volume_fee(&self, price: f64, quantity: f64) -> Result<f64, TradescriptError> {
        let notional = price * quantity;
        if !(notional >= 0.0 && notional.is_finite()) {
            return Err(TradescriptError::Fee {
                reason: format!("invalid fill notional {price} x {quantity}"),
            });
        }
        let fee = notional * self.bps / 10_000.0;
        let mut totals = self
            .totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        totals.fills += 1;
        totals.volume += notional;
        totals.fees += fee;
        Ok(fee)
    }
}
