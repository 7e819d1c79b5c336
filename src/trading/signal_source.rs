//! Signal source seam.
//!
//! Strategy evaluation is an external collaborator; the coordinator only
//! asks "what do you want this cycle". `ScriptedSignals` replays a JSON file
//! of decisions so the paper loop and tests can drive full cycles without
//! any in-crate signal generation.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};

use crate::models::Signal;

/// Supplies one batch of decisions per cycle.
pub trait SignalSource: Send {
    /// Signals for the upcoming cycle. An empty batch means hold everything.
    fn next_batch(&mut self) -> Vec<Signal>;
}

/// A source that never wants to trade. Stop-loss exits and reporting still
/// run; useful for supervising an existing book.
#[derive(Debug, Default)]
pub struct HoldSignals;

impl SignalSource for HoldSignals {
    fn next_batch(&mut self) -> Vec<Signal> {
        Vec::new()
    }
}

/// Replays batches of signals loaded from a JSON file: an array of batches,
/// each batch an array of `{symbol, action, suggested_amount}` objects.
/// Once the script runs out it keeps returning empty batches.
#[derive(Debug)]
pub struct ScriptedSignals {
    batches: VecDeque<Vec<Signal>>,
}

impl ScriptedSignals {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read signal script {}", path.display()))?;
        let batches: Vec<Vec<Signal>> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid signal script {}", path.display()))?;
        Ok(Self {
            batches: batches.into(),
        })
    }

    pub fn from_batches(batches: Vec<Vec<Signal>>) -> Self {
        Self {
            batches: batches.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

impl SignalSource for ScriptedSignals {
    fn next_batch(&mut self) -> Vec<Signal> {
        self.batches.pop_front().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalAction;

    #[test]
    fn test_scripted_replay_order() {
        let mut source = ScriptedSignals::from_batches(vec![
            vec![Signal {
                symbol: "KRW-BTC".to_string(),
                action: SignalAction::Buy,
                suggested_amount: rust_decimal_macros::dec!(100000),
            }],
            vec![],
        ]);

        let first = source.next_batch();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].action, SignalAction::Buy);

        assert!(source.next_batch().is_empty());
        // Exhausted scripts keep yielding empty batches.
        assert!(source.next_batch().is_empty());
    }

    #[test]
    fn test_hold_source_is_silent() {
        let mut source = HoldSignals;
        assert!(source.next_batch().is_empty());
    }
}
