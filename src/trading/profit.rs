//! Profit-rate computation with a sanity bound.
//!
//! A corrupted average price compounds into absurd profit figures downstream,
//! so rates beyond ±300% are not trusted outright: the calculator falls back
//! to the price change since the position's last marked reference price and
//! flags the result for the caller to surface instead of silently using it.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::{TradingError, TradingResult};
use crate::models::Position;

/// Any rate whose magnitude exceeds this is considered pathological.
pub const MAX_PLAUSIBLE_RATE: Decimal = dec!(3.0);

/// An unrealized return, possibly produced by the fallback estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfitRate {
    pub rate: Decimal,

    /// True when the primary formula exceeded the plausibility bound and the
    /// value requires downstream attention.
    pub suspect: bool,
}

/// Unrealized profit rate of `position` at `current_price`.
///
/// Primary formula: `(current_price - avg_price) / avg_price`. When its
/// magnitude exceeds [`MAX_PLAUSIBLE_RATE`], the change relative to the
/// position's `last_price` reference is computed as an alternate estimate
/// and the smaller-magnitude of the two is returned, flagged suspect.
pub fn profit_rate(position: &Position, current_price: Decimal) -> TradingResult<ProfitRate> {
    if position.avg_price.is_zero() || position.is_exhausted() {
        return Err(TradingError::NoPosition(position.symbol.clone()));
    }

    let primary = (current_price - position.avg_price) / position.avg_price;
    if primary.abs() <= MAX_PLAUSIBLE_RATE {
        return Ok(ProfitRate {
            rate: primary,
            suspect: false,
        });
    }

    let rate = if position.last_price.is_zero() {
        primary
    } else {
        let alternate = (current_price - position.last_price) / position.last_price;
        if alternate.abs() < primary.abs() {
            alternate
        } else {
            primary
        }
    };

    Ok(ProfitRate { rate, suspect: true })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(avg: Decimal, last: Decimal) -> Position {
        let mut pos = Position::open("KRW-BTC".to_string(), dec!(1), avg, avg);
        pos.mark(last);
        pos
    }

    #[test]
    fn test_primary_formula_in_range() {
        let pos = position(dec!(50000), dec!(50000));
        let result = profit_rate(&pos, dec!(55000)).unwrap();
        assert_eq!(result.rate, dec!(0.1));
        assert!(!result.suspect);
    }

    #[test]
    fn test_loss_in_range() {
        let pos = position(dec!(50000), dec!(50000));
        let result = profit_rate(&pos, dec!(40000)).unwrap();
        assert_eq!(result.rate, dec!(-0.2));
        assert!(!result.suspect);
    }

    #[test]
    fn test_exactly_at_bound_is_trusted() {
        // A 300% move is the boundary, not beyond it.
        let pos = position(dec!(100), dec!(100));
        let result = profit_rate(&pos, dec!(400)).unwrap();
        assert_eq!(result.rate, dec!(3.0));
        assert!(!result.suspect);
    }

    #[test]
    fn test_corrupt_average_falls_back_to_reference() {
        // Average price is garbage (far below market); the reference price
        // tracks the real market, so its estimate wins.
        let pos = position(dec!(100), dec!(48000));
        let result = profit_rate(&pos, dec!(50000)).unwrap();
        assert!(result.suspect);
        assert_eq!(result.rate, (dec!(50000) - dec!(48000)) / dec!(48000));
        assert!(result.rate.abs() <= MAX_PLAUSIBLE_RATE);
    }

    #[test]
    fn test_keeps_primary_when_fallback_is_worse() {
        // Both estimates are extreme; the smaller magnitude is kept and the
        // suspect flag still set.
        let pos = position(dec!(100), dec!(1));
        let result = profit_rate(&pos, dec!(50000)).unwrap();
        assert!(result.suspect);
        assert_eq!(result.rate, (dec!(50000) - dec!(100)) / dec!(100));
    }

    #[test]
    fn test_never_unsuspect_beyond_bound() {
        let pos = position(dec!(100), dec!(90));
        let result = profit_rate(&pos, dec!(100000)).unwrap();
        assert!(result.rate.abs() <= MAX_PLAUSIBLE_RATE || result.suspect);
    }

    #[test]
    fn test_zero_avg_price_is_no_position() {
        let mut pos = position(dec!(100), dec!(100));
        pos.avg_price = Decimal::ZERO;
        assert!(matches!(
            profit_rate(&pos, dec!(50000)),
            Err(TradingError::NoPosition(_))
        ));
    }

    #[test]
    fn test_exhausted_position_is_no_position() {
        let mut pos = position(dec!(100), dec!(100));
        pos.quantity = Decimal::ZERO;
        assert!(matches!(
            profit_rate(&pos, dec!(110)),
            Err(TradingError::NoPosition(_))
        ));
    }
}
