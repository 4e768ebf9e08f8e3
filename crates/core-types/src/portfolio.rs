// In crates/core-types/src/portfolio.rs

use crate::{Error, Result, Side, Symbol, TradingMode};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// The simulated account state for one simulation run.
///
/// Positions are stored as signed quantities (positive long, negative short).
/// A symbol has an entry price if and only if it has a non-zero position.
/// Equity only moves when a position is opened (fees) or closed (realized P&L).
#[derive(Debug, Clone)]
pub struct Portfolio {
    positions: HashMap<Symbol, i64>,
    entry_prices: HashMap<Symbol, Decimal>,
    entry_fees: HashMap<Symbol, Decimal>,
    equity: Decimal,
    available_margin: Decimal,
    trading_mode: TradingMode,
    base_quantity: i64,
}

/// The outcome of closing a position.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: i64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    /// `(exit - entry) * signed quantity`, before fees.
    pub gross_pnl: Decimal,
    /// Entry and exit fees of the round trip.
    pub fees: Decimal,
    /// Realized round-trip P&L net of fees.
    pub pnl: Decimal,
}

impl Portfolio {
    /// Creates a new flat portfolio with the whole capital available as margin.
    pub fn new(initial_capital: Decimal, trading_mode: TradingMode, base_quantity: i64) -> Self {
        Self {
            positions: HashMap::new(),
            entry_prices: HashMap::new(),
            entry_fees: HashMap::new(),
            equity: initial_capital,
            available_margin: initial_capital,
            trading_mode,
            base_quantity: base_quantity.max(1),
        }
    }

    pub fn equity(&self) -> Decimal {
        self.equity
    }

    pub fn available_margin(&self) -> Decimal {
        self.available_margin
    }

    pub fn trading_mode(&self) -> TradingMode {
        self.trading_mode
    }

    /// The lot size positions are rounded down to.
    pub fn base_quantity(&self) -> i64 {
        self.base_quantity
    }

    /// Signed quantity held for `symbol` (0 when flat).
    pub fn position(&self, symbol: &Symbol) -> i64 {
        self.positions.get(symbol).copied().unwrap_or(0)
    }

    pub fn entry_price(&self, symbol: &Symbol) -> Option<Decimal> {
        self.entry_prices.get(symbol).copied()
    }

    /// The side held for `symbol`, if any.
    pub fn side(&self, symbol: &Symbol) -> Option<Side> {
        match self.position(symbol) {
            0 => None,
            q if q > 0 => Some(Side::Long),
            _ => Some(Side::Short),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.positions.is_empty()
    }

    /// Opens a new position of `quantity` lots (absolute) at `price`.
    ///
    /// The notional and the entry fee are taken out of the available margin;
    /// the fee is also charged to equity.
    pub fn open_position(
        &mut self,
        symbol: &Symbol,
        side: Side,
        quantity: i64,
        price: Decimal,
        fee: Decimal,
    ) -> Result<()> {
        if quantity <= 0 {
            return Err(Error::ZeroQuantity);
        }
        if self.positions.contains_key(symbol) {
            return Err(Error::PositionAlreadyOpen(symbol.0.clone()));
        }

        self.positions.insert(symbol.clone(), side.sign() * quantity);
        self.entry_prices.insert(symbol.clone(), price);
        self.entry_fees.insert(symbol.clone(), fee);
        self.equity -= fee;
        self.available_margin -= Decimal::from(quantity) * price + fee;
        Ok(())
    }

    /// Closes the whole position held for `symbol` at `price`, realizing P&L.
    pub fn close_position(
        &mut self,
        symbol: &Symbol,
        price: Decimal,
        fee: Decimal,
    ) -> Result<ClosedPosition> {
        let signed_qty = self
            .positions
            .remove(symbol)
            .ok_or_else(|| Error::NoOpenPosition(symbol.0.clone()))?;
        let entry_price = self.entry_prices.remove(symbol).unwrap_or(price);
        let entry_fee = self.entry_fees.remove(symbol).unwrap_or_default();

        let quantity = signed_qty.abs();
        let gross_pnl = (price - entry_price) * Decimal::from(signed_qty);
        let realized = gross_pnl - fee;

        self.equity += realized;
        self.available_margin += Decimal::from(quantity) * entry_price + realized;

        Ok(ClosedPosition {
            symbol: symbol.clone(),
            side: if signed_qty > 0 { Side::Long } else { Side::Short },
            quantity,
            entry_price,
            exit_price: price,
            gross_pnl,
            fees: entry_fee + fee,
            pnl: realized - entry_fee,
        })
    }
}
