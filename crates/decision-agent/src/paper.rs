use std::collections::HashMap;

use async_trait::async_trait;
use decision_core::{
    CoreError, CoreResult, ExecutionGateway, OrderAck, OrderRequest, OrderSide, PortfolioSnapshot,
    PositionSnapshot,
};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Default)]
struct PaperPosition {
    quantity: Decimal,
    last_price: Decimal,
    avg_cost: Decimal,
    /// Decision that opened the position; closing fills are attributed to it
    opened_by: String,
}

/// Realized result of a sell against a paper position.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pub decision_id: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub pnl: f64,
}

struct PaperBook {
    cash: Decimal,
    session_start_value: Decimal,
    positions: HashMap<String, PaperPosition>,
    /// Acks keyed by client order id, so resubmission returns the first fill
    orders: HashMap<String, OrderAck>,
    closed: Vec<ClosedTrade>,
    next_order: u64,
}

impl PaperBook {
    fn total_value(&self) -> Decimal {
        self.cash
            + self
                .positions
                .values()
                .map(|p| p.quantity * p.last_price)
                .sum::<Decimal>()
    }
}

/// Simulated account filling every order immediately at its limit price.
pub struct PaperGateway {
    book: Mutex<PaperBook>,
}

impl PaperGateway {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            book: Mutex::new(PaperBook {
                cash: starting_cash,
                session_start_value: starting_cash,
                positions: HashMap::new(),
                orders: HashMap::new(),
                closed: Vec::new(),
                next_order: 1,
            }),
        }
    }

    /// Update the mark price used for position valuation.
    pub fn mark_price(&self, symbol: &str, price: Decimal) {
        if let Some(position) = self.book.lock().positions.get_mut(symbol) {
            position.last_price = price;
        }
    }

    /// Use the current value as the baseline for `daily_pnl`.
    pub fn start_session(&self) {
        let mut book = self.book.lock();
        book.session_start_value = book.total_value();
    }

    /// Drain trades closed since the last call.
    pub fn take_closed_trades(&self) -> Vec<ClosedTrade> {
        std::mem::take(&mut self.book.lock().closed)
    }

    pub fn cash(&self) -> Decimal {
        self.book.lock().cash
    }

    pub fn position(&self, symbol: &str) -> Decimal {
        self.book
            .lock()
            .positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn submit_order(&self, order: &OrderRequest) -> CoreResult<OrderAck> {
        let mut book = self.book.lock();
        if let Some(existing) = book.orders.get(&order.client_order_id) {
            tracing::debug!(
                client_order_id = %order.client_order_id,
                "Duplicate paper order, returning original fill"
            );
            return Ok(existing.clone());
        }

        if order.quantity <= Decimal::ZERO {
            return Err(CoreError::Execution(format!(
                "Order quantity must be positive, got {}",
                order.quantity
            )));
        }
        let price = order.limit_price.ok_or_else(|| {
            CoreError::Execution("Paper fills require a limit price".to_string())
        })?;
        let notional = order.quantity * price;

        match order.side {
            OrderSide::Buy => {
                if notional > book.cash {
                    return Err(CoreError::Execution(format!(
                        "Insufficient paper cash: need {}, have {}",
                        notional, book.cash
                    )));
                }
                book.cash -= notional;
                let position = book.positions.entry(order.symbol.clone()).or_default();
                if position.quantity.is_zero() {
                    position.opened_by = order.client_order_id.clone();
                }
                let cost = position.avg_cost * position.quantity + notional;
                position.quantity += order.quantity;
                position.avg_cost = cost / position.quantity;
                position.last_price = price;
            }
            OrderSide::Sell => {
                let (held, avg_cost, opened_by) = book
                    .positions
                    .get(&order.symbol)
                    .map(|p| (p.quantity, p.avg_cost, p.opened_by.clone()))
                    .unwrap_or_default();
                if held < order.quantity {
                    return Err(CoreError::Execution(format!(
                        "Insufficient paper position in {}: hold {}, selling {}",
                        order.symbol, held, order.quantity
                    )));
                }
                book.cash += notional;
                let pnl = (price - avg_cost) * order.quantity;
                book.closed.push(ClosedTrade {
                    decision_id: opened_by,
                    symbol: order.symbol.clone(),
                    quantity: order.quantity,
                    pnl: pnl.to_f64().unwrap_or(0.0),
                });
                let remaining = held - order.quantity;
                if remaining.is_zero() {
                    book.positions.remove(&order.symbol);
                } else if let Some(position) = book.positions.get_mut(&order.symbol) {
                    position.quantity = remaining;
                    position.last_price = price;
                }
            }
        }

        let ack = OrderAck {
            order_id: format!("paper-{}", book.next_order),
            client_order_id: order.client_order_id.clone(),
            status: "filled".to_string(),
            filled_quantity: order.quantity,
            fill_price: Some(price),
        };
        book.next_order += 1;
        book.orders.insert(order.client_order_id.clone(), ack.clone());

        tracing::info!(
            "Paper fill {:?} {} {} @ {}",
            order.side,
            order.quantity,
            order.symbol,
            price
        );
        Ok(ack)
    }

    async fn portfolio(&self) -> CoreResult<PortfolioSnapshot> {
        let book = self.book.lock();
        let total = book.total_value();
        let positions = book
            .positions
            .iter()
            .map(|(symbol, p)| PositionSnapshot {
                symbol: symbol.clone(),
                quantity: p.quantity.to_f64().unwrap_or(0.0),
                market_value: (p.quantity * p.last_price).to_f64().unwrap_or(0.0),
                sector: Some(risk_gate::symbol_to_sector(symbol).to_string()),
            })
            .collect();

        Ok(PortfolioSnapshot {
            cash: book.cash.to_f64().unwrap_or(0.0),
            total_value: total.to_f64().unwrap_or(0.0),
            daily_pnl: (total - book.session_start_value).to_f64().unwrap_or(0.0),
            positions,
        })
    }

    fn gateway_name(&self) -> &str {
        "paper"
    }
}
