//! Stock trading tools over the CSV ledger and the quote service.
//!
//! Business rejections (bad amounts, unknown positions, missing prices) are
//! ordinary results with `"success": false`. Only I/O and upstream failures
//! surface as handler errors.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::Result;
use crate::mcp::handler::{
    get_int_arg, get_number_arg, get_optional_string_arg, get_string_arg, json_result, Arguments,
    ToolHandler,
};
use crate::mcp::protocol::{Tool, ToolResult};
use crate::mcp::registry::ToolRegistry;
use crate::service::{CashMove, Ledger, QuoteService, Trade};

fn rejected(message: &str) -> Value {
    json!({ "success": false, "message": message })
}

fn money_schema(verb: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "amount": {
                "type": "number",
                "description": format!("Amount to {}", verb)
            },
            "reason": {
                "type": "string",
                "description": "Optional note recorded in the message"
            }
        },
        "required": ["amount"]
    })
}

fn trade_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "stock_id": {
                "type": "string",
                "description": "Ticker symbol, e.g. AAPL"
            },
            "quantity": {
                "type": "integer",
                "description": "Number of shares"
            }
        },
        "required": ["stock_id", "quantity"]
    })
}

fn cash_message(verb: &str, amount: f64, reason: &str) -> String {
    format!("{} ₹{:.2}. {}", verb, amount, reason)
        .trim_end()
        .to_string()
}

/// `debit_money(amount, reason?)`
pub struct DebitMoneyTool {
    ledger: Arc<Ledger>,
}

impl DebitMoneyTool {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl ToolHandler for DebitMoneyTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "debit_money".to_string(),
            description: "Deduct money from account balance.".to_string(),
            input_schema: money_schema("debit"),
        }
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult> {
        let amount = get_number_arg(&args, "amount")?;
        let reason = get_optional_string_arg(&args, "reason").unwrap_or_default();

        let body = match self.ledger.debit(amount).await? {
            CashMove::Applied { balance } => json!({
                "success": true,
                "balance": balance,
                "message": cash_message("Debited", amount, &reason)
            }),
            CashMove::NotPositive => rejected("Amount must be positive"),
            CashMove::Insufficient { balance } => json!({
                "success": false,
                "message": "Insufficient balance",
                "current_balance": balance
            }),
        };
        json_result(&body)
    }
}

/// `credit_money(amount, reason?)`
pub struct CreditMoneyTool {
    ledger: Arc<Ledger>,
}

impl CreditMoneyTool {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl ToolHandler for CreditMoneyTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "credit_money".to_string(),
            description: "Add money to account balance.".to_string(),
            input_schema: money_schema("credit"),
        }
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult> {
        let amount = get_number_arg(&args, "amount")?;
        let reason = get_optional_string_arg(&args, "reason").unwrap_or_default();

        let body = match self.ledger.credit(amount).await? {
            CashMove::Applied { balance } => json!({
                "success": true,
                "balance": balance,
                "message": cash_message("Credited", amount, &reason)
            }),
            CashMove::NotPositive | CashMove::Insufficient { .. } => {
                rejected("Amount must be positive")
            }
        };
        json_result(&body)
    }
}

/// `get_balance()`
pub struct GetBalanceTool {
    ledger: Arc<Ledger>,
}

impl GetBalanceTool {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl ToolHandler for GetBalanceTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get_balance".to_string(),
            description: "Get current account balance.".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, _args: Arguments) -> Result<ToolResult> {
        let balance = self.ledger.balance().await?;
        json_result(&json!({ "success": true, "balance": balance }))
    }
}

#[derive(Clone, Copy)]
enum Side {
    Buy,
    Sell,
}

/// `buy_stock(stock_id, quantity)` and `sell_stock(stock_id, quantity)`.
pub struct TradeTool {
    ledger: Arc<Ledger>,
    side: Side,
}

impl TradeTool {
    pub fn buy(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            side: Side::Buy,
        }
    }

    pub fn sell(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            side: Side::Sell,
        }
    }
}

#[async_trait]
impl ToolHandler for TradeTool {
    fn definition(&self) -> Tool {
        let (name, description) = match self.side {
            Side::Buy => ("buy_stock", "Buy shares and add them to the portfolio."),
            Side::Sell => ("sell_stock", "Sell shares held in the portfolio."),
        };
        Tool {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: trade_schema(),
        }
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult> {
        let stock_id = get_string_arg(&args, "stock_id")?;
        let quantity = get_int_arg(&args, "quantity")?;

        let outcome = match self.side {
            Side::Buy => self.ledger.buy(&stock_id, quantity).await?,
            Side::Sell => self.ledger.sell(&stock_id, quantity).await?,
        };

        let body = match outcome {
            Trade::Applied {
                stock_id,
                quantity: held,
            } => {
                let verb = match self.side {
                    Side::Buy => "Bought",
                    Side::Sell => "Sold",
                };
                json!({
                    "success": true,
                    "stock_id": stock_id,
                    "quantity": held,
                    "message": format!("{} {} shares of {}", verb, quantity, stock_id)
                })
            }
            Trade::NotPositive => rejected("Quantity must be positive"),
            Trade::MissingSymbol => rejected("Stock id is required"),
            Trade::NotFound => rejected("Stock not found"),
            Trade::NotEnough { available } => json!({
                "success": false,
                "message": "Not enough shares",
                "available": available
            }),
            Trade::TooLarge { held } => json!({
                "success": false,
                "message": "Quantity too large",
                "held": held
            }),
        };
        json_result(&body)
    }
}

/// `list_stocks()`
pub struct ListStocksTool {
    ledger: Arc<Ledger>,
}

impl ListStocksTool {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl ToolHandler for ListStocksTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "list_stocks".to_string(),
            description: "List portfolio positions sorted by ticker.".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, _args: Arguments) -> Result<ToolResult> {
        let positions = self.ledger.positions().await?;
        let total_shares: i64 = positions.iter().map(|p| p.quantity).sum();
        json_result(&json!({
            "success": true,
            "total_positions": positions.len(),
            "total_shares": total_shares,
            "stocks": positions
        }))
    }
}

/// `get_stock_price(symbol)`
pub struct StockPriceTool {
    quotes: Arc<QuoteService>,
}

impl StockPriceTool {
    pub fn new(quotes: Arc<QuoteService>) -> Self {
        Self { quotes }
    }
}

#[async_trait]
impl ToolHandler for StockPriceTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get_stock_price".to_string(),
            description: "Fetch approximate stock price from Google Finance.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "symbol": {
                        "type": "string",
                        "description": "Ticker symbol listed on NASDAQ, e.g. MSFT"
                    }
                },
                "required": ["symbol"]
            }),
        }
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult> {
        let symbol = get_string_arg(&args, "symbol")?;
        match self.quotes.price(&symbol).await? {
            Some(quote) => {
                let mut body = serde_json::to_value(&quote)?;
                body["success"] = json!(true);
                json_result(&body)
            }
            None => json_result(&rejected("Unable to extract price")),
        }
    }
}

/// Register the seven stock trading tools.
pub fn register(
    registry: &mut ToolRegistry,
    ledger: Arc<Ledger>,
    quotes: Arc<QuoteService>,
) -> Result<()> {
    registry.register(DebitMoneyTool::new(ledger.clone()))?;
    registry.register(CreditMoneyTool::new(ledger.clone()))?;
    registry.register(GetBalanceTool::new(ledger.clone()))?;
    registry.register(TradeTool::buy(ledger.clone()))?;
    registry.register(TradeTool::sell(ledger.clone()))?;
    registry.register(ListStocksTool::new(ledger))?;
    registry.register(StockPriceTool::new(quotes))?;
    Ok(())
}
