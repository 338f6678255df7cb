//! CSV-backed cash balance and share portfolio.
//!
//! Two files live in the data directory:
//!
//! - `stocks_portfolio.csv`: `stock_id,quantity`, one row per open position
//! - `account_balance.csv`: `balance` header and one row with two decimals
//!
//! Every operation holds a single async mutex across its read-modify-write,
//! so concurrent sessions in one process never interleave updates. Files are
//! replaced by rename, so a crash never leaves a half-written ledger.

use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const PORTFOLIO_FILE: &str = "stocks_portfolio.csv";
pub const BALANCE_FILE: &str = "account_balance.csv";
pub const DEFAULT_INITIAL_BALANCE: f64 = 100_000.0;

/// One open position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub stock_id: String,
    pub quantity: i64,
}

/// Outcome of a debit or credit.
#[derive(Debug, Clone, PartialEq)]
pub enum CashMove {
    Applied { balance: f64 },
    NotPositive,
    Insufficient { balance: f64 },
}

/// Outcome of a buy or sell.
#[derive(Debug, Clone, PartialEq)]
pub enum Trade {
    /// `quantity` is the position held afterwards.
    Applied { stock_id: String, quantity: i64 },
    NotPositive,
    MissingSymbol,
    NotFound,
    NotEnough { available: i64 },
    /// The resulting position would not fit in an `i64`.
    TooLarge { held: i64 },
}

/// Upper-cased, trimmed ticker.
pub fn normalize_symbol(stock_id: &str) -> String {
    stock_id.trim().to_uppercase()
}

/// Round to cents.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// The ledger files and their writer lock.
#[derive(Debug)]
pub struct Ledger {
    portfolio_path: PathBuf,
    balance_path: PathBuf,
    lock: Mutex<()>,
}

impl Ledger {
    /// Ledger with the standard file names under `data_dir`.
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        let dir = data_dir.as_ref();
        Self::with_paths(dir.join(PORTFOLIO_FILE), dir.join(BALANCE_FILE))
    }

    pub fn with_paths(portfolio_path: impl Into<PathBuf>, balance_path: impl Into<PathBuf>) -> Self {
        Self {
            portfolio_path: portfolio_path.into(),
            balance_path: balance_path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn portfolio_path(&self) -> &Path {
        &self.portfolio_path
    }

    pub fn balance_path(&self) -> &Path {
        &self.balance_path
    }

    /// Create whichever files are missing. Existing files are left alone.
    pub async fn init(&self, initial_balance: f64) -> Result<()> {
        let _guard = self.lock.lock().await;

        if !exists(&self.portfolio_path).await? {
            write_portfolio(&self.portfolio_path, &IndexMap::new()).await?;
            info!("Created portfolio at {}", self.portfolio_path.display());
        }
        if !exists(&self.balance_path).await? {
            write_balance(&self.balance_path, initial_balance).await?;
            info!(
                "Created balance file at {} with {:.2}",
                self.balance_path.display(),
                initial_balance
            );
        }
        Ok(())
    }

    pub async fn balance(&self) -> Result<f64> {
        let _guard = self.lock.lock().await;
        Ok(round_cents(read_balance(&self.balance_path).await?))
    }

    pub async fn debit(&self, amount: f64) -> Result<CashMove> {
        if amount.is_nan() || amount <= 0.0 {
            return Ok(CashMove::NotPositive);
        }
        let _guard = self.lock.lock().await;

        let balance = read_balance(&self.balance_path).await?;
        if amount > balance {
            return Ok(CashMove::Insufficient {
                balance: round_cents(balance),
            });
        }
        let balance = round_cents(balance - amount);
        write_balance(&self.balance_path, balance).await?;
        debug!("Debited {:.2}, balance now {:.2}", amount, balance);
        Ok(CashMove::Applied { balance })
    }

    pub async fn credit(&self, amount: f64) -> Result<CashMove> {
        if amount.is_nan() || amount <= 0.0 {
            return Ok(CashMove::NotPositive);
        }
        let _guard = self.lock.lock().await;

        let balance = round_cents(read_balance(&self.balance_path).await? + amount);
        write_balance(&self.balance_path, balance).await?;
        debug!("Credited {:.2}, balance now {:.2}", amount, balance);
        Ok(CashMove::Applied { balance })
    }

    pub async fn buy(&self, stock_id: &str, quantity: i64) -> Result<Trade> {
        if quantity <= 0 {
            return Ok(Trade::NotPositive);
        }
        let stock_id = normalize_symbol(stock_id);
        if stock_id.is_empty() {
            return Ok(Trade::MissingSymbol);
        }
        let _guard = self.lock.lock().await;

        let mut portfolio = self.load_portfolio().await?;
        let held = portfolio.entry(stock_id.clone()).or_insert(0);
        let Some(total) = held.checked_add(quantity) else {
            return Ok(Trade::TooLarge { held: *held });
        };
        *held = total;
        let quantity = total;
        write_portfolio(&self.portfolio_path, &portfolio).await?;

        Ok(Trade::Applied { stock_id, quantity })
    }

    pub async fn sell(&self, stock_id: &str, quantity: i64) -> Result<Trade> {
        if quantity <= 0 {
            return Ok(Trade::NotPositive);
        }
        let stock_id = normalize_symbol(stock_id);
        let _guard = self.lock.lock().await;

        let mut portfolio = self.load_portfolio().await?;
        let Some(held) = portfolio.get_mut(&stock_id) else {
            return Ok(Trade::NotFound);
        };
        if quantity > *held {
            return Ok(Trade::NotEnough { available: *held });
        }

        *held -= quantity;
        let remaining = *held;
        if remaining == 0 {
            portfolio.shift_remove(&stock_id);
        }
        write_portfolio(&self.portfolio_path, &portfolio).await?;

        Ok(Trade::Applied {
            stock_id,
            quantity: remaining,
        })
    }

    /// Open positions sorted by ticker.
    pub async fn positions(&self) -> Result<Vec<Position>> {
        let _guard = self.lock.lock().await;
        let mut positions: Vec<Position> = self
            .load_portfolio()
            .await?
            .into_iter()
            .filter(|(_, quantity)| *quantity > 0)
            .map(|(stock_id, quantity)| Position { stock_id, quantity })
            .collect();
        positions.sort_by(|a, b| a.stock_id.cmp(&b.stock_id));
        Ok(positions)
    }

    /// Read the portfolio, creating an empty one if the file is missing.
    async fn load_portfolio(&self) -> Result<IndexMap<String, i64>> {
        match tokio::fs::read(&self.portfolio_path).await {
            Ok(bytes) => parse_portfolio(&self.portfolio_path, &bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let empty = IndexMap::new();
                write_portfolio(&self.portfolio_path, &empty).await?;
                info!("Created portfolio at {}", self.portfolio_path.display());
                Ok(empty)
            }
            Err(e) => Err(Error::ledger(&self.portfolio_path, e)),
        }
    }
}

async fn exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| Error::ledger(path, e))
}

fn parse_portfolio(path: &Path, bytes: &[u8]) -> Result<IndexMap<String, i64>> {
    let mut reader = csv::Reader::from_reader(bytes);
    let mut portfolio = IndexMap::new();
    for row in reader.records() {
        let row = row?;
        let (Some(stock_id), Some(quantity)) = (row.get(0), row.get(1)) else {
            return Err(format_error(path, "row needs stock_id and quantity"));
        };
        let quantity: i64 = quantity
            .trim()
            .parse()
            .map_err(|_| format_error(path, &format!("bad quantity '{}' for {}", quantity, stock_id)))?;
        portfolio.insert(stock_id.to_string(), quantity);
    }
    Ok(portfolio)
}

async fn read_balance(path: &Path) -> Result<f64> {
    let bytes = tokio::fs::read(path).await.map_err(|e| Error::ledger(path, e))?;
    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    match reader.records().next() {
        None => Ok(0.0),
        Some(row) => {
            let row = row?;
            let raw = row.get(0).unwrap_or_default().trim();
            raw.parse()
                .map_err(|_| format_error(path, &format!("bad balance '{}'", raw)))
        }
    }
}

async fn write_portfolio(path: &Path, portfolio: &IndexMap<String, i64>) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["stock_id", "quantity"])?;
    for (stock_id, quantity) in portfolio.iter().filter(|(_, q)| **q > 0) {
        writer.write_record([stock_id.as_str(), &quantity.to_string()])?;
    }
    replace(path, finish(path, writer)?).await
}

async fn write_balance(path: &Path, balance: f64) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["balance"])?;
    writer.write_record([format!("{:.2}", round_cents(balance))])?;
    replace(path, finish(path, writer)?).await
}

fn finish(path: &Path, writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|e| Error::ledger(path, e.into_error()))
}

/// Write to a sibling temp file, then rename over `path`.
async fn replace(path: &Path, contents: Vec<u8>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::ledger(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| Error::ledger(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::ledger(path, e))
}

fn format_error(path: &Path, message: &str) -> Error {
    Error::LedgerFormat {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}
