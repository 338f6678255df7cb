//! Service layer for the tool servers.
//!
//! Services are constructed explicitly at startup and shared with the tool
//! handlers through `Arc`; nothing here is global.

pub mod documents;
pub mod ledger;
pub mod quote;
pub mod weather;

pub use documents::{DocumentIndex, Hit, LocalIndex};
pub use ledger::{CashMove, Ledger, Position, Trade};
pub use quote::{Quote, QuoteService};
pub use weather::{Period, WeatherEndpoints, WeatherReport, WeatherService};
