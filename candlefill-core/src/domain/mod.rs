//! Domain types for candlefill

pub mod batch;
pub mod candle;
pub mod window;

pub use batch::{Batch, MonthKey};
pub use candle::{Candle, Ticker, TickerError, CANDLE_COLUMNS, RAW_COLUMNS};
pub use window::FetchWindow;
