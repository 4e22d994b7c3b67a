//! Small shared utilities: TTL cache, throttled HTTP client, stock-code
//! normalization.

mod cache;
mod http;
mod stock;

pub use cache::TtlCache;
pub use http::{HttpError, ThrottledClient};
pub use stock::{add_market_prefix, normalize_stock_code};
