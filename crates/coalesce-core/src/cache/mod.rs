//! Result cache shared by the single-flight core and the batch aggregator.
//!
//! - `result_cache`: [`ResultCache`] with lazy expiry on read
//! - `background`: the periodic sweep task that reaps expired entries

pub mod background;
pub mod result_cache;

pub use result_cache::{CachedResult, ResultCache};
