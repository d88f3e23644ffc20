// src/lib.rs

//! lalafo.kg ad crawler library.
//!
//! Discovers car listings, fetches and enriches every ad, and writes a raw
//! and a cleaned dataset.

pub mod error;
pub mod models;
pub mod parsers;
pub mod pipeline;
pub mod progress;
pub mod services;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod utils;
