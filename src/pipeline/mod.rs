//! Pipeline entry points for crawler operations.
//!
//! - `Pipeline::run`: discover listings, fetch and enrich ads, clean, save
//! - `Pipeline::clean_only`: re-clean the stored raw data

mod run;

pub use run::Pipeline;
