//! Source drivers. Each turns fetched bytes into items or document targets;
//! fetching, storage and bookkeeping stay in [`crate::pipeline`].

pub mod ir_pages;
pub mod rss;
pub mod sec_edgar;
