// Scrape module entrypoint
pub mod adapters;   // browser seam + Chromium implementation
pub mod fetcher;    // drives one date query through the margin page
pub mod normaliser; // raw backend rows -> MarginRecord
pub mod response;   // unwraps the endpoint's JSON reply
pub mod types;

pub use fetcher::{MarginFetcher, MarginSource};
pub use normaliser::normalise_row;
pub use types::{BlockedAt, DateQuery, FetchOutcome, MarginRecord, RawRow};
