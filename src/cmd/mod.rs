pub mod adapters;
pub mod cache;
pub mod output;
pub mod resolve;
pub mod vod;
