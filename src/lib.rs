pub mod app;
pub mod config;
pub mod dedupe;
pub mod domain;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod gate;
pub mod input;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod product;
pub mod recovery;
pub mod store;
pub mod summary;
