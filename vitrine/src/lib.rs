#![deny(clippy::all)]

#[macro_use]
extern crate serde_derive;

pub mod cache;
pub mod config;
pub mod fetch;
pub mod fs;
pub mod mount;
pub mod store;
pub mod util;

pub use fetch::Fetcher;
pub use fs::Viewport;
pub use store::ObjectStore;

pub use anyhow;
