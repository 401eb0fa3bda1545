pub mod ai;
pub mod allocation;
pub mod analysis;
pub mod composer;
pub mod config;
pub mod discovery;
pub mod error;
pub mod models;
pub mod quotes;
pub mod store;

pub use composer::{ComposeRequest, ComposeResponse, PortfolioComposer};
pub use config::AppConfig;
pub use error::{ComposerError, ErrorKind};
