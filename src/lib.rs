pub mod config;
pub mod document;
pub mod error;
pub mod explanation;
pub mod extract;
pub mod logger;
pub mod pdf;
pub mod pipeline;
pub mod session;
pub mod walker;

pub use config::{ScrapeConfig, ScrapeConfigBuilder};
pub use error::{Result, ScrapeError};
pub use extract::{PageExtractor, QuestionRecord};
pub use session::{authenticate, Session};
