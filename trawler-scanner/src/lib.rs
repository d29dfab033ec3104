pub mod association;
pub mod buttons;
pub mod chrome;
pub mod crawler;
pub mod driver;
pub mod error;
pub mod forms;
pub mod frontier;
pub mod global_links;
pub mod interaction;
pub mod links;
pub mod normalize;
pub mod oracle;
pub mod recorder;
pub mod result;
pub mod static_driver;

#[cfg(test)]
pub(crate) mod testing;

pub use chrome::{ChromeDriver, ChromeOptions};
pub use crawler::{Crawler, CrawlerConfig, InteractionMode, ProgressCallback};
pub use driver::{DriverError, ElementRef, PageDriver, WaitPolicy};
pub use error::ScanError;
pub use interaction::InteractionSettings;
pub use normalize::{NormalizedUrl, normalize};
pub use oracle::{HeuristicOracle, MockValueOracle, OpenAiOracle};
pub use recorder::{ActionKind, ActionRecord, ActionRecorder, MemoryRecorder, RetractPolicy};
pub use result::{CrawlSummary, PageVisit, Termination};
pub use static_driver::StaticDriver;
