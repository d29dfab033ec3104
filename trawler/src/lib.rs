pub mod commands;
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    crawler_config_from_args, default_output_path, parse_seed_url, parse_url_line,
    resolve_db_path,
};

// Re-export crawl functionality from trawler-core
pub use trawler_core::crawl::{
    CrawlOptions, CrawlOutcome, CrawlProgressCallback, DriverKind, execute_crawl,
    extract_url_path, generate_crawl_report,
};
