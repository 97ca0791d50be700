pub mod aggregator;
pub mod analytics_service;
pub mod cache;
pub mod fallback;
pub mod indicator_service;
pub mod market_service;
pub mod news_service;
