pub mod registry;
pub mod traits;

// Upstream provider implementations
pub mod alphavantage;
pub mod keyword_sentiment;
pub mod kite;
pub mod newsapi;
pub mod openai;
pub mod yahoo_finance;
