pub mod aggregated;
pub mod analytics;
pub mod candle;
pub mod credential;
pub mod data_kind;
pub mod holding;
pub mod news;
pub mod quote;
pub mod settings;
