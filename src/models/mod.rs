pub mod config;
pub mod deal;
pub mod kline;
pub mod params;
pub mod result;
