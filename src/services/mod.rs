pub mod cache;
pub mod clock;
pub mod health_checker;
pub mod health_store;
pub mod identity;
pub mod ingest;
pub mod m3u_parser;
pub mod metrics;
pub mod prober;
pub mod redis;
pub mod storage;
pub mod user_data;
