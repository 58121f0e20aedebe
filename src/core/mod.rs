pub mod config;
pub mod error;
pub mod formatter;
pub mod invoker;
pub mod jsonl;
pub mod media;
pub mod payload;
pub mod pipeline;
pub mod record;
pub mod response;
pub mod stages;
