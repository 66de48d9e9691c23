pub mod cancel;
pub mod config;
pub mod error;
pub mod feed;
mod http;
pub mod mediawiki;
pub mod merge;
pub mod parser;
pub mod policy;
pub mod reconcile;
pub mod sanitize;
pub mod serializer;
pub mod tokenizer;
pub mod turrets;
pub mod updater;

pub use parser::ParameterMap;
