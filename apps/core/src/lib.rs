pub mod config;
pub mod contract;
pub mod dispatcher;
pub mod events;
pub mod logging;
pub mod runtime;
pub mod tag;
pub mod tag_finder;
pub mod tag_query;
pub mod tag_search;
pub mod tag_store;
pub mod tag_tasks;
pub mod task;
mod worker;
