//! SMS Drip: a multi-touch SMS campaign engine.

pub mod api;
pub mod campaigns;
pub mod config;
pub mod contacts;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod replies;
pub mod store;
pub mod template;
