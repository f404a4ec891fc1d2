pub mod activity;
pub mod append_sink;
pub mod backup_service;
pub mod inspect;
pub mod orchestrator;
pub mod page_fetcher;
pub mod replay;
pub mod runtime;
