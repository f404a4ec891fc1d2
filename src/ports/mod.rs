pub mod blob_store_port;
pub mod history_port;
pub mod table_store_port;
