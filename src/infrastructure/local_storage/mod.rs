pub mod history_file_adapter;
pub mod local_blob_adapter;
pub mod memory_blob_adapter;
