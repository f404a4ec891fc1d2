pub mod file_table_adapter;
pub mod memory_table_adapter;
