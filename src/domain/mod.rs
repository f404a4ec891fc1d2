pub mod codec;
pub mod cursor;
pub mod entities;
pub mod errors;
pub mod export_models;
