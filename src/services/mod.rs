pub mod metadata_store;
pub mod path_cache;
pub mod sanitize;
pub mod storage_service;
