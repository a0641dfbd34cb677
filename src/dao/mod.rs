/// Persistent row definitions.
pub mod models;
/// Storage abstraction layer for database operations.
pub mod storage;
/// Tournament, qualifier, score and roster persistence.
pub mod tournament_store;
