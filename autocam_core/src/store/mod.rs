//! Store backends: Postgres and S3 for production, in-memory for local runs and tests.

pub mod memory;
pub mod postgres;
pub mod s3;
