pub mod cache;
pub mod duration;
pub mod execution;
pub mod logwatch;
pub mod models;
pub mod persistence;
pub mod registry;
pub mod sources;
