pub mod api;
pub mod audit;
pub mod auth;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod tenant;
pub mod timeslot;
pub mod timezone;
pub mod wal;
