pub mod analysis;
pub mod bucket;
pub mod config;
pub mod db;
pub mod distance;
pub mod graph;
pub mod library;
pub mod link;
pub mod remix;

/// Application name for XDG paths
pub const APP_NAME: &str = "everloop";
