pub mod api;
pub mod client;
pub mod config;
pub mod humanize;
pub mod observability;
pub mod providers;
pub mod retry;
pub mod scheduler;
pub mod vpn;
