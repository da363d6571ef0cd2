pub mod config;
pub mod contacts;
pub mod funnel;
pub mod notifications;
pub mod opportunity;
pub mod pipeline;
pub mod scheduler;
pub mod shared;
