pub mod events;
pub mod jobs;
pub mod models;
pub mod print;
pub mod sessions;
