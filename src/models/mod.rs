pub mod api;
pub mod item;
pub mod progress;
pub mod record;
