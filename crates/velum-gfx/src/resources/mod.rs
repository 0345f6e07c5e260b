pub mod buffer;
pub mod state;
pub mod state_tracker;
pub mod subresource;
pub mod texture;
