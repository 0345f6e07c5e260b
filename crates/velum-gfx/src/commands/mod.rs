pub mod barrier;
pub mod command_buffer;
pub mod command_types;
pub mod encoder;
pub mod pass;
pub mod rendering_info;
