pub mod commands;
pub mod media;
