pub mod admin;
pub mod chat;
pub mod common;
pub mod native;
pub mod passthrough;
pub mod upload;
