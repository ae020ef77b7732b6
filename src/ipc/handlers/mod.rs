pub mod academy;
pub mod api;
pub mod attendance;
pub mod classes;
pub mod core;
pub mod settings;
