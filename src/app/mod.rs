pub mod commands;
pub mod conversation;
pub mod errors;
pub mod factory;
pub mod watch;

pub use factory::AppFactory;
