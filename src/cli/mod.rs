mod commands;
mod console;

pub use commands::{BackendArgs, Cli, Commands};
pub use console::ConsoleObserver;
