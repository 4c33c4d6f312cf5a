mod cli;
pub mod report;
pub mod watch;

pub use cli::CommandArgs;
