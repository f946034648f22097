pub mod common;
pub mod error;
pub mod log_sink;
pub mod run;

pub use error::exit_code;
pub use log_sink::LogSink;
pub use run::handle_run;
