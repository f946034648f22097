use crate::Result;
use crate::cli::Cli;
use crate::core::operations;
use crate::core::options::RunOptions;

use super::common::config_source;
use super::log_sink::LogSink;

const VERSION: &str = env!("VMBACKUP_VERSION");

pub fn handle_run(cli: Cli) -> Result<()> {
    let Cli { config, output } = cli;

    let mut sink = match &output {
        Some(path) => LogSink::append_to(path)?,
        None => LogSink::stdout(),
    };

    let options = RunOptions {
        config: config_source(config.as_ref()),
        version: VERSION.to_string(),
    };

    match operations::run(options, Some(&mut sink)) {
        Ok(_) => Ok(()),
        Err(err) => {
            if sink.is_file() {
                sink.write_line(&format!("Error: {err}"));
            }
            Err(err)
        }
    }
}
