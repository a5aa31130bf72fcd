#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate lazy_static;

#[macro_use]
mod log;
mod breakpoint_set;
mod commands;
mod config;
mod gdb_connection;
mod gdb_register;
mod gdb_request;
mod gdb_server;
mod registers;
mod replay_timeline;
mod scoped_fd;
mod session;
mod trace;
mod waveform;

use crate::{
    commands::{
        exit_result::ExitResult,
        rdwave_options::RdwaveOptions,
        serve_command::ServeCommand,
        trace_info_command::TraceInfoCommand,
        WaveCommand,
    },
    log::{init_logging, LogSettings},
};
use structopt::StructOpt;

fn main() -> ExitResult<()> {
    let options = RdwaveOptions::from_args();

    let settings = LogSettings {
        verbosity: options.verbose,
        log_file: options.log_file.clone(),
    };
    if let Err(e) = init_logging(&settings) {
        clean_fatal!("{}", e);
    }

    if options.info {
        TraceInfoCommand::new(&options).run()
    } else {
        ServeCommand::new(&options).run()
    }
}
