use std::path::PathBuf;
use structopt::{clap::AppSettings, StructOpt};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "rdwave",
    about = "Debug a recorded CPU waveform with gdb",
    after_help = "Use RDWAVE_LOG to control logging; e.g. RDWAVE_LOG=all:warn,gdb_server:debug"
)]
#[structopt(global_settings = &[AppSettings::UnifiedHelpMessage])]
pub struct RdwaveOptions {
    /// Waveform (VCD) file to replay.
    #[structopt(short = "w", long, parse(from_os_str))]
    pub waveform: PathBuf,

    /// Signal mapping file: `key=value` lines naming the CPU, register file and
    /// memory bus signals.
    #[structopt(short = "c", long, parse(from_os_str))]
    pub config: PathBuf,

    #[structopt(short = "p", long, default_value = "3333", help = "TCP port to listen on.")]
    pub port: u16,

    #[structopt(long, default_value = "127.0.0.1", help = "IPv4 address to listen on.")]
    pub host: String,

    /// Accept another debugger connection after one ends instead of exiting.
    #[structopt(short = "k", long)]
    pub keep_listening: bool,

    #[structopt(
        short = "v",
        parse(from_occurrences),
        help = "Log more: -v for info, -vv for debug."
    )]
    pub verbose: u64,

    #[structopt(long, parse(from_os_str), help = "Write the log here instead of stderr.")]
    pub log_file: Option<PathBuf>,

    /// Print a JSON summary of the waveform and the reconstructed traces, then
    /// exit without listening.
    #[structopt(long)]
    pub info: bool,
}
