use crate::{
    config::{ConfigError, TraceConfig},
    trace::{TraceError, Traces},
    waveform::{vcd_reader::VcdReader, WaveformError},
};
use exit_result::ExitResult;
use std::path::Path;
use thiserror::Error;

pub mod exit_result;
pub mod rdwave_options;
pub mod serve_command;
pub mod trace_info_command;

pub trait WaveCommand {
    fn run(&mut self) -> ExitResult<()>;
}

/// Anything that stops the traces from being built. All of these end the
/// process.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Waveform(#[from] WaveformError),
    #[error(transparent)]
    Trace(#[from] TraceError),
}

pub struct LoadedTrace {
    pub config: TraceConfig,
    pub reader: VcdReader,
    pub traces: Traces,
}

/// Read the signal mapping, open the waveform and build every trace.
pub fn load_trace(waveform: &Path, config: &Path) -> Result<LoadedTrace, SetupError> {
    let config = TraceConfig::load(config)?;
    let mut reader = VcdReader::open(waveform)?;
    let traces = Traces::build(&mut reader, &config)?;
    Ok(LoadedTrace {
        config,
        reader,
        traces,
    })
}
