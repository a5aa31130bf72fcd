//! Traces reconstructed from the waveform: instruction retirements, register
//! file writes and memory writes. Built once, up front, then only queried.

use crate::{
    config::TraceConfig,
    log::LogLevel::LogInfo,
    waveform::{WaveformError, WaveformReader},
};
use cpu_trace::CpuTrace;
use mem_trace::{MemInit, MemTrace};
use reg_file_trace::RegFileTrace;
use std::{io, path::PathBuf};
use thiserror::Error;

pub mod cpu_trace;
pub mod mem_trace;
pub mod reg_file_trace;
pub mod write_trace;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error(transparent)]
    Waveform(#[from] WaveformError),
    #[error("Could not read memory init file `{path:?}': {source}")]
    MemInit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No retired instructions found in the waveform")]
    NoRetirements,
}

pub struct Traces {
    pub cpu: CpuTrace,
    pub reg_file: RegFileTrace,
    pub mem: MemTrace,
}

impl Traces {
    /// Build every trace `config` asks for. The retirement trace must not be
    /// empty: without it there is no program counter to present.
    pub fn build(
        reader: &mut dyn WaveformReader,
        config: &TraceConfig,
    ) -> Result<Traces, TraceError> {
        let cpu = CpuTrace::build(reader, &config.cpu)?;
        if cpu.is_empty() {
            return Err(TraceError::NoRetirements);
        }

        let reg_file = match &config.reg_file {
            Some(signals) => RegFileTrace::build(reader, &config.cpu.clk, signals)?,
            None => {
                log!(LogInfo, "No register file signals configured");
                RegFileTrace::default()
            }
        };

        let init = match &config.mem_init_file {
            Some(path) => Some(
                MemInit::load(path, config.mem_init_start_addr).map_err(|e| {
                    TraceError::MemInit {
                        path: path.clone(),
                        source: e,
                    }
                })?,
            ),
            None => None,
        };
        let mem = match &config.mem {
            Some(signals) => MemTrace::build(reader, &config.cpu.clk, signals, init)?,
            None => {
                log!(LogInfo, "No memory bus signals configured");
                MemTrace::new(Default::default(), init)
            }
        };

        Ok(Traces { cpu, reg_file, mem })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::test_util::FakeWaveform;

    const CONFIG: &str = "cpuClk=TOP.cpu.clk
retiredPc=TOP.cpu.pc
retiredPcValid=TOP.cpu.valid
";

    #[test]
    fn empty_retirement_trace_is_fatal() {
        let mut wave = FakeWaveform::new();
        let clk = wave.declare("TOP.cpu.clk");
        wave.declare("TOP.cpu.pc");
        wave.declare("TOP.cpu.valid");
        wave.change(0, clk, "1");
        wave.change(5, clk, "0");

        let config = TraceConfig::parse(CONFIG).unwrap();
        assert!(matches!(
            Traces::build(&mut wave, &config),
            Err(TraceError::NoRetirements)
        ));
    }

    #[test]
    fn optional_traces_default_to_empty() {
        let mut wave = FakeWaveform::new();
        let clk = wave.declare("TOP.cpu.clk");
        let pc = wave.declare("TOP.cpu.pc");
        let valid = wave.declare("TOP.cpu.valid");
        wave.change(0, clk, "1");
        wave.change(0, pc, "100");
        wave.change(0, valid, "1");
        wave.change(5, clk, "0");

        let config = TraceConfig::parse(CONFIG).unwrap();
        let traces = Traces::build(&mut wave, &config).unwrap();
        assert_eq!(1, traces.cpu.len());
        assert_eq!(0, traces.reg_file.writes().len());
        assert_eq!(0, traces.mem.writes().len());
        assert_eq!(None, traces.mem.value_at(5, 0));
    }

    #[test]
    fn missing_signal_is_fatal() {
        let mut wave = FakeWaveform::new();
        wave.declare("TOP.cpu.clk");
        let config = TraceConfig::parse(CONFIG).unwrap();
        assert!(matches!(
            Traces::build(&mut wave, &config),
            Err(TraceError::Waveform(WaveformError::UnresolvedSignals { .. }))
        ));
    }
}
