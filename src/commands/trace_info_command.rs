use super::{exit_result::ExitResult, load_trace, rdwave_options::RdwaveOptions, WaveCommand};
use crate::{
    config::TraceConfig,
    trace::Traces,
    waveform::{WaveformInfo, WaveformReader},
};
use serde::Serialize;
use std::path::PathBuf;

pub struct TraceInfoCommand {
    waveform: PathBuf,
    config: PathBuf,
}

impl TraceInfoCommand {
    pub fn new(options: &RdwaveOptions) -> TraceInfoCommand {
        TraceInfoCommand {
            waveform: options.waveform.clone(),
            config: options.config.clone(),
        }
    }
}

#[derive(Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceCounts {
    retired_insns: usize,
    reg_file_writes: usize,
    mem_writes: usize,
    mem_init_bytes: usize,
    first_pc: Option<u64>,
    last_pc: Option<u64>,
    first_time: Option<u64>,
    last_time: Option<u64>,
}

impl TraceCounts {
    fn of(traces: &Traces) -> TraceCounts {
        let insns = traces.cpu.insns();
        TraceCounts {
            retired_insns: insns.len(),
            reg_file_writes: traces.reg_file.writes().len(),
            mem_writes: traces.mem.writes().len(),
            mem_init_bytes: traces.mem.init().map_or(0, |init| init.contents.len()),
            first_pc: insns.first().map(|i| i.pc),
            last_pc: insns.last().map(|i| i.pc),
            first_time: insns.first().map(|i| i.time),
            last_time: insns.last().map(|i| i.time),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceSummary<'a> {
    waveform: WaveformInfo,
    config: &'a TraceConfig,
    traces: TraceCounts,
}

impl WaveCommand for TraceInfoCommand {
    fn run(&mut self) -> ExitResult<()> {
        let mut loaded = match load_trace(&self.waveform, &self.config) {
            Ok(loaded) => loaded,
            Err(e) => return ExitResult::err_from(e, 1),
        };
        let waveform = match loaded.reader.info() {
            Ok(info) => info,
            Err(e) => return ExitResult::err_from(e, 1),
        };
        let summary = TraceSummary {
            waveform,
            config: &loaded.config,
            traces: TraceCounts::of(&loaded.traces),
        };

        match serde_json::to_string(&summary) {
            Ok(serialized) => {
                println!("{}", serialized);
                ExitResult::Ok(())
            }
            Err(e) => ExitResult::err_from(e, 1),
        }
    }
}
