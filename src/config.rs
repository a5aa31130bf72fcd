//! The signal configuration file: which waveform signals play which role.

use crate::waveform::SignalRef;
use regex::Regex;
use serde::Serialize;
use std::{collections::HashMap, fs, io, path::Path, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file `{path:?}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("line {line}: expected `key=value'")]
    Malformed { line: usize },
    #[error("line {line}: unknown key `{key}'")]
    UnknownKey { line: usize, key: String },
    #[error("line {line}: duplicate key `{key}'")]
    DuplicateKey { line: usize, key: String },
    #[error("line {line}: `{value}' is not a valid address")]
    BadAddress { line: usize, value: String },
    #[error("missing required key `{key}'")]
    MissingKey { key: &'static str },
    #[error("incomplete {group} signal group, missing: {}", .missing.join(", "))]
    PartialGroup {
        group: &'static str,
        missing: Vec<&'static str>,
    },
}

const CPU_KEYS: [&str; 3] = ["cpuClk", "retiredPc", "retiredPcValid"];
const REG_FILE_KEYS: [&str; 3] = ["regFileWriteValid", "regFileWriteAddr", "regFileWriteData"];
const MEM_KEYS: [&str; 8] = [
    "memCmdValid",
    "memCmdReady",
    "memCmdAddr",
    "memCmdSize",
    "memCmdWr",
    "memCmdWrData",
    "memRspValid",
    "memRspRdData",
];
const MEM_INIT_FILE: &str = "memInitFile";
const MEM_INIT_START_ADDR: &str = "memInitStartAddr";

lazy_static! {
    static ref KEY_VALUE: Regex = Regex::new(r"^([A-Za-z][A-Za-z0-9_]*)\s*=\s*(\S.*)$").unwrap();
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuSignals {
    pub clk: SignalRef,
    pub retired_pc: SignalRef,
    pub retired_pc_valid: SignalRef,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegFileSignals {
    pub write_valid: SignalRef,
    pub write_addr: SignalRef,
    pub write_data: SignalRef,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemSignals {
    pub cmd_valid: SignalRef,
    pub cmd_ready: SignalRef,
    pub cmd_addr: SignalRef,
    pub cmd_size: SignalRef,
    pub cmd_wr: SignalRef,
    pub cmd_wr_data: SignalRef,
    pub rsp_valid: SignalRef,
    pub rsp_rd_data: SignalRef,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceConfig {
    pub cpu: CpuSignals,
    /// `None` when the register-file group is absent. All GPRs then read 0.
    pub reg_file: Option<RegFileSignals>,
    pub mem: Option<MemSignals>,
    pub mem_init_file: Option<PathBuf>,
    pub mem_init_start_addr: u64,
}

/// Raw `key -> (value, line)` table, before grouping.
struct Entries(HashMap<&'static str, (String, usize)>);

impl Entries {
    fn signal(&self, key: &'static str) -> Option<SignalRef> {
        self.0.get(key).map(|(v, _)| SignalRef::from_path(v))
    }

    fn required(&self, key: &'static str) -> Result<SignalRef, ConfigError> {
        self.signal(key).ok_or(ConfigError::MissingKey { key })
    }

    /// True when all of `keys` are present, false when none are. Anything in
    /// between is an error.
    fn group(&self, group: &'static str, keys: &[&'static str]) -> Result<bool, ConfigError> {
        let missing: Vec<&'static str> = keys
            .iter()
            .copied()
            .filter(|k| !self.0.contains_key(k))
            .collect();
        if missing.len() == keys.len() {
            return Ok(false);
        }
        if !missing.is_empty() {
            return Err(ConfigError::PartialGroup { group, missing });
        }
        Ok(true)
    }
}

fn known_key(key: &str) -> Option<&'static str> {
    CPU_KEYS
        .iter()
        .chain(REG_FILE_KEYS.iter())
        .chain(MEM_KEYS.iter())
        .chain([MEM_INIT_FILE, MEM_INIT_START_ADDR].iter())
        .copied()
        .find(|k| *k == key)
}

/// Accepts `0x`-prefixed hex or plain decimal.
pub fn parse_address(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u64>().ok()
    }
}

impl TraceConfig {
    pub fn load(path: &Path) -> Result<TraceConfig, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_owned(),
            source: e,
        })?;
        TraceConfig::parse(&text)
    }

    pub fn parse(text: &str) -> Result<TraceConfig, ConfigError> {
        let mut entries = Entries(HashMap::new());
        for (i, raw) in text.lines().enumerate() {
            let line = i + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let caps = KEY_VALUE
                .captures(trimmed)
                .ok_or(ConfigError::Malformed { line })?;
            let key = &caps[1];
            let value = caps[2].trim();
            let known = known_key(key).ok_or_else(|| ConfigError::UnknownKey {
                line,
                key: key.to_owned(),
            })?;
            if entries.0.contains_key(known) {
                return Err(ConfigError::DuplicateKey {
                    line,
                    key: key.to_owned(),
                });
            }
            entries.0.insert(known, (value.to_owned(), line));
        }

        let cpu = CpuSignals {
            clk: entries.required("cpuClk")?,
            retired_pc: entries.required("retiredPc")?,
            retired_pc_valid: entries.required("retiredPcValid")?,
        };

        let reg_file = if entries.group("register file", &REG_FILE_KEYS)? {
            Some(RegFileSignals {
                write_valid: entries.required("regFileWriteValid")?,
                write_addr: entries.required("regFileWriteAddr")?,
                write_data: entries.required("regFileWriteData")?,
            })
        } else {
            None
        };

        let mem = if entries.group("memory", &MEM_KEYS)? {
            Some(MemSignals {
                cmd_valid: entries.required("memCmdValid")?,
                cmd_ready: entries.required("memCmdReady")?,
                cmd_addr: entries.required("memCmdAddr")?,
                cmd_size: entries.required("memCmdSize")?,
                cmd_wr: entries.required("memCmdWr")?,
                cmd_wr_data: entries.required("memCmdWrData")?,
                rsp_valid: entries.required("memRspValid")?,
                rsp_rd_data: entries.required("memRspRdData")?,
            })
        } else {
            None
        };

        let mem_init_file = entries.0.get(MEM_INIT_FILE).map(|(v, _)| PathBuf::from(v));
        let mem_init_start_addr = match entries.0.get(MEM_INIT_START_ADDR) {
            Some((v, line)) => parse_address(v).ok_or_else(|| ConfigError::BadAddress {
                line: *line,
                value: v.clone(),
            })?,
            None => 0,
        };

        Ok(TraceConfig {
            cpu,
            reg_file,
            mem,
            mem_init_file,
            mem_init_start_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPU: &str = "cpuClk = TOP.top.u_vex.cpu.clk
retiredPc=TOP.top.u_vex.cpu.lastStagePc
retiredPcValid=TOP.top.u_vex.cpu.lastStageIsValid
";

    #[test]
    fn minimal_config() {
        let text = format!("# signals\n\n{}", CPU);
        let config = TraceConfig::parse(&text).unwrap();
        assert_eq!("TOP.top.u_vex.cpu", config.cpu.clk.scope);
        assert_eq!("clk", config.cpu.clk.name);
        assert_eq!("lastStageIsValid", config.cpu.retired_pc_valid.name);
        assert!(config.reg_file.is_none());
        assert!(config.mem.is_none());
        assert_eq!(0, config.mem_init_start_addr);
    }

    #[test]
    fn full_groups() {
        let text = format!(
            "{}regFileWriteValid=t.rf.valid
regFileWriteAddr=t.rf.addr
regFileWriteData=t.rf.data
memCmdValid=t.m.cmd_valid
memCmdReady=t.m.cmd_ready
memCmdAddr=t.m.cmd_addr
memCmdSize=t.m.cmd_size
memCmdWr=t.m.cmd_wr
memCmdWrData=t.m.cmd_wdata
memRspValid=t.m.rsp_valid
memRspRdData=t.m.rsp_rdata
memInitFile=  /tmp/image.bin
memInitStartAddr=0x80000000
",
            CPU
        );
        let config = TraceConfig::parse(&text).unwrap();
        let rf = config.reg_file.unwrap();
        assert_eq!("valid", rf.write_valid.name);
        assert_eq!("addr", rf.write_addr.name);
        assert_eq!("data", rf.write_data.name);
        let mem = config.mem.unwrap();
        assert_eq!("cmd_size", mem.cmd_size.name);
        assert_eq!("cmd_wdata", mem.cmd_wr_data.name);
        assert_eq!("rsp_rdata", mem.rsp_rd_data.name);
        assert_eq!(Some(PathBuf::from("/tmp/image.bin")), config.mem_init_file);
        assert_eq!(0x8000_0000, config.mem_init_start_addr);
    }

    #[test]
    fn errors_carry_line_numbers() {
        let text = format!("{}\nthis is not a pair\n", CPU);
        assert!(matches!(
            TraceConfig::parse(&text),
            Err(ConfigError::Malformed { line: 5 })
        ));

        let text = format!("{}frobnicate=1\n", CPU);
        assert!(matches!(
            TraceConfig::parse(&text),
            Err(ConfigError::UnknownKey { line: 4, .. })
        ));

        let text = format!("{}cpuClk=a.b\n", CPU);
        assert!(matches!(
            TraceConfig::parse(&text),
            Err(ConfigError::DuplicateKey { line: 4, .. })
        ));

        let text = format!("{}memInitStartAddr=0xZZ\n", CPU);
        assert!(matches!(
            TraceConfig::parse(&text),
            Err(ConfigError::BadAddress { line: 4, .. })
        ));
    }

    #[test]
    fn missing_and_partial() {
        assert!(matches!(
            TraceConfig::parse("cpuClk=a.clk\nretiredPc=a.pc\n"),
            Err(ConfigError::MissingKey {
                key: "retiredPcValid"
            })
        ));

        let text = format!("{}regFileWriteValid=t.rf.valid\n", CPU);
        match TraceConfig::parse(&text) {
            Err(ConfigError::PartialGroup { missing, .. }) => {
                assert_eq!(vec!["regFileWriteAddr", "regFileWriteData"], missing)
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn addresses() {
        assert_eq!(Some(0x1000), parse_address("0x1000"));
        assert_eq!(Some(4096), parse_address("4096"));
        assert_eq!(None, parse_address("0x"));
        assert_eq!(None, parse_address("-1"));
    }
}
