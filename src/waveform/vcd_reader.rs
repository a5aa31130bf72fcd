use super::{HierarchyEntry, SignalHandle, WaveformError, WaveformInfo, WaveformReader};
use crate::log::LogLevel::LogInfo;
use std::{
    collections::{HashMap, HashSet},
    fmt::Write,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};
use vcd::{Command, Header, IdCode, Parser, ScopeItem, SimulationCommand};

/// Reads Value Change Dump files. Every pass over the value changes re-reads
/// the file from the start, so memory use does not grow with the dump size.
pub struct VcdReader {
    path: PathBuf,
    header: Header,
    /// Handles are handed out in declaration order. Aliased variables (same
    /// id code declared twice) share a handle.
    handles: HashMap<IdCode, SignalHandle>,
}

impl VcdReader {
    pub fn open(path: &Path) -> Result<VcdReader, WaveformError> {
        let mut parser = Self::parser(path)?;
        let header = parser.parse_header().map_err(|e| WaveformError::Open {
            path: path.to_owned(),
            source: e,
        })?;

        let mut handles = HashMap::new();
        assign_vcd_handles(&header.items, &mut handles);
        log!(
            LogInfo,
            "Opened waveform {:?}: {} distinct signals",
            path,
            handles.len()
        );

        Ok(VcdReader {
            path: path.to_owned(),
            header,
            handles,
        })
    }

    fn parser(path: &Path) -> Result<Parser<BufReader<File>>, WaveformError> {
        let f = File::open(path).map_err(|e| WaveformError::Open {
            path: path.to_owned(),
            source: e,
        })?;
        Ok(Parser::new(BufReader::with_capacity(65536, f)))
    }

    /// Walk every command after the header, tracking the current time.
    fn for_each_change(
        &self,
        mut visit: impl FnMut(u64, &Command) -> Result<(), WaveformError>,
    ) -> Result<(), WaveformError> {
        let mut parser = Self::parser(&self.path)?;
        parser.parse_header()?;
        let mut time = 0;
        for maybe_command in parser {
            let command = maybe_command?;
            if let Command::Timestamp(t) = command {
                time = t;
            }
            visit(time, &command)?;
        }
        Ok(())
    }
}

fn assign_vcd_handles(items: &[ScopeItem], handles: &mut HashMap<IdCode, SignalHandle>) {
    for item in items {
        match item {
            ScopeItem::Scope(scope) => assign_vcd_handles(&scope.items, handles),
            ScopeItem::Var(var) => {
                let next = handles.len() as SignalHandle;
                handles.entry(var.code).or_insert(next);
            }
            _ => (),
        }
    }
}

fn count_scopes(items: &[ScopeItem]) -> u64 {
    items
        .iter()
        .map(|item| match item {
            ScopeItem::Scope(scope) => 1 + count_scopes(&scope.items),
            _ => 0,
        })
        .sum()
}

fn count_vars(items: &[ScopeItem]) -> u64 {
    items
        .iter()
        .map(|item| match item {
            ScopeItem::Scope(scope) => count_vars(&scope.items),
            ScopeItem::Var(_) => 1,
            _ => 0,
        })
        .sum()
}

impl WaveformReader for VcdReader {
    fn info(&mut self) -> Result<WaveformInfo, WaveformError> {
        let mut start_time: Option<u64> = None;
        let mut end_time = 0;
        let mut dump_activity_changes = 0;
        self.for_each_change(|time, command| {
            match command {
                Command::Timestamp(t) => {
                    start_time.get_or_insert(*t);
                    end_time = *t;
                }
                Command::Begin(SimulationCommand::Dumpoff)
                | Command::Begin(SimulationCommand::Dumpon) => {
                    log!(LogInfo, "Dump activity change at time {}", time);
                    dump_activity_changes += 1;
                }
                _ => (),
            }
            Ok(())
        })?;

        let timescale = match &self.header.timescale {
            Some((n, unit)) => format!("{}{}", n, unit),
            None => String::new(),
        };
        Ok(WaveformInfo {
            version: self.header.version.clone().unwrap_or_default().trim().into(),
            date: self.header.date.clone().unwrap_or_default().trim().into(),
            timescale,
            start_time: start_time.unwrap_or(0),
            end_time,
            var_count: count_vars(&self.header.items),
            scope_count: count_scopes(&self.header.items),
            dump_activity_changes,
        })
    }

    fn read_hierarchy(
        &mut self,
        visit: &mut dyn FnMut(HierarchyEntry<'_>),
    ) -> Result<(), WaveformError> {
        fn walk(
            items: &[ScopeItem],
            handles: &HashMap<IdCode, SignalHandle>,
            visit: &mut dyn FnMut(HierarchyEntry<'_>),
        ) {
            for item in items {
                match item {
                    ScopeItem::Scope(scope) => {
                        visit(HierarchyEntry::Scope(&scope.identifier));
                        walk(&scope.items, handles, visit);
                        visit(HierarchyEntry::UpScope);
                    }
                    ScopeItem::Var(var) => {
                        if let Some(handle) = handles.get(&var.code) {
                            visit(HierarchyEntry::Var {
                                name: &var.reference,
                                handle: *handle,
                            });
                        }
                    }
                    _ => (),
                }
            }
        }

        walk(&self.header.items, &self.handles, visit);
        Ok(())
    }

    fn read_value_changes(
        &mut self,
        handles: &[SignalHandle],
        visit: &mut dyn FnMut(u64, SignalHandle, &str),
    ) -> Result<(), WaveformError> {
        let wanted: HashSet<SignalHandle> = handles.iter().copied().collect();
        let mut text = String::new();
        self.for_each_change(|time, command| {
            let (code, handle) = match command {
                Command::ChangeScalar(code, _) | Command::ChangeVector(code, _) => {
                    match self.handles.get(code) {
                        Some(h) if wanted.contains(h) => (code, *h),
                        _ => return Ok(()),
                    }
                }
                Command::Begin(SimulationCommand::Dumpoff) => {
                    return Err(WaveformError::BlackoutRegion { time });
                }
                _ => return Ok(()),
            };

            text.clear();
            match command {
                Command::ChangeScalar(_, value) => {
                    write!(text, "{}", value).unwrap_or(());
                }
                Command::ChangeVector(_, bits) => {
                    for value in bits.iter() {
                        write!(text, "{}", value).unwrap_or(());
                    }
                }
                _ => (),
            }
            log!(
                crate::log::LogLevel::LogDebug,
                "@{} {} ({}) = {}",
                time,
                code,
                handle,
                text
            );
            visit(time, handle, &text);
            Ok(())
        })
    }
}
