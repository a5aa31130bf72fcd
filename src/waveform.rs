//! Access to a recorded waveform: the reader interface, signal resolution and
//! the decoder that turns textual bit-vector changes into integers.

use crate::log::LogLevel::{LogDebug, LogError, LogInfo};
use serde::Serialize;
use std::{collections::HashMap, fmt, io, path::PathBuf};
use thiserror::Error;

pub mod vcd_reader;

/// Opaque identifier the reader hands out for a declared variable.
pub type SignalHandle = u64;

#[derive(Debug, Error)]
pub enum WaveformError {
    #[error("Could not open waveform `{path:?}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Error while reading waveform: {0}")]
    Read(#[from] io::Error),
    #[error("Waveform contains blackout regions (dump activity changes at time {time}). These are not supported.")]
    BlackoutRegion { time: u64 },
    #[error("Not all signals found: {}", format_missing(.missing))]
    UnresolvedSignals { missing: Vec<SignalRef> },
}

fn format_missing(missing: &[SignalRef]) -> String {
    missing
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<String>>()
        .join(", ")
}

/// One traced signal, named by its hierarchical scope and local name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SignalRef {
    pub scope: String,
    pub name: String,
    #[serde(skip)]
    handle: Option<SignalHandle>,
}

impl SignalRef {
    pub fn new(scope: &str, name: &str) -> SignalRef {
        SignalRef {
            scope: scope.to_owned(),
            name: name.to_owned(),
            handle: None,
        }
    }

    /// Split `TOP.top.cpu.clk` into scope `TOP.top.cpu` and name `clk`.
    pub fn from_path(full_path: &str) -> SignalRef {
        match full_path.rfind('.') {
            Some(last_dot) => SignalRef::new(&full_path[..last_dot], &full_path[last_dot + 1..]),
            None => SignalRef::new("", full_path),
        }
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<SignalHandle> {
        self.handle
    }
}

impl fmt::Display for SignalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.scope, self.name)
    }
}

/// An event produced while walking the declarations of a waveform.
#[derive(Copy, Clone, Debug)]
pub enum HierarchyEntry<'a> {
    Scope(&'a str),
    UpScope,
    Var { name: &'a str, handle: SignalHandle },
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveformInfo {
    pub version: String,
    pub date: String,
    pub timescale: String,
    pub start_time: u64,
    pub end_time: u64,
    pub var_count: u64,
    pub scope_count: u64,
    pub dump_activity_changes: u64,
}

/// The waveform container. Implementations decode one specific file format.
pub trait WaveformReader {
    fn info(&mut self) -> Result<WaveformInfo, WaveformError>;

    /// Walk every scope and variable declaration in file order.
    fn read_hierarchy(
        &mut self,
        visit: &mut dyn FnMut(HierarchyEntry<'_>),
    ) -> Result<(), WaveformError>;

    /// Deliver every recorded change of the signals in `handles`, in time
    /// order, as a textual bit vector like `"x01z"`.
    fn read_value_changes(
        &mut self,
        handles: &[SignalHandle],
        visit: &mut dyn FnMut(u64, SignalHandle, &str),
    ) -> Result<(), WaveformError>;
}

/// Resolve the handle of every signal in `signals`.
///
/// Fails if any signal is still unresolved after the full hierarchy walk. Each
/// missing signal is logged.
pub fn assign_handles(
    reader: &mut dyn WaveformReader,
    signals: &mut [&mut SignalRef],
) -> Result<(), WaveformError> {
    let mut wanted: HashMap<(String, String), Vec<usize>> = HashMap::new();
    for (i, s) in signals.iter().enumerate() {
        wanted
            .entry((s.scope.clone(), s.name.clone()))
            .or_default()
            .push(i);
    }

    let mut found: Vec<(usize, SignalHandle)> = Vec::new();
    let mut scope_stack: Vec<String> = Vec::new();
    reader.read_hierarchy(&mut |entry| match entry {
        HierarchyEntry::Scope(name) => scope_stack.push(name.to_owned()),
        HierarchyEntry::UpScope => {
            scope_stack.pop();
        }
        HierarchyEntry::Var { name, handle } => {
            let key = (scope_stack.join("."), name.to_owned());
            if let Some(indices) = wanted.get(&key) {
                found.extend(indices.iter().map(|&i| (i, handle)));
            }
        }
    })?;

    for (i, handle) in found {
        // The first declaration wins when a name is declared twice in a scope.
        if signals[i].handle.is_none() {
            signals[i].handle = Some(handle);
        }
    }

    let missing: Vec<SignalRef> = signals
        .iter()
        .filter(|s| !s.has_handle())
        .map(|s| (**s).clone())
        .collect();
    if !missing.is_empty() {
        for sig in &missing {
            log!(LogError, "Signal not found: {}. {}", sig.scope, sig.name);
        }
        return Err(WaveformError::UnresolvedSignals { missing });
    }

    for s in signals.iter() {
        log!(LogDebug, "{} -> handle {:?}", s, s.handle);
    }
    Ok(())
}

/// Parse a textual bit vector as base 2.
///
/// Returns `None` when any bit is unknown (`x`), high impedance (`z`) or
/// otherwise not a plain `0`/`1`: undefined simulation values never reach a
/// trace. Only the low 64 bits of wider vectors are kept.
pub fn parse_bit_vector(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b == b'0' || b == b'1') {
        return None;
    }
    let low_bits = if value.len() > 64 {
        &value[value.len() - 64..]
    } else {
        value
    };
    u64::from_str_radix(low_bits, 2).ok()
}

/// Receives decoded value changes for the signals it registered, tagged with
/// the role each signal plays for it.
pub trait ValueChangeHandler {
    type Role: Copy + fmt::Debug;

    fn value_changed(&mut self, time: u64, role: Self::Role, value: u64);
}

/// Resolve `signals`, then stream their valid value changes into `handler`.
pub fn decode<H: ValueChangeHandler>(
    reader: &mut dyn WaveformReader,
    signals: &mut [(SignalRef, H::Role)],
    handler: &mut H,
) -> Result<(), WaveformError> {
    {
        let mut refs: Vec<&mut SignalRef> = signals.iter_mut().map(|(s, _)| s).collect();
        assign_handles(reader, &mut refs)?;
    }

    let mut roles: HashMap<SignalHandle, Vec<H::Role>> = HashMap::new();
    for (sig, role) in signals.iter() {
        if let Some(handle) = sig.handle() {
            roles.entry(handle).or_default().push(*role);
        }
    }
    let mut handles: Vec<SignalHandle> = roles.keys().copied().collect();
    handles.sort_unstable();

    let mut skipped: u64 = 0;
    reader.read_value_changes(&handles, &mut |time, handle, text| {
        let value = match parse_bit_vector(text) {
            Some(v) => v,
            None => {
                skipped += 1;
                return;
            }
        };
        if let Some(handle_roles) = roles.get(&handle) {
            for role in handle_roles {
                handler.value_changed(time, *role, value);
            }
        }
    })?;

    if skipped > 0 {
        log!(LogInfo, "Skipped {} value changes with undefined bits", skipped);
    }
    Ok(())
}

#[cfg(test)]
pub mod test_util {
    use super::*;

    /// In-memory waveform: a hierarchy plus a time-ordered list of changes.
    #[derive(Default)]
    pub struct FakeWaveform {
        hierarchy: Vec<FakeEntry>,
        changes: Vec<(u64, SignalHandle, String)>,
        next_handle: SignalHandle,
        pub blackout_at: Option<u64>,
    }

    enum FakeEntry {
        Scope(String),
        UpScope,
        Var(String, SignalHandle),
    }

    impl FakeWaveform {
        pub fn new() -> FakeWaveform {
            FakeWaveform {
                next_handle: 1,
                ..Default::default()
            }
        }

        /// Declare `path` (dot separated) and return its handle. Each call
        /// opens and closes the scopes it needs.
        pub fn declare(&mut self, path: &str) -> SignalHandle {
            let sig = SignalRef::from_path(path);
            let scopes: Vec<&str> = sig.scope.split('.').filter(|s| !s.is_empty()).collect();
            for s in &scopes {
                self.hierarchy.push(FakeEntry::Scope((*s).to_owned()));
            }
            let handle = self.next_handle;
            self.next_handle += 1;
            self.hierarchy.push(FakeEntry::Var(sig.name.clone(), handle));
            for _ in &scopes {
                self.hierarchy.push(FakeEntry::UpScope);
            }
            handle
        }

        pub fn change(&mut self, time: u64, handle: SignalHandle, value: &str) {
            self.changes.push((time, handle, value.to_owned()));
        }
    }

    impl WaveformReader for FakeWaveform {
        fn info(&mut self) -> Result<WaveformInfo, WaveformError> {
            Ok(WaveformInfo {
                version: "fake".into(),
                start_time: self.changes.first().map_or(0, |c| c.0),
                end_time: self.changes.last().map_or(0, |c| c.0),
                var_count: self.next_handle - 1,
                dump_activity_changes: self.blackout_at.map_or(0, |_| 1),
                ..Default::default()
            })
        }

        fn read_hierarchy(
            &mut self,
            visit: &mut dyn FnMut(HierarchyEntry<'_>),
        ) -> Result<(), WaveformError> {
            for e in &self.hierarchy {
                match e {
                    FakeEntry::Scope(name) => visit(HierarchyEntry::Scope(name)),
                    FakeEntry::UpScope => visit(HierarchyEntry::UpScope),
                    FakeEntry::Var(name, handle) => visit(HierarchyEntry::Var {
                        name,
                        handle: *handle,
                    }),
                }
            }
            Ok(())
        }

        fn read_value_changes(
            &mut self,
            handles: &[SignalHandle],
            visit: &mut dyn FnMut(u64, SignalHandle, &str),
        ) -> Result<(), WaveformError> {
            if let Some(time) = self.blackout_at {
                return Err(WaveformError::BlackoutRegion { time });
            }
            for (time, handle, value) in &self.changes {
                if handles.contains(handle) {
                    visit(*time, *handle, value);
                }
            }
            Ok(())
        }
    }
}
