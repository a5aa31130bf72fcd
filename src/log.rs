use std::{
    collections::HashMap,
    env::var_os,
    ffi::OsStr,
    fs::File,
    io::{self, Result, Write},
    path::Path,
    sync::{Mutex, MutexGuard},
};

#[derive(Clone)]
struct LogModule {
    name: String,
    level: LogLevel,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum LogLevel {
    LogFatal,
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

pub use LogLevel::*;

struct LogGlobals {
    level_map: HashMap<String, LogLevel>,
    log_modules_cache: HashMap<String, LogModule>,
    log_file: Box<dyn Write + Send>,
    default_level: LogLevel,
}

lazy_static! {
    static ref LOG_GLOBALS: Mutex<LogGlobals> = {
        let (default_level, level_map) = match std::env::var("RDWAVE_LOG") {
            Ok(rdwave_log) => init_log_levels(&rdwave_log),
            Err(_) => (LogWarn, HashMap::new()),
        };

        Mutex::new(LogGlobals {
            level_map,
            log_modules_cache: HashMap::new(),
            log_file: Box::new(io::stderr()),
            default_level,
        })
    };
}

/// Process-wide logging setup. Applied once by `main` before any other
/// component runs.
#[derive(Clone, Debug, Default)]
pub struct LogSettings {
    /// Number of `-v` flags on the command line.
    pub verbosity: u64,
    pub log_file: Option<std::path::PathBuf>,
}

/// Install `settings` on top of whatever `RDWAVE_LOG` requested.
///
/// A `-v` only ever raises the default level; explicit per-module levels from
/// the environment are left alone.
pub fn init_logging(settings: &LogSettings) -> io::Result<()> {
    let mut lock = lock_globals();
    let wanted = match settings.verbosity {
        0 => None,
        1 => Some(LogInfo),
        _ => Some(LogDebug),
    };
    if let Some(level) = wanted {
        if level > lock.default_level {
            lock.default_level = level;
            lock.log_modules_cache.clear();
        }
    }

    let maybe_filename = settings
        .log_file
        .as_ref()
        .map(|p| p.as_os_str().to_owned())
        .or_else(|| var_os("RDWAVE_LOG_FILE"));
    if let Some(filename) = maybe_filename {
        lock.log_file = Box::new(open_log_file(&filename)?);
    }

    Ok(())
}

fn open_log_file(filename: &OsStr) -> io::Result<File> {
    File::create(filename).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("Could not create log file `{:?}': {}", filename, e),
        )
    })
}

fn lock_globals() -> MutexGuard<'static, LogGlobals> {
    // A panic while logging must not silence every later message.
    match LOG_GLOBALS.lock() {
        Ok(lock) => lock,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn log_level_string_to_level(log_level_string: &str) -> LogLevel {
    match log_level_string {
        "fatal" => LogFatal,
        "error" => LogError,
        "warn" => LogWarn,
        "info" => LogInfo,
        "debug" => LogDebug,
        _ => LogWarn,
    }
}

fn init_log_levels(rdwave_log: &str) -> (LogLevel, HashMap<String, LogLevel>) {
    let mut hm: HashMap<String, LogLevel> = HashMap::new();
    let mut default_level = LogWarn;
    for mod_colon_level in rdwave_log.split(',') {
        let res: Vec<&str> = mod_colon_level.splitn(2, ':').collect();
        if res.len() == 2 {
            let mod_name = res[0].trim();
            let log_level_string = res[1].trim();
            if mod_name == "all" {
                default_level = log_level_string_to_level(log_level_string);
            } else {
                hm.insert(
                    mod_name.to_owned(),
                    log_level_string_to_level(log_level_string),
                );
            }
        }
    }
    (default_level, hm)
}

/// Given a module name, what is its log level?
fn get_log_level(module_name: &str, l: &LogGlobals) -> LogLevel {
    // We DONT lowercase here as filenames are usually case sensitive on Linux.
    match l.level_map.get(module_name) {
        Some(log_level) => *log_level,
        None => l.default_level,
    }
}

/// Given a filename what is the corresponding module name?
fn filename_to_module_name(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_owned())
}

/// Given the filename get the corresponding LogModule.
fn get_log_module(filename: &str, l: &mut LogGlobals) -> LogModule {
    if let Some(log_module) = l.log_modules_cache.get(filename) {
        return log_module.to_owned();
    }

    let name = filename_to_module_name(filename);
    let level = get_log_level(&name, l);
    let m = LogModule { level, name };
    l.log_modules_cache.insert(filename.to_owned(), m.clone());
    m
}

fn log_name(level: LogLevel) -> &'static str {
    match level {
        LogFatal => "FATAL",
        LogError => "ERROR",
        LogWarn => "WARN",
        LogInfo => "INFO",
        LogDebug => "DEBUG",
    }
}

/// Collects one log line and writes it, newline terminated, when dropped.
pub struct NewLineTerminatingOstream {
    message: Vec<u8>,
    lock: MutexGuard<'static, LogGlobals>,
}

impl NewLineTerminatingOstream {
    fn new(
        level: LogLevel,
        filename: &str,
        line: u32,
        always_enabled: bool,
    ) -> Option<NewLineTerminatingOstream> {
        let mut lock = lock_globals();
        let m = get_log_module(filename, &mut lock);
        if !(always_enabled || level <= m.level) {
            return None;
        }

        let mut stream = NewLineTerminatingOstream {
            message: Vec::new(),
            lock,
        };
        if level == LogDebug {
            write!(stream, "[{}] ", m.name).unwrap_or(());
        } else {
            write_prefix(&mut stream, level, filename, line);
        }
        Some(stream)
    }
}

/// Low level. Use is_logging!() macro instead.
pub fn is_logging(level: LogLevel, filename: &str) -> bool {
    let mut lock = lock_globals();
    let m = get_log_module(filename, &mut lock);
    level <= m.level
}

impl Drop for NewLineTerminatingOstream {
    fn drop(&mut self) {
        self.message.push(b'\n');
        self.flush().unwrap_or(());
    }
}

impl Write for NewLineTerminatingOstream {
    /// Write the text stored in the `message` member to the log file.
    fn flush(&mut self) -> Result<()> {
        if !self.message.is_empty() {
            self.lock.log_file.write_all(&self.message)?;
            self.lock.log_file.flush()?;
        }
        self.message.clear();
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.message.extend_from_slice(buf);
        Ok(buf.len())
    }
}

pub fn write_prefix(stream: &mut dyn Write, level: LogLevel, filename: &str, line: u32) {
    write!(stream, "[{} {}:{}] ", log_name(level), filename, line).unwrap_or(());
}

/// This is almost always not the method you want. Use log!() macro instead
pub fn log(
    log_level: LogLevel,
    filename: &str,
    line: u32,
    always_enabled: bool,
) -> Option<NewLineTerminatingOstream> {
    NewLineTerminatingOstream::new(log_level, filename, line, always_enabled)
}

/// Outputs to the log file (or stderr if no log file was specified).
/// After this program continues normally.
macro_rules! log {
    ($log_level:expr, $($args:tt)+) => {
        {
            use std::io::Write;
            let maybe_stream = crate::log::log($log_level, file!(), line!(), false);
            if let Some(mut stream) = maybe_stream {
                write!(stream, $($args)+).unwrap_or(());
            }
        }
    };
}

macro_rules! is_logging {
    ($log_level:expr) => {
        crate::log::is_logging($log_level, file!())
    };
}

/// Output to stderr always. No backtrace -- simply exit.
macro_rules! clean_fatal {
    ($($args:tt)+) => {
        {
            use std::io::stderr;
            crate::log::write_prefix(&mut stderr(), crate::log::LogLevel::LogFatal, file!(), line!());
            eprintln!($($args)+);
            std::process::exit(1);
        }
    };
}
