use super::{exit_result::ExitResult, load_trace, rdwave_options::RdwaveOptions, WaveCommand};
use crate::{
    gdb_server::{open_listener, serve_listener},
    log::LogLevel::LogInfo,
    session::ReplaySession,
};
use std::path::PathBuf;

pub struct ServeCommand {
    waveform: PathBuf,
    config: PathBuf,
    host: String,
    port: u16,
    keep_listening: bool,
}

impl ServeCommand {
    pub fn new(options: &RdwaveOptions) -> ServeCommand {
        ServeCommand {
            waveform: options.waveform.clone(),
            config: options.config.clone(),
            host: options.host.clone(),
            port: options.port,
            keep_listening: options.keep_listening,
        }
    }
}

impl WaveCommand for ServeCommand {
    fn run(&mut self) -> ExitResult<()> {
        let loaded = match load_trace(&self.waveform, &self.config) {
            Ok(loaded) => loaded,
            Err(e) => return ExitResult::err_from(e, 1),
        };
        let mut session = match ReplaySession::new(loaded.traces) {
            Ok(session) => session,
            Err(e) => return ExitResult::err_from(e, 1),
        };
        log!(
            LogInfo,
            "Replaying {} retired instructions",
            session.timeline().trace().len()
        );

        let listener = match open_listener(&self.host, self.port) {
            Ok(listener) => listener,
            Err(e) => return ExitResult::err_from(e, 1),
        };
        println!(
            "Listening on {}:{}. Connect with: target remote {}:{}",
            self.host, self.port, self.host, self.port
        );

        match serve_listener(&listener, &mut session, self.keep_listening) {
            Ok(()) => ExitResult::Ok(()),
            Err(e) => ExitResult::err_from(e, 1),
        }
    }
}
