//! Purpose: Hold top-level CLI command dispatch for `extlinks`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: `extract` and `stream` share option handling and output; only the source differs.

use super::*;

pub(super) fn dispatch_command(
    command: Command,
    color_mode: ColorMode,
    cancel: CancelToken,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "extlinks", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output();
            Ok(RunOutcome::ok())
        }
        Command::Extract { path, args } => {
            let ctx = RunContext {
                cmd: "extract",
                source: path.display().to_string(),
                color_mode,
            };
            let extraction = match build_extractor(&args)
                .extract_path(&path, extract_options(&args, &cancel))
            {
                Ok(extraction) => extraction,
                Err(err) => return interrupted_before_start(err, &args, &ctx),
            };
            emit_links(extraction, &args, &ctx)
        }
        Command::Stream {
            uri,
            args,
            tls_ca,
            connect_timeout_ms,
            read_timeout_ms,
        } => {
            let mut streamer = RemoteStreamer::new(build_extractor(&args))
                .with_timeouts(millis(connect_timeout_ms), millis(read_timeout_ms));
            if let Some(path) = tls_ca {
                streamer = streamer.with_tls_ca_file(path)?;
            }
            let ctx = RunContext {
                cmd: "stream",
                source: uri.clone(),
                color_mode,
            };
            let extraction = match streamer.stream(&uri, extract_options(&args, &cancel)) {
                Ok(extraction) => extraction,
                Err(err) => return interrupted_before_start(err, &args, &ctx),
            };
            emit_links(extraction, &args, &ctx)
        }
    }
}
