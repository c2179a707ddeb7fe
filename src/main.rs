//! Purpose: `extlinks` CLI entry point.
//! Role: Binary crate root; parses args, installs logging and interrupt handling, runs commands.
//! Invariants: stdout carries only extracted values (or version/completion output).
//! Invariants: Errors are emitted as text on a TTY stderr and as JSON otherwise.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Interrupts cancel cooperatively; a second interrupt exits immediately.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use extlinks::api::{
    CancelToken, Compression, Error, ErrorKind, ExtractOptions, Extraction, Extractor, Link,
    RemoteStreamer, Schema, to_exit_code,
};
use extlinks::notice::{Notice, NoticeKind};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel).map_err(|err| (err, color_mode))?;

    command_dispatch::dispatch_command(cli.command, color_mode, cancel)
        .map_err(add_malformed_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "extlinks",
    version,
    about = "Stream URLs out of MediaWiki externallinks SQL dumps",
    long_about = None,
    before_help = r#"Reads `INSERT INTO `externallinks` VALUES ...` lines and prints one URL per tuple,
numbered from 0 across the whole dump. No database is involved."#,
    after_help = r#"EXAMPLES
  $ extlinks extract enwiki-latest-externallinks.sql.gz
  $ extlinks extract dump.sql.gz --offset 250000 --format url
  $ extlinks stream https://dumps.wikimedia.org/enwiki/latest/enwiki-latest-externallinks.sql.gz --limit 10

Interrupted runs print the offset to resume from on stderr."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum CompressionCli {
    Auto,
    Gzip,
    None,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// {"index":N,"url":"..."}
    Jsonl,
    /// index<TAB>url
    Tsv,
    /// url only
    Url,
}

#[derive(Args, Clone, Debug)]
struct ExtractArgs {
    #[arg(
        long,
        default_value_t = 0,
        allow_negative_numbers = true,
        help = "Global index of the first URL to print (negative means 0)"
    )]
    offset: i64,
    #[arg(long, help = "Stop after printing this many URLs")]
    limit: Option<u64>,
    #[arg(
        long,
        default_value = "1.29",
        value_parser = parse_schema,
        help = "externallinks schema version of the dump"
    )]
    schema: Schema,
    #[arg(long, value_enum, default_value = "auto", help = "Dump compression")]
    compression: CompressionCli,
    #[arg(long, value_enum, default_value = "jsonl", help = "Output line format")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Extract URLs from a local dump file",
        after_help = r#"EXAMPLES
  $ extlinks extract enwiki-20240601-externallinks.sql.gz
  $ extlinks extract externallinks.sql --compression none --offset 2"#
    )]
    Extract {
        #[arg(
            value_hint = ValueHint::FilePath,
            help = "Path to an externallinks .sql.gz (or plain .sql) dump"
        )]
        path: PathBuf,
        #[command(flatten)]
        args: ExtractArgs,
    },
    #[command(
        arg_required_else_help = true,
        about = "Extract URLs from a dump served over HTTP(S)",
        long_about = r#"Fetch a dump over HTTP(S) and extract URLs while it downloads.

Transfers are not retried. If one fails, re-run with the --offset printed in the error hint."#
    )]
    Stream {
        #[arg(value_hint = ValueHint::Url, help = "http(s) URI of an externallinks dump")]
        uri: String,
        #[command(flatten)]
        args: ExtractArgs,
        #[arg(
            long,
            value_hint = ValueHint::FilePath,
            help = "PEM file with CA certificates to trust instead of the system roots"
        )]
        tls_ca: Option<PathBuf>,
        #[arg(long, default_value_t = 30_000, help = "Connect timeout in milliseconds")]
        connect_timeout_ms: u64,
        #[arg(long, default_value_t = 300_000, help = "Per-read timeout in milliseconds")]
        read_timeout_ms: u64,
    },
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Print version")]
    Version,
}

fn parse_schema(input: &str) -> Result<Schema, String> {
    input.parse::<Schema>().map_err(|err| {
        let mut message = error_message(&err);
        if let Some(hint) = err.hint() {
            message.push_str(". ");
            message.push_str(hint);
        }
        message
    })
}

fn compression_from_cli(compression: CompressionCli) -> Compression {
    match compression {
        CompressionCli::Auto => Compression::Auto,
        CompressionCli::Gzip => Compression::Gzip,
        CompressionCli::None => Compression::None,
    }
}

fn build_extractor(args: &ExtractArgs) -> Extractor {
    Extractor::new(args.schema).with_compression(compression_from_cli(args.compression))
}

fn extract_options(args: &ExtractArgs, cancel: &CancelToken) -> ExtractOptions {
    ExtractOptions::new()
        .with_offset(args.offset)
        .with_cancel(cancel.clone())
}

fn millis(value: u64) -> Option<Duration> {
    Some(Duration::from_millis(value))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn install_interrupt_handler(cancel: &CancelToken) -> Result<(), Error> {
    for &signal in signal_hook::consts::TERM_SIGNALS {
        // Registered first so that a repeated signal, arriving after the flag is set, exits.
        signal_hook::flag::register_conditional_shutdown(
            signal,
            to_exit_code(ErrorKind::Cancelled),
            cancel.flag(),
        )
        .and_then(|_| signal_hook::flag::register(signal, cancel.flag()))
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to install interrupt handler")
                .with_source(err)
        })?;
    }
    Ok(())
}

struct RunContext<'a> {
    cmd: &'a str,
    source: String,
    color_mode: ColorMode,
}

fn emit_links(
    mut extraction: Extraction,
    args: &ExtractArgs,
    ctx: &RunContext<'_>,
) -> Result<RunOutcome, Error> {
    let stdout = io::stdout();
    let flush_each = stdout.is_terminal();
    let mut out = BufWriter::new(stdout.lock());
    let mut emitted = 0u64;

    while args.limit.is_none_or(|limit| emitted < limit) {
        let link = match extraction.next() {
            None => break,
            Some(Ok(link)) => link,
            Some(Err(err)) if err.kind() == ErrorKind::Cancelled => {
                let _ = out.flush();
                let resume = err.index().unwrap_or_else(|| extraction.next_index());
                return Ok(interrupted(ctx, resume));
            }
            Some(Err(err)) => {
                let _ = out.flush();
                return Err(add_resume_hint(err, extraction.next_index()));
            }
        };
        match write_link(&mut out, &link, args.format, flush_each) {
            Ok(()) => emitted += 1,
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => return Ok(RunOutcome::ok()),
            Err(err) => return Err(output_error(err)),
        }
    }

    match out.flush() {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => return Ok(RunOutcome::ok()),
        Err(err) => return Err(output_error(err)),
    }
    tracing::info!(
        emitted,
        next_index = extraction.next_index(),
        "extraction finished"
    );
    if emitted == 0 && args.offset > 0 && extraction.is_finished() {
        let kind = NoticeKind::Empty {
            offset: start_offset(args),
        };
        emit_notice(&Notice::new(kind, ctx.cmd, ctx.source.as_str()), ctx.color_mode);
    }
    Ok(RunOutcome::ok())
}

fn write_link(
    out: &mut impl Write,
    link: &Link,
    format: OutputFormat,
    flush: bool,
) -> io::Result<()> {
    match format {
        OutputFormat::Jsonl => {
            serde_json::to_writer(&mut *out, link)?;
            out.write_all(b"\n")?;
        }
        OutputFormat::Tsv => writeln!(out, "{}\t{}", link.index, link.url)?,
        OutputFormat::Url => writeln!(out, "{}", link.url)?,
    }
    if flush {
        out.flush()?;
    }
    Ok(())
}

fn output_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write output")
        .with_source(err)
}

fn add_resume_hint(err: Error, resume: u64) -> Error {
    if err.kind() != ErrorKind::Io || err.hint().is_some() {
        return err;
    }
    err.with_hint(format!(
        "The transfer was interrupted. Re-run with --offset {resume} to continue where it stopped."
    ))
}

fn add_malformed_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Malformed || err.hint().is_some() {
        return err;
    }
    err.with_hint("The dump does not match the selected --schema layout, or it is truncated.")
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => err.with_hint("Permission denied. Check file permissions or credentials."),
        ErrorKind::NotFound => err.with_hint("Check the path or URI; dump file names change with each dump date."),
        ErrorKind::Io => err.with_hint("I/O error. Check the path, network connection, and --compression setting."),
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_BACKTRACE=1 and share command/context if it persists.",
    )
}

fn emit_version_output() {
    if io::stdout().is_terminal() {
        println!("extlinks {}", env!("CARGO_PKG_VERSION"));
    } else {
        let value = json!({
            "name": "extlinks",
            "version": env!("CARGO_PKG_VERSION"),
        });
        println!("{value}");
    }
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn start_offset(args: &ExtractArgs) -> u64 {
    u64::try_from(args.offset).unwrap_or(0)
}

fn interrupted(ctx: &RunContext<'_>, resume_offset: u64) -> RunOutcome {
    let kind = NoticeKind::Interrupted { resume_offset };
    emit_notice(&Notice::new(kind, ctx.cmd, ctx.source.as_str()), ctx.color_mode);
    RunOutcome::with_code(to_exit_code(ErrorKind::Cancelled))
}

/// Turns a cancellation raised before the first value into the interrupted notice.
fn interrupted_before_start(
    err: Error,
    args: &ExtractArgs,
    ctx: &RunContext<'_>,
) -> Result<RunOutcome, Error> {
    if err.kind() != ErrorKind::Cancelled {
        return Err(err);
    }
    let resume = err.index().unwrap_or_else(|| start_offset(args));
    Ok(interrupted(ctx, resume))
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {} (source: {})", notice.message, notice.source);
        return;
    }

    let value = notice.to_json();
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Malformed => "malformed row data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Cancelled => "operation aborted".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(line) = err.line() {
        inner.insert("line".to_string(), json!(line));
    }
    if let Some(column) = err.column() {
        inner.insert("column".to_string(), json!(column));
    }
    if let Some(index) = err.index() {
        inner.insert("index".to_string(), json!(index));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(line) = err.line() {
        let location = match err.column() {
            Some(column) => format!("line {line}, column {column}"),
            None => format!("line {line}"),
        };
        lines.push(format!(
            "{} {location}",
            colorize_label("at:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(index) = err.index() {
        lines.push(format!(
            "{} {index}",
            colorize_label("index:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `extlinks --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "extlinks") else {
        return "Try `extlinks --help`.".to_string();
    };

    let parts: Vec<&str> = tokens
        .iter()
        .skip(pos + 1)
        .take_while(|token| {
            !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
        })
        .copied()
        .collect();

    if parts.is_empty() {
        return "Try `extlinks --help`.".to_string();
    }
    format!("Try `extlinks {} --help`.", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::{
        Cli, ColorMode, Command, Error, ErrorKind, ExtractArgs, Link, OutputFormat, RunContext,
        add_resume_hint, clap_error_hint, error_json, error_text, interrupted_before_start,
        parse_schema, write_link,
    };
    use clap::Parser;
    use extlinks::api::Schema;

    fn link() -> Link {
        Link {
            index: 4,
            url: "http://a.example.com/it's".to_string(),
        }
    }

    fn render(format: OutputFormat) -> String {
        let mut out = Vec::new();
        write_link(&mut out, &link(), format, false).expect("write");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn output_formats() {
        assert_eq!(
            render(OutputFormat::Jsonl),
            "{\"index\":4,\"url\":\"http://a.example.com/it's\"}\n"
        );
        assert_eq!(render(OutputFormat::Tsv), "4\thttp://a.example.com/it's\n");
        assert_eq!(render(OutputFormat::Url), "http://a.example.com/it's\n");
    }

    #[test]
    fn negative_offset_parses() {
        let cli = Cli::try_parse_from(["extlinks", "extract", "dump.sql.gz", "--offset", "-3"])
            .expect("parse");
        match cli.command {
            Command::Extract { args, .. } => {
                assert_eq!(args.offset, -3);
                assert_eq!(args.schema, Schema::V129);
            }
            _ => panic!("expected extract"),
        }
    }

    #[test]
    fn unknown_schema_is_rejected() {
        let err = parse_schema("1.5").expect_err("unknown");
        assert!(err.contains("1.29"));
        assert!(
            Cli::try_parse_from(["extlinks", "extract", "d.sql", "--schema", "0.9"]).is_err()
        );
    }

    #[test]
    fn error_json_includes_location() {
        let err = Error::new(ErrorKind::Malformed)
            .with_message("unterminated quoted value")
            .with_line(3)
            .with_column(120)
            .with_index(41);
        let value = error_json(&err);
        let inner = &value["error"];
        assert_eq!(inner["kind"], "Malformed");
        assert_eq!(inner["line"], 3);
        assert_eq!(inner["column"], 120);
        assert_eq!(inner["index"], 41);
    }

    #[test]
    fn error_text_without_color() {
        let err = Error::new(ErrorKind::NotFound)
            .with_message("failed to open dump file")
            .with_hint("check the path");
        let text = error_text(&err, false);
        assert_eq!(text, "error: failed to open dump file\nhint: check the path");
    }

    #[test]
    fn resume_hint_only_for_io() {
        let io = add_resume_hint(Error::new(ErrorKind::Io), 17);
        assert!(io.hint().unwrap().contains("--offset 17"));
        let malformed = add_resume_hint(Error::new(ErrorKind::Malformed), 17);
        assert!(malformed.hint().is_none());
    }

    #[test]
    fn clap_hint_points_at_subcommand() {
        let err = Cli::try_parse_from(["extlinks", "stream"]).err().expect("err");
        let hint = clap_error_hint(&err);
        assert!(hint.starts_with("Try `extlinks"));
    }

    fn stream_args(extra: &[&str]) -> (ExtractArgs, u64, u64) {
        let mut argv = vec!["extlinks", "stream", "https://dumps.example.org/x.sql.gz"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).expect("parse").command {
            Command::Stream {
                args,
                connect_timeout_ms,
                read_timeout_ms,
                ..
            } => (args, connect_timeout_ms, read_timeout_ms),
            _ => panic!("expected stream"),
        }
    }

    #[test]
    fn stream_timeouts_have_defaults() {
        let (_, connect, read) = stream_args(&[]);
        assert_eq!((connect, read), (30_000, 300_000));
        let (_, connect, read) =
            stream_args(&["--connect-timeout-ms", "5", "--read-timeout-ms", "7"]);
        assert_eq!((connect, read), (5, 7));
    }

    #[test]
    fn cancellation_before_first_value_exits_interrupted() {
        let (args, _, _) = stream_args(&["--offset", "42"]);
        let ctx = RunContext {
            cmd: "stream",
            source: "https://dumps.example.org/x.sql.gz".to_string(),
            color_mode: ColorMode::Never,
        };
        let outcome =
            interrupted_before_start(Error::cancelled(), &args, &ctx).expect("interrupted");
        assert_eq!(outcome.exit_code, 130);

        let err = interrupted_before_start(Error::new(ErrorKind::NotFound), &args, &ctx)
            .expect_err("passes through");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
