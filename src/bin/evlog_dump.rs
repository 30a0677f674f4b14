use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use dialoguer::Confirm;

use chrono::{DateTime, Utc};
use evlog::{
    DataItemsMode, DiagnosticsLevel, EventStreamOptions, EvtxParser, MessageStrategy,
    ParserSettings, StaticProvider,
};
use log::Level;
use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

const EXIT_USAGE: i32 = 1;
const EXIT_IO: i32 = 2;
const EXIT_FORMAT: i32 = 3;

#[derive(Copy, Clone, PartialEq, Eq)]
enum OutputFormat {
    Xml,
    ResolvedJson,
}

struct EvlogDump {
    parser_settings: ParserSettings,
    input: PathBuf,
    output_format: OutputFormat,
    pretty: bool,
    catalog: Option<PathBuf>,
    with_alias_lookup: bool,
    start: Option<u64>,
    limit: Option<usize>,
    last: Option<u64>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    provider: Option<String>,
    event_ids: Option<Vec<u32>>,
    include_raw_xml: bool,
    // It's ok to rely on interior mutability here, since there is only one
    // code flow writing to output which is trivial to verify.
    output: RefCell<Box<dyn Write>>,
    verbosity_level: Option<Level>,
}

/// Tries to write a line to the target, aborts the program if that fails.
macro_rules! try_writeln {
    ($($arg:tt)*) => (
        match writeln!($($arg)*) {
            Ok(_) => {},
            Err(e) => {
                eprintln!("{e}");
                exit(EXIT_IO)
            }
        }
    );
}

fn parse_utc(value: &str, what: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("`{what}` expects an ISO-8601 timestamp, got `{value}`"))
}

impl EvlogDump {
    fn from_cli_matches(matches: &clap::ArgMatches) -> Result<Self> {
        let input = PathBuf::from(
            matches
                .get_one::<String>("INPUT")
                .expect("This is a required argument"),
        );

        let output_format = if matches.get_flag("with-messages") {
            OutputFormat::ResolvedJson
        } else {
            OutputFormat::Xml
        };

        let verbosity_level = match matches.get_count("verbose") {
            0 => None,
            1 => Some(Level::Info),
            2 => Some(Level::Debug),
            3 => Some(Level::Trace),
            _ => {
                eprintln!("using more than -vvv does not affect verbosity level");
                Some(Level::Trace)
            }
        };

        let validate_checksums = !matches.get_flag("no-checksums");

        let event_ids = matches.get_one::<String>("event-id").map(|raw| {
            raw.split(',')
                .filter_map(|part| part.trim().parse::<u32>().ok())
                .collect::<Vec<u32>>()
        });

        let since = matches
            .get_one::<String>("since")
            .map(|value| parse_utc(value, "--since"))
            .transpose()?;
        let until = matches
            .get_one::<String>("until")
            .map(|value| parse_utc(value, "--until"))
            .transpose()?;

        let output: Box<dyn Write> = if let Some(path) = matches.get_one::<String>("out") {
            let file =
                Self::create_output_file(path, !matches.get_flag("no-confirm-overwrite"))?;
            Box::new(file)
        } else {
            Box::new(io::stdout())
        };

        Ok(EvlogDump {
            parser_settings: ParserSettings::new()
                .validate_checksums(validate_checksums)
                .indent(true),
            input,
            output_format,
            pretty: matches.get_flag("pretty"),
            catalog: matches.get_one::<String>("catalog").map(PathBuf::from),
            with_alias_lookup: !matches.get_flag("no-alias-lookup"),
            start: matches.get_one::<u64>("start").copied(),
            limit: matches.get_one::<u64>("limit").map(|v| *v as usize),
            last: matches.get_one::<u64>("last").copied(),
            since,
            until,
            provider: matches.get_one::<String>("provider").cloned(),
            event_ids,
            include_raw_xml: matches.get_flag("raw-xml"),
            output: RefCell::new(output),
            verbosity_level,
        })
    }

    fn create_output_file(path: impl AsRef<Path>, confirm_overwrite: bool) -> Result<File> {
        let path = path.as_ref();

        if path.exists() && confirm_overwrite {
            let confirmed = Confirm::new()
                .with_prompt(format!(
                    "Are you sure you want to override output file at `{}`?",
                    path.display()
                ))
                .default(false)
                .interact()
                .context("failed to read confirmation")?;

            if !confirmed {
                anyhow::bail!("aborted by user");
            }
        }

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create `{}`", parent.display()))?;
            }
        }

        File::create(path).with_context(|| format!("failed to create `{}`", path.display()))
    }

    fn build_stream_options(&self) -> Result<EventStreamOptions> {
        let mut options = EventStreamOptions::new()
            .include_raw_xml(self.include_raw_xml)
            .include_data_items(DataItemsMode::Full)
            .include_diagnostics(DiagnosticsLevel::Basic)
            .enable_alias_lookup(self.with_alias_lookup)
            .message_strategy(MessageStrategy::BestEffort)
            .start(self.start)
            .limit(self.limit)
            .last(self.last)
            .event_id(self.event_ids.clone())
            .provider(self.provider.clone())
            .since(self.since)
            .until(self.until);

        if let Some(catalog_path) = &self.catalog {
            let file = File::open(catalog_path)
                .with_context(|| format!("failed to open catalog `{}`", catalog_path.display()))?;
            let catalog = StaticProvider::from_json_lines(BufReader::new(file))
                .with_context(|| format!("failed to load catalog `{}`", catalog_path.display()))?;
            options = options.message_provider(Box::new(catalog));
        }

        Ok(options)
    }

    fn dump_xml(&self) -> Result<i32> {
        let mut parser =
            EvtxParser::from_path_with_configuration(&self.input, self.parser_settings.clone())
                .map_err(anyhow::Error::from)?;

        let skip = self
            .last
            .map(|last| parser.next_record_id().saturating_sub(last))
            .max(self.start)
            .unwrap_or(0);

        let mut emitted = 0_usize;
        let mut had_errors = false;

        for record in parser.records() {
            match record {
                Ok(record) => {
                    if record.event_record_id < skip {
                        continue;
                    }
                    if let Some(limit) = self.limit {
                        if emitted >= limit {
                            break;
                        }
                    }

                    emitted += 1;
                    try_writeln!(
                        self.output.borrow_mut(),
                        "Record {}\n{}",
                        record.event_record_id,
                        record.data
                    );
                }
                Err(e) => {
                    had_errors = true;
                    eprintln!("{e}");
                }
            }
        }

        Ok(if had_errors { EXIT_FORMAT } else { 0 })
    }

    fn dump_resolved(&self) -> Result<i32> {
        let mut parser =
            EvtxParser::from_path_with_configuration(&self.input, self.parser_settings.clone())
                .map_err(anyhow::Error::from)?;

        let options = self.build_stream_options()?;
        let mut had_errors = false;

        for event in parser.resolved_events(options) {
            match event {
                Ok(event) => {
                    let line = if self.pretty {
                        serde_json::to_string_pretty(&event)
                    } else {
                        serde_json::to_string(&event)
                    }
                    .context("failed to serialize event")?;

                    try_writeln!(self.output.borrow_mut(), "{line}");
                }
                Err(e) => {
                    had_errors = true;
                    eprintln!("{e}");
                }
            }
        }

        Ok(if had_errors { EXIT_FORMAT } else { 0 })
    }

    fn run(&self) -> Result<i32> {
        if let Some(level) = self.verbosity_level {
            let mut builder = env_logger::Builder::new();
            builder.filter_level(level.to_level_filter()).init();
        }

        match self.output_format {
            OutputFormat::Xml => self.dump_xml(),
            OutputFormat::ResolvedJson => self.dump_resolved(),
        }
    }
}

fn command() -> Command {
    Command::new("evlog_dump")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Dumps EVTX files as XML or resolved-event JSON lines")
        .arg(Arg::new("INPUT").required(true).help("The EVTX file to dump"))
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("-v info, -vv debug, -vvv trace (errors go to stderr)"),
        )
        .arg(
            Arg::new("with-messages")
                .long("with-messages")
                .action(ArgAction::SetTrue)
                .help("Emit resolved events as JSON lines instead of XML"),
        )
        .arg(
            Arg::new("catalog")
                .long("catalog")
                .value_name("FILE")
                .help("A JSONL message-template catalog used for resolution"),
        )
        .arg(
            Arg::new("pretty")
                .long("pretty")
                .action(ArgAction::SetTrue)
                .help("Pretty-print JSON output"),
        )
        .arg(
            Arg::new("raw-xml")
                .long("raw-xml")
                .action(ArgAction::SetTrue)
                .help("Attach the rendered XML to each resolved event"),
        )
        .arg(
            Arg::new("last")
                .long("last")
                .value_name("N")
                .value_parser(value_parser!(u64))
                .help("Only the last N records"),
        )
        .arg(
            Arg::new("start")
                .long("start")
                .value_name("N")
                .value_parser(value_parser!(u64))
                .help("Skip records with an id lower than N"),
        )
        .arg(
            Arg::new("limit")
                .long("limit")
                .value_name("N")
                .value_parser(value_parser!(u64))
                .help("Emit at most N records"),
        )
        .arg(
            Arg::new("since")
                .long("since")
                .value_name("ISO")
                .help("Only records at or after this UTC timestamp"),
        )
        .arg(
            Arg::new("until")
                .long("until")
                .value_name("ISO")
                .help("Only records at or before this UTC timestamp"),
        )
        .arg(
            Arg::new("provider")
                .long("provider")
                .value_name("NAME")
                .help("Only records whose provider name contains NAME"),
        )
        .arg(
            Arg::new("event-id")
                .long("event-id")
                .value_name("N[,N...]")
                .help("Only records with one of these event ids"),
        )
        .arg(
            Arg::new("out")
                .long("out")
                .value_name("PATH")
                .help("Write output to a file instead of stdout"),
        )
        .arg(
            Arg::new("no-confirm-overwrite")
                .long("no-confirm-overwrite")
                .action(ArgAction::SetTrue)
                .help("Overwrite the output file without asking"),
        )
        .arg(
            Arg::new("no-checksums")
                .long("no-checksums")
                .action(ArgAction::SetTrue)
                .help("Skip CRC32 validation (the header magic is still checked)"),
        )
        .arg(
            Arg::new("no-alias-lookup")
                .long("no-alias-lookup")
                .action(ArgAction::SetTrue)
                .help("Do not retry message lookup under the provider alias"),
        )
}

fn main() {
    let matches = match command().try_get_matches() {
        Ok(matches) => matches,
        Err(e) => {
            // Help and version are not usage errors.
            if e.use_stderr() {
                eprintln!("{e}");
                exit(EXIT_USAGE);
            }
            e.exit()
        }
    };

    let app = match EvlogDump::from_cli_matches(&matches) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{e:#}");
            exit(EXIT_USAGE);
        }
    };

    match app.run() {
        Ok(code) => exit(code),
        Err(e) => {
            // I/O problems and format problems get distinct exit codes so
            // scripted callers can tell them apart.
            let code = if e
                .chain()
                .any(|cause| cause.downcast_ref::<std::io::Error>().is_some())
            {
                EXIT_IO
            } else {
                match e.downcast_ref::<evlog::err::EvtxError>() {
                    Some(evlog::err::EvtxError::FailedToOpenFile { .. })
                    | Some(evlog::err::EvtxError::IO { .. })
                    | Some(evlog::err::EvtxError::FileSizeLimitExceeded { .. }) => EXIT_IO,
                    Some(_) => EXIT_FORMAT,
                    None => EXIT_FORMAT,
                }
            };

            eprintln!("{e:#}");
            exit(code);
        }
    }
}
