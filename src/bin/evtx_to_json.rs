use anyhow::{Context, Result, bail, format_err};
use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use indoc::indoc;

use encoding::all::encodings;
use encoding::types::Encoding;
use evtx_json::{
    Diagnostic, DiagnosticLocation, EvtxParser, EvtxRecord, JsonArrayWriter, ParserSettings,
};
use log::{LevelFilter, info, warn};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum OutputFormat {
    Json,
    JsonLines,
    Xml,
}

struct EvtxToJson {
    parser_settings: ParserSettings,
    input: PathBuf,
    output_path: Option<PathBuf>,
    output_format: OutputFormat,
    diagnostics_path: Option<PathBuf>,
    confirm_overwrite: bool,
    verbosity_level: LevelFilter,
}

impl EvtxToJson {
    fn from_cli_matches(matches: &ArgMatches) -> Result<Self> {
        let input = PathBuf::from(
            matches
                .get_one::<String>("INPUT")
                .ok_or_else(|| format_err!("missing INPUT"))?,
        );

        let output_format = match matches.get_one::<String>("output-format").map(String::as_str) {
            Some("jsonl") => OutputFormat::JsonLines,
            Some("xml") => OutputFormat::Xml,
            _ => OutputFormat::Json,
        };

        let num_threads = *matches.get_one::<usize>("num-threads").unwrap_or(&0);
        let num_threads = match (cfg!(feature = "multithreading"), num_threads) {
            (true, number) => number,
            (false, 0 | 1) => 1,
            (false, _) => {
                eprintln!(
                    "turned on threads, but library was compiled without `multithreading` feature! using fallback sync iterator"
                );
                1
            }
        };

        let verbosity_level = match matches.get_count("verbose") {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            3 => LevelFilter::Trace,
            _ => {
                eprintln!("using more than -vvv does not affect verbosity level");
                LevelFilter::Trace
            }
        };

        let codec_name = matches
            .get_one::<String>("ansi-codec")
            .map(String::as_str)
            .unwrap_or("windows-1252");
        let ansi_codec = encodings()
            .iter()
            .find(|c| c.name() == codec_name)
            .ok_or_else(|| format_err!("unknown ansi codec `{}`", codec_name))?;

        Ok(EvtxToJson {
            parser_settings: ParserSettings::new()
                .num_threads(num_threads)
                .forensic_mode(matches.get_flag("forensic"))
                .validate_checksums(!matches.get_flag("no-checksums"))
                .indent(!matches.get_flag("no-indent"))
                .ansi_codec(*ansi_codec),
            input,
            output_path: matches.get_one::<String>("output-target").map(PathBuf::from),
            output_format,
            diagnostics_path: matches.get_one::<String>("diagnostics").map(PathBuf::from),
            confirm_overwrite: !matches.get_flag("no-confirm-overwrite"),
            verbosity_level,
        })
    }

    /// Main entry point for `EvtxToJson`
    fn run(&self) -> Result<()> {
        self.try_to_initialize_logging();

        let mut parser = EvtxParser::from_path(&self.input)
            .with_context(|| format!("Failed to open file {}", self.input.display()))?
            .with_configuration(self.parser_settings.clone());

        let output: Box<dyn Write> = match &self.output_path {
            Some(path) => Box::new(BufWriter::new(
                create_output_file(path, self.confirm_overwrite).with_context(|| {
                    format!("An error occurred while creating output file at `{}`", path.display())
                })?,
            )),
            None => Box::new(BufWriter::new(io::stdout())),
        };

        // On a fatal error, the diagnostics collected so far are reported by `convert`.
        let diagnostics = self.convert(&mut parser, output)?;
        self.report(&diagnostics)?;

        if let Some(path) = &self.output_path {
            info!("Conversion complete. JSON output saved to {}", path.display());
        }

        Ok(())
    }

    fn convert(
        &self,
        parser: &mut EvtxParser<File>,
        output: Box<dyn Write>,
    ) -> Result<Vec<Diagnostic>> {
        let indent = self.parser_settings.should_indent();
        let mut sink = RecordSink::new(self.output_format, output, indent);
        let mut records = parser.records();

        let mut fatal = None;
        for record in records.by_ref() {
            match record {
                Ok(record) => sink.write(&record)?,
                Err(err) => {
                    fatal = Some(err);
                    break;
                }
            }
        }

        let mut diagnostics = records.take_diagnostics();
        match fatal {
            None => {
                sink.finish()?;
                Ok(diagnostics)
            }
            Some(err) => {
                // Keep whatever was collected, the fatal error is the last entry.
                if let Some(kind) = err.kind() {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticLocation::File { offset: 0 },
                        kind,
                        &err,
                    ));
                }
                self.report(&diagnostics)?;
                Err(err.into())
            }
        }
    }

    fn report(&self, diagnostics: &[Diagnostic]) -> Result<()> {
        match &self.diagnostics_path {
            Some(path) => {
                let mut out = BufWriter::new(
                    create_output_file(path, self.confirm_overwrite).with_context(|| {
                        format!("Failed to create diagnostics file at `{}`", path.display())
                    })?,
                );
                for diagnostic in diagnostics {
                    serde_json::to_writer(&mut out, diagnostic)?;
                    writeln!(out)?;
                }
                out.flush()?;
            }
            None => {
                let skipped = diagnostics.iter().filter(|d| d.kind.is_skip()).count();
                if !diagnostics.is_empty() {
                    warn!(
                        "{} diagnostics ({} skipped, {} warnings)",
                        diagnostics.len(),
                        skipped,
                        diagnostics.len() - skipped
                    );
                }
            }
        }
        Ok(())
    }

    fn try_to_initialize_logging(&self) {
        if let Err(e) = TermLogger::init(
            self.verbosity_level,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ) {
            eprintln!("Failed to initialize logging: {}", e);
        }
    }
}

enum RecordSink {
    Json(JsonArrayWriter<Box<dyn Write>>),
    Lines { output: Box<dyn Write>, xml: bool },
}

impl RecordSink {
    fn new(format: OutputFormat, output: Box<dyn Write>, indent: bool) -> Self {
        match format {
            OutputFormat::Json => RecordSink::Json(JsonArrayWriter::new(output, indent)),
            OutputFormat::JsonLines => RecordSink::Lines { output, xml: false },
            OutputFormat::Xml => RecordSink::Lines { output, xml: true },
        }
    }

    fn write(&mut self, record: &EvtxRecord) -> Result<()> {
        match self {
            RecordSink::Json(array) => array.write_event(&record.to_json_value())?,
            RecordSink::Lines { output, xml: false } => {
                writeln!(output, "{}", record.to_json(false)?)?
            }
            RecordSink::Lines { output, xml: true } => writeln!(output, "{}", record.to_xml()?)?,
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        match self {
            RecordSink::Json(array) => array.finish()?.flush()?,
            RecordSink::Lines { mut output, .. } => output.flush()?,
        }
        Ok(())
    }
}

/// If `prompt` is passed, will display a confirmation prompt before overwriting files.
fn create_output_file(path: impl AsRef<Path>, prompt: bool) -> Result<File> {
    let p = path.as_ref();

    if p.is_dir() {
        bail!(
            "There is a directory at {}, refusing to overwrite",
            p.display()
        );
    }

    if p.exists() {
        if prompt {
            let confirmed = Confirm::new()
                .with_prompt(format!(
                    "Are you sure you want to override output file at {}",
                    p.display()
                ))
                .default(false)
                .interact()
                .context("Failed to write confirmation prompt to term")?;

            if !confirmed {
                bail!("Cancelled");
            }
        }
        return Ok(File::create(p)?);
    }

    // Ok to assume p is not an existing directory
    match p.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            fs::create_dir_all(parent)?;
            Ok(File::create(p)?)
        }
        Some(_) => Ok(File::create(p)?),
        None => bail!("Output file cannot be root."),
    }
}

fn cli() -> Command {
    Command::new("evtx_to_json")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Converts an EVTX file to JSON")
        .arg(Arg::new("INPUT").required(true))
        .arg(
            Arg::new("output-target")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help(
                    "Writes output to the file specified instead of stdout, errors will still be printed to stderr. \
                     Will ask for confirmation before overwriting files, to allow overwriting, pass `--no-confirm-overwrite`. \
                     Will create parent directories if needed.",
                ),
        )
        .arg(
            Arg::new("output-format")
                .short('f')
                .long("format")
                .value_parser(["json", "jsonl", "xml"])
                .default_value("json")
                .help("Sets the output format")
                .long_help(indoc!(
                    r#"
                    Sets the output format:
                        "json"  - a single JSON array of flattened events.
                        "jsonl" - one flattened event per line.
                        "xml"   - the XML of every record.
                    "#
                )),
        )
        .arg(
            Arg::new("num-threads")
                .short('t')
                .long("threads")
                .value_parser(clap::value_parser!(usize))
                .default_value("0")
                .help("Sets the number of worker threads, defaults to number of CPU cores."),
        )
        .arg(
            Arg::new("no-confirm-overwrite")
                .long("no-confirm-overwrite")
                .action(ArgAction::SetTrue)
                .help("When set, will not ask for confirmation before overwriting files, useful for automation"),
        )
        .arg(
            Arg::new("no-indent")
                .long("no-indent")
                .action(ArgAction::SetTrue)
                .help("When set, output will not be indented."),
        )
        .arg(
            Arg::new("forensic")
                .long("forensic")
                .action(ArgAction::SetTrue)
                .help(
                    "When set, a bad file header checksum is reported instead of aborting, \
                     and chunks with a bad header checksum are still decoded.",
                ),
        )
        .arg(
            Arg::new("no-checksums")
                .long("no-checksums")
                .action(ArgAction::SetTrue)
                .help("When set, checksums are not validated at all."),
        )
        .arg(
            Arg::new("diagnostics")
                .long("diagnostics")
                .value_name("FILE")
                .help("Writes skipped and suspect records and chunks to FILE, one JSON object per line."),
        )
        .arg(
            Arg::new("ansi-codec")
                .long("ansi-codec")
                .value_parser(PossibleValuesParser::new(
                    encodings()
                        .iter()
                        .filter(|&e| e.raw_decoder().is_ascii_compatible())
                        .map(|e| e.name())
                        .collect::<Vec<&'static str>>(),
                ))
                .default_value(encoding::all::WINDOWS_1252.name())
                .help("When set, controls the codec of ansi encoded strings the file."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("-v - info, -vv - debug, -vvv - trace"),
        )
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    let app = EvtxToJson::from_cli_matches(&matches)?;
    app.run()
}
