use anyhow::{Context, Result, bail, format_err};
use clap::{Arg, ArgAction, ArgMatches, Command};
use encoding::EncodingRef;
use encoding::label::encoding_from_whatwg_label;
use indoc::indoc;
use log::{Level, LevelFilter};
use simplelog::{Config, WriteLogger};

use evtx_binxml::{EvtxParser, ParserSettings, SerializedEvtxRecord};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

struct EvtxDump {
    parser_settings: ParserSettings,
    input: PathBuf,
    show_record_number: bool,
    output: Box<dyn Write>,
    verbosity_level: Option<Level>,
    stop_after_error: bool,
}

impl EvtxDump {
    pub fn from_cli_matches(matches: &ArgMatches) -> Result<Self> {
        let input = PathBuf::from(
            matches
                .get_one::<String>("INPUT")
                .ok_or_else(|| format_err!("missing input path"))?,
        );

        let num_threads = matches.get_one::<usize>("num-threads").copied().unwrap_or(0);
        let verbosity_level = match matches.get_count("verbose") {
            0 => None,
            1 => Some(Level::Info),
            2 => Some(Level::Debug),
            3 => Some(Level::Trace),
            _ => {
                eprintln!("using more than  -vvv does not affect verbosity level");
                Some(Level::Trace)
            }
        };

        let ansi_codec = Self::resolve_ansi_codec(
            matches
                .get_one::<String>("ansi-codec")
                .map(String::as_str)
                .unwrap_or("windows-1252"),
        )?;

        let output: Box<dyn Write> = match matches.get_one::<String>("output-target") {
            Some(path) => {
                let file =
                    Self::create_output_file(path, !matches.get_flag("no-confirm-overwrite"))
                        .with_context(|| {
                            format!("An error occurred while creating output file at `{path}`")
                        })?;
                Box::new(BufWriter::new(file))
            }
            None => Box::new(BufWriter::new(io::stdout())),
        };

        Ok(EvtxDump {
            parser_settings: ParserSettings::new()
                .num_threads(num_threads)
                .validate_checksums(matches.get_flag("validate-checksums"))
                .indent(matches.get_flag("indent"))
                .ansi_codec(ansi_codec),
            input,
            show_record_number: !matches.get_flag("no-show-record-number"),
            output,
            verbosity_level,
            stop_after_error: matches.get_flag("stop-after-one-error"),
        })
    }

    /// Main entry point for `EvtxDump`
    pub fn run(&mut self) -> Result<()> {
        self.try_to_initialize_logging();

        let data = self.read_input()?;
        let parser = EvtxParser::from_buffer(data)
            .with_context(|| format!("Failed to open file {}", self.input.display()))?
            .with_configuration(self.parser_settings.clone());

        for record in parser.records() {
            self.dump_record(record)?;
        }

        self.output.flush()?;
        Ok(())
    }

    fn read_input(&self) -> Result<Vec<u8>> {
        if self.input.as_os_str() == "-" {
            let mut data = Vec::new();
            io::stdin()
                .lock()
                .read_to_end(&mut data)
                .context("Failed to read stdin")?;
            return Ok(data);
        }

        fs::read(&self.input).with_context(|| format!("Failed to read {}", self.input.display()))
    }

    fn resolve_ansi_codec(label: &str) -> Result<EncodingRef> {
        match encoding_from_whatwg_label(label) {
            Some(codec) => Ok(codec),
            None => bail!("`{label}` is not a known encoding label"),
        }
    }

    /// With `confirm_overwrite`, refuses to replace an existing file.
    fn create_output_file(path: impl AsRef<Path>, confirm_overwrite: bool) -> Result<File> {
        let p = path.as_ref();

        if p.is_dir() {
            bail!(
                "There is a directory at {}, refusing to overwrite",
                p.display()
            );
        }

        if p.exists() && confirm_overwrite {
            bail!(
                "{} already exists, pass `--no-confirm-overwrite` to replace it",
                p.display()
            );
        }

        match p.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
                fs::create_dir_all(parent)?;
            }
            Some(_) => {}
            None => bail!("Output file cannot be root."),
        }

        Ok(File::create(p)?)
    }

    fn dump_record(
        &mut self,
        record: evtx_binxml::Result<SerializedEvtxRecord<String>>,
    ) -> Result<()> {
        match record {
            Ok(r) => {
                if self.show_record_number {
                    writeln!(self.output, "Record {}", r.event_record_id)?;
                }
                writeln!(self.output, "{}", r.data)?;
            }
            Err(e) => {
                eprintln!("{:?}", anyhow::Error::from(e));

                if self.stop_after_error {
                    self.output.flush()?;
                    exit(1);
                }
            }
        }

        Ok(())
    }

    fn try_to_initialize_logging(&self) {
        if let Some(level) = self.verbosity_level {
            let filter: LevelFilter = level.to_level_filter();
            if let Err(e) = WriteLogger::init(filter, Config::default(), io::stderr()) {
                eprintln!("Failed to initialize logging: {e:?}");
            }
        }
    }
}

fn command() -> Command {
    Command::new("EVTX Parser")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Utility to parse EVTX files")
        .long_about(indoc!(r#"
            Utility to parse EVTX files.

            Records are printed as XML, each preceded by a `Record <id>` line.
            Broken records are reported on stderr and parsing continues with the next one.
        "#))
        .arg(
            Arg::new("INPUT")
                .required(true)
                .help("Path to an .evtx file, or `-` to read it from stdin."),
        )
        .arg(
            Arg::new("num-threads")
                .short('t')
                .long("threads")
                .default_value("0")
                .value_parser(clap::value_parser!(usize))
                .help("Sets the number of worker threads, defaults to number of CPU cores."),
        )
        .arg(
            Arg::new("output-target")
                .long("output")
                .short('f')
                .value_name("FILE")
                .help(indoc!("Writes output to the file specified instead of stdout, errors will still be printed to stderr.
                       Refuses to replace an existing file, to allow overwriting, pass `--no-confirm-overwrite`.
                       Will create parent directories if needed.")),
        )
        .arg(
            Arg::new("no-confirm-overwrite")
                .long("no-confirm-overwrite")
                .action(ArgAction::SetTrue)
                .help("When set, an existing output file will be overwritten, useful for automation"),
        )
        .arg(
            Arg::new("validate-checksums")
                .long("validate-checksums")
                .action(ArgAction::SetTrue)
                .help(indoc!("When set, chunks with invalid checksums will not be parsed.
                Usually dirty files have bad checksums, so using this flag will result in fewer records.")),
        )
        .arg(
            Arg::new("indent")
                .long("indent")
                .action(ArgAction::SetTrue)
                .help("When set, child elements are printed on their own indented lines."),
        )
        .arg(
            Arg::new("no-show-record-number")
                .long("dont-show-record-number")
                .action(ArgAction::SetTrue)
                .help("When set, `Record <id>` will not be printed."),
        )
        .arg(
            Arg::new("ansi-codec")
                .long("ansi-codec")
                .value_name("NAME")
                .default_value("windows-1252")
                .help("Codec used for ansi encoded strings in the file, as a WHATWG encoding label."),
        )
        .arg(
            Arg::new("stop-after-one-error")
                .long("stop-after-one-error")
                .action(ArgAction::SetTrue)
                .help("When set, exit with status 1 on the first record that fails to parse."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help(indoc!("Sets debug prints level for the application:
                    -v   - info
                    -vv  - debug
                    -vvv - trace
                NOTE: trace output is only available in debug builds, as it is extremely verbose.")),
        )
}

fn main() -> Result<()> {
    let matches = command().get_matches();

    let mut app = EvtxDump::from_cli_matches(&matches)?;
    app.run()
}
