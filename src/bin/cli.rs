//! mapper-devusb command line interface.

use std::{path::Path, process, str::FromStr};

use clap::{crate_description, crate_name, crate_version, App, AppSettings::*, Arg, ArgMatches};
use console::style;
use log::{debug, info, warn};
use nix::sys::signal::{signal, SigHandler, Signal};

use mapper_devusb::{self as md, Error, FileConfig, KeepAliveLog, Settings, SettingsBuilder};

fn main() {
    let matches = App::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .long_about(
            "\n\
            Provides a named pipe to receive and forward everything to \
            DEVICE_FILE. In-between, clears the HUPCL flag of DEVICE_FILE \
            every time it is opened, to prevent an Arduino reset at each \
            write.\n\
            \n\
            When the pipe stays idle, a `noop` command is written to the \
            device so that an unplug/replug of the board triggers its reset \
            on a harmless write. Writing `EOF()` to the pipe stops the \
            program.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("DEVICE_FILE")
                .help("the serial device to forward to")
                .long_help(
                    "the serial device to forward to; required, unless set \
                     in the configuration file.",
                )
                .index(1),
        )
        .arg(
            Arg::with_name("FIFO")
                .help("FIFO to use")
                .short("f")
                .long("fifo")
                .takes_value(true)
                .value_name("FIFO"),
        )
        .arg(
            Arg::with_name("LOG_FILE")
                .help("logs into FILE instead of stderr")
                .short("l")
                .long("log")
                .takes_value(true)
                .value_name("FILE"),
        )
        .arg(
            Arg::with_name("CONFIG")
                .help("reads settings from a TOML configuration file")
                .short("c")
                .long("config")
                .takes_value(true)
                .value_name("FILE"),
        )
        .arg(
            Arg::with_name("DAEMON")
                .help("starts as a daemon")
                .short("d")
                .long("daemon"),
        )
        .arg(
            Arg::with_name("DEBUG")
                .help("prints out debug information")
                .short("D")
                .long("debug"),
        )
        .arg(
            Arg::with_name("KEEP_ALIVE_SUCCESS")
                .help("seconds between keep-alives while writes succeed [default: 60]")
                .long("keep-alive-success")
                .takes_value(true)
                .value_name("SECS"),
        )
        .arg(
            Arg::with_name("KEEP_ALIVE_FAILURE")
                .help("seconds between keep-alives while writes fail [default: 5]")
                .long("keep-alive-failure")
                .takes_value(true)
                .value_name("SECS"),
        )
        .arg(
            Arg::with_name("KEEP_ALIVE_LOG")
                .help("which keep-alive events get logged [default: always]")
                .long("keep-alive-log")
                .takes_value(true)
                .possible_values(&["never", "error", "always"]),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial line speed set before every write [default: 115200]")
                .short("b")
                .long("baud-rate")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("BUFFER_SIZE")
                .help("maximum bytes read from the FIFO at once [default: 8192]")
                .long("buffer-size")
                .takes_value(true)
                .value_name("BYTES"),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Logs at trace level, with hex dumps of the received data",
        ))
        .get_matches();

    let settings = settings_from(&matches).unwrap_or_else(|e| fail(e));

    let level = md::log_level(settings.debug, matches.occurrences_of("v"));
    md::init_logging(&settings, level).unwrap_or_else(|e| fail(e));

    info!("start");
    log_settings(&settings);

    let daemon = settings.daemon;
    let forwarder = md::prepare(settings).unwrap_or_else(|e| fail(e));

    // Installed once detached: the handler runs on a thread of its own,
    // which would not survive the fork.
    if let Err(e) = ctrlc::set_handler(move || {
        info!("termination");
        process::exit(0);
    }) {
        warn!("cannot install the termination handler: {}", e);
    }
    if daemon {
        ignore_hangup();
    }

    let stats = forwarder.run();
    debug!("{}", stats);
    info!("termination");
}

/// Settings from the configuration file, if any, overridden by the command
/// line arguments.
fn settings_from(matches: &ArgMatches) -> md::Result<Settings> {
    let mut builder = SettingsBuilder::new();

    if let Some(path) = matches.value_of_os("CONFIG") {
        builder = FileConfig::load(Path::new(path))?.apply(builder);
    }

    if let Some(device) = matches.value_of_os("DEVICE_FILE") {
        builder = builder.device(device);
    }
    if let Some(fifo) = matches.value_of_os("FIFO") {
        builder = builder.fifo(fifo);
    }
    if let Some(log_file) = matches.value_of_os("LOG_FILE") {
        builder = builder.log_file(log_file);
    }
    if matches.is_present("DAEMON") {
        builder = builder.daemon(true);
    }
    if matches.is_present("DEBUG") {
        builder = builder.debug(true);
    }
    if let Some(secs) = parsed::<u64>(matches, "KEEP_ALIVE_SUCCESS", "keep-alive-success")? {
        builder = builder.keep_alive_on_success(std::time::Duration::from_secs(secs));
    }
    if let Some(secs) = parsed::<u64>(matches, "KEEP_ALIVE_FAILURE", "keep-alive-failure")? {
        builder = builder.keep_alive_on_failure(std::time::Duration::from_secs(secs));
    }
    if let Some(policy) = parsed::<KeepAliveLog>(matches, "KEEP_ALIVE_LOG", "keep-alive-log")? {
        builder = builder.keep_alive_log(policy);
    }
    if let Some(baud_rate) = parsed::<u32>(matches, "BAUD_RATE", "baud-rate")? {
        builder = builder.baud_rate(baud_rate);
    }
    if let Some(buffer_size) = parsed::<usize>(matches, "BUFFER_SIZE", "buffer-size")? {
        builder = builder.buffer_size(buffer_size);
    }

    builder.finalize()
}

/// The value of argument `name`, parsed.
fn parsed<T: FromStr>(
    matches: &ArgMatches,
    name: &str,
    option: &'static str,
) -> md::Result<Option<T>> {
    match matches.value_of(name) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidValue {
                option,
                value: value.into(),
                reason: "not a valid value",
            }),
    }
}

fn log_settings(settings: &Settings) {
    debug!("device file:    [{}]", settings.device.display());
    if let Some(port) = md::describe_port(&settings.device) {
        debug!("serial port:    [{}]", port);
    }
    debug!("fifo file name: [{}]", settings.fifo.display());
    match &settings.log_file {
        Some(path) => debug!("log file name:  [{}]", path.display()),
        None => debug!("log file name:  <stderr>"),
    }
    debug!(
        "daemon mode:    [{}]",
        if settings.daemon { "yes" } else { "no" }
    );
    debug!(
        "keep-alive:     [{:?} on success, {:?} on failure, log {}]",
        settings.keep_alive_on_success, settings.keep_alive_on_failure, settings.keep_alive_log
    );
    debug!("baud rate:      [{}]", settings.baud_rate);
}

/// A daemon has no terminal to hang up; SIGHUP stays harmless instead of
/// going through the termination handler.
fn ignore_hangup() {
    // SAFETY: `SigIgn` runs no handler code in the process.
    match unsafe { signal(Signal::SIGHUP, SigHandler::SigIgn) } {
        Ok(_) => debug!("ignoring SIGHUP"),
        Err(e) => warn!("cannot ignore SIGHUP: {}", e),
    }
}

fn fail(err: Error) -> ! {
    eprintln!("{}: {}", style("mapper-devusb: error").red(), err);
    if let Error::MissingDevice | Error::InvalidValue { .. } = err {
        eprintln!(
            "   {} try `{}` for more information",
            style("-->").cyan(),
            style("mapper-devusb --help").cyan()
        );
    }
    process::exit(err.exit_code());
}
