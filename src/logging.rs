//! Log sink setup.
//!
//! Every line is timestamped with the local date and time down to the
//! microsecond and tagged with its level. Lines go to the standard error
//! stream, or are appended to the configured log file.

use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
};

use simplelog::{Config, ConfigBuilder, LevelFilter, WriteLogger};

use crate::{
    error::{Error, Result},
    settings::Settings,
};

/// The level to log at: `debug` turns on debug messages, any `verbosity`
/// turns on trace messages as well.
pub fn level(debug: bool, verbosity: u64) -> LevelFilter {
    match (debug, verbosity) {
        (_, v) if v > 0 => LevelFilter::Trace,
        (true, _) => LevelFilter::Debug,
        _ => LevelFilter::Info,
    }
}

/// Install the global logger for `settings`.
pub fn init(settings: &Settings, level: LevelFilter) -> Result<()> {
    match &settings.log_file {
        Some(path) => WriteLogger::init(level, config(), open_log_file(path)?)?,
        None => WriteLogger::init(level, config(), io::stderr())?,
    }
    Ok(())
}

fn config() -> Config {
    ConfigBuilder::new()
        .set_time_format_str("%d/%m/%y %H:%M:%S%.6f")
        .set_time_to_local(true)
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .set_location_level(LevelFilter::Off)
        .build()
}

fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| Error::LogFile {
            path: path.to_owned(),
            source,
        })
}

#[test]
fn levels() {
    assert_eq!(level(false, 0), LevelFilter::Info);
    assert_eq!(level(true, 0), LevelFilter::Debug);
    assert_eq!(level(false, 1), LevelFilter::Trace);
    assert_eq!(level(true, 3), LevelFilter::Trace);
}

#[test]
fn log_file_is_appended() {
    use std::{fs, io::Write};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mapper.log");
    fs::write(&path, "first\n").unwrap();

    let mut file = open_log_file(&path).unwrap();
    file.write_all(b"second\n").unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");

    let missing = dir.path().join("no/such/dir/mapper.log");
    assert!(matches!(
        open_log_file(&missing),
        Err(Error::LogFile { .. })
    ));
}
