use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures that end a single channel worker. Other channels keep running.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("port {port}: can't bind UDP input: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("port {port}: can't re-open UDP input after read error: {source}")]
    Rebind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("unable to make output directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not open output file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error writing to output file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures while rotating the operational log. Only permission problems are
/// reported for delete/rename steps, a missing generation is not an error.
#[derive(Debug, Error)]
pub enum RotateError {
    #[error("unable to delete old logfile {}: {source}", .path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to rename logfile {} to {}: {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not open log file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("line {line}: not a valid input port: {value:?}")]
    InvalidPort { line: usize, value: String },

    #[error("line {line}: port {port} already configured")]
    DuplicatePort { line: usize, port: u16 },

    #[error("unsupported platform {0}, set the data and log directories explicitly")]
    UnsupportedPlatform(&'static str),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("operational log rotation failed: {0}")]
    Rotate(#[from] RotateError),
}
