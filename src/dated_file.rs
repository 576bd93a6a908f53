use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};

use crate::{ais_reformatter::format_timestamp, config::ChannelConfig, error::ChannelError};

const DOC_URL: &str = "https://opencpn-manuals.github.io/main/vdr/log_format.html";

/// How the file for a new day was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opened {
    Created(PathBuf),
    Appended(PathBuf),
}

struct OutputFile {
    date: NaiveDate,
    path: PathBuf,
    file: File,
}

/// Owns the output file of one channel and switches it whenever the UTC date
/// moves on.
pub struct DatedFileRouter {
    data_root: PathBuf,
    channel: ChannelConfig,
    current: Option<OutputFile>,
}

impl DatedFileRouter {
    pub fn new(data_root: impl Into<PathBuf>, channel: ChannelConfig) -> Self {
        Self {
            data_root: data_root.into(),
            channel,
            current: None,
        }
    }

    /// `<data-root>/<YYYY>/<MM>/<DD>/`
    pub fn dir_for(&self, date: NaiveDate) -> PathBuf {
        self.data_root
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
    }

    /// `<dir>/<YYYYMMDD>-<port>.csv`
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir_for(date).join(format!(
            "{}-{}.csv",
            date.format("%Y%m%d"),
            self.channel.port
        ))
    }

    pub fn port(&self) -> u16 {
        self.channel.port
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|c| c.path.as_path())
    }

    /// Makes sure the open file belongs to the UTC day of `now`. Returns
    /// `Some` when a file was (re)opened, `None` when the current one still
    /// applies.
    pub async fn ensure_current(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<Opened>, ChannelError> {
        let date = now.date_naive();
        if self.current.as_ref().is_some_and(|c| c.date == date) {
            return Ok(None);
        }
        self.switch_to(now).await.map(Some)
    }

    async fn switch_to(&mut self, now: DateTime<Utc>) -> Result<Opened, ChannelError> {
        let date = now.date_naive();

        if let Some(mut previous) = self.current.take() {
            // nothing useful to do if the old handle is already broken
            _ = previous.file.flush().await;
        }

        let dir = self.dir_for(date);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ChannelError::CreateDir {
                path: dir.clone(),
                source,
            })?;

        let path = self.path_for(date);
        let timestamp = format_timestamp(now);
        let (mut file, header, opened) =
            match OpenOptions::new().append(true).open(&path).await {
                Ok(file) => (
                    file,
                    restart_header(&timestamp),
                    Opened::Appended(path.clone()),
                ),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    let file = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .await
                        .map_err(|source| ChannelError::Open {
                            path: path.clone(),
                            source,
                        })?;
                    (
                        file,
                        new_file_header(&timestamp, &self.channel),
                        Opened::Created(path.clone()),
                    )
                }
                Err(source) => {
                    return Err(ChannelError::Open {
                        path: path.clone(),
                        source,
                    })
                }
            };

        write_flushed(&mut file, header.as_bytes(), &path).await?;
        self.current = Some(OutputFile { date, path, file });
        Ok(opened)
    }

    /// Appends already formatted rows to the current file and flushes them.
    pub async fn append(&mut self, rows: &[u8]) -> Result<(), ChannelError> {
        let Some(current) = self.current.as_mut() else {
            return Err(ChannelError::Write {
                path: self.data_root.clone(),
                source: std::io::Error::new(ErrorKind::NotConnected, "no output file open"),
            });
        };
        write_flushed(&mut current.file, rows, &current.path).await
    }

    /// Flushes and drops the current file, if any.
    pub async fn close(&mut self) {
        if let Some(mut current) = self.current.take() {
            _ = current.file.flush().await;
        }
    }
}

async fn write_flushed(file: &mut File, bytes: &[u8], path: &Path) -> Result<(), ChannelError> {
    file.write_all(bytes).await.map_err(|source| ChannelError::Write {
        path: path.to_owned(),
        source,
    })?;
    file.flush().await.map_err(|source| ChannelError::Write {
        path: path.to_owned(),
        source,
    })
}

fn restart_header(timestamp: &str) -> String {
    format!("# Restarted: {timestamp}\r\n")
}

fn new_file_header(timestamp: &str, channel: &ChannelConfig) -> String {
    format!(
        "# VDR Log File refer:\r\n\
         # {DOC_URL}\r\n\
         # Created: {timestamp}\r\n\
         # {} v{}\r\n\
         # NMEA0183 on UDP port {} \"{}\"\r\n\
         # received_at,protocol,msg_type,source,raw_data\r\n\
         # actual format in use differs from documented format:\r\n\
         timestamp,type,id,message\r\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        channel.port,
        channel.stream_name,
    )
}
