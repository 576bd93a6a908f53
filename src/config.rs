use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
    time::Duration,
};

use clap::Parser;

use crate::error::ConfigError;

pub const CONFIG_NAME: &str = "LogAIS";
pub const MIN_PORT: u16 = 1025;

/// Records AIS sentences received on UDP ports into one file per port and per
/// UTC day, in a format close to the OpenCPN VDR log format.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// root directory for data files, also holds the default config file
    #[arg(short, long, env = "LOGAIS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// directory for the operational log and its rotated generations
    #[arg(short, long, env = "LOGAIS_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// tab separated `<port>\t<stream name>` file, defaults to <data-dir>/LogAIS.txt
    #[arg(short, long, env = "LOGAIS_CONFIG")]
    pub config: Option<PathBuf>,

    /// local address every channel binds its UDP socket on
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_address: IpAddr,

    /// rotate the operational log once it grows past this many bytes
    #[arg(long, default_value_t = 100 * 1024)]
    pub log_size_limit: u64,

    /// number of rotated operational logs to keep
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    pub log_generations: u32,

    /// seconds between operational log size checks
    #[arg(long, default_value_t = 600, value_parser = clap::value_parser!(u64).range(1..))]
    pub log_check_secs: u64,
}

/// Directories the process works in, after applying OS defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub config_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub max_generations: u32,
    pub check_interval: Duration,
}

impl Args {
    pub fn resolve_paths(&self) -> Result<Paths, ConfigError> {
        let (default_data, default_log) = match (&self.data_dir, &self.log_dir) {
            (Some(data), Some(log)) => (data.clone(), log.clone()),
            _ => {
                let (data, log) = platform_defaults()
                    .ok_or(ConfigError::UnsupportedPlatform(std::env::consts::OS))?;
                (
                    self.data_dir.clone().unwrap_or(data),
                    self.log_dir.clone().unwrap_or(log),
                )
            }
        };
        let config_file = self
            .config
            .clone()
            .unwrap_or_else(|| default_data.join(format!("{CONFIG_NAME}.txt")));

        Ok(Paths {
            data_dir: default_data,
            log_dir: default_log,
            config_file,
        })
    }

    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy {
            max_bytes: self.log_size_limit,
            max_generations: self.log_generations,
            check_interval: Duration::from_secs(self.log_check_secs),
        }
    }
}

fn platform_defaults() -> Option<(PathBuf, PathBuf)> {
    if cfg!(target_os = "linux") {
        Some((
            PathBuf::from("/var/local").join(CONFIG_NAME),
            PathBuf::from("/var/log").join(CONFIG_NAME),
        ))
    } else if cfg!(target_os = "windows") {
        let app_data = std::env::var_os("APPDATA")?;
        Some((
            PathBuf::from(r"C:\").join(CONFIG_NAME),
            PathBuf::from(app_data).join(CONFIG_NAME),
        ))
    } else {
        None
    }
}

/// One configured input: a UDP port and the stream name it is recorded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub port: u16,
    pub stream_name: String,
}

/// Parses the channel list. Comment, blank and single-field lines are skipped
/// silently; lines with a bad or repeated port come back as errors so the
/// caller can report them.
pub fn parse_channels(content: &str) -> Vec<Result<ChannelConfig, ConfigError>> {
    let mut seen = HashSet::new();
    let mut parsed = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim().replace("  ", " ");
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(port_field), Some(stream_name)) = (fields.next(), fields.next()) else {
            continue;
        };

        let port_field: String = port_field.chars().filter(|c| *c != ' ').collect();
        let port = match check_port(&port_field) {
            Some(port) => port,
            None => {
                parsed.push(Err(ConfigError::InvalidPort {
                    line: line_no,
                    value: port_field,
                }));
                continue;
            }
        };
        if !seen.insert(port) {
            parsed.push(Err(ConfigError::DuplicatePort {
                line: line_no,
                port,
            }));
            continue;
        }

        parsed.push(Ok(ChannelConfig {
            port,
            stream_name: stream_name.to_owned(),
        }));
    }

    parsed
}

fn check_port(value: &str) -> Option<u16> {
    value.parse::<u16>().ok().filter(|port| *port >= MIN_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(port: u16, name: &str) -> ChannelConfig {
        ChannelConfig {
            port,
            stream_name: name.to_owned(),
        }
    }

    #[test]
    fn parses_port_and_stream_name() {
        let parsed = parse_channels("10110\tVHF1\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].as_ref().unwrap(), &ok(10110, "VHF1"));
    }

    #[test]
    fn skips_comments_blank_and_short_lines() {
        let content = "# port\tname\n\n   \n10110\n\t\n10111\tVHF2\r\n";
        let parsed: Vec<_> = parse_channels(content)
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(parsed, vec![ok(10111, "VHF2")]);
    }

    #[test]
    fn trims_spaces_and_ignores_extra_fields() {
        let content = "  10 110\tHarbour  radar\textra\tfields  \n";
        let parsed = parse_channels(content);
        assert_eq!(parsed[0].as_ref().unwrap(), &ok(10110, "Harbour radar"));
    }

    #[test]
    fn rejects_out_of_range_and_garbage_ports() {
        let parsed = parse_channels("1024\tlow\n65536\thigh\nabc\tword\n1025\tmin\n65535\tmax\n");
        assert!(matches!(
            parsed[0],
            Err(ConfigError::InvalidPort { line: 1, .. })
        ));
        assert!(matches!(
            parsed[1],
            Err(ConfigError::InvalidPort { line: 2, .. })
        ));
        assert!(matches!(
            parsed[2],
            Err(ConfigError::InvalidPort { line: 3, .. })
        ));
        assert_eq!(parsed[3].as_ref().unwrap(), &ok(1025, "min"));
        assert_eq!(parsed[4].as_ref().unwrap(), &ok(65535, "max"));
    }

    #[test]
    fn rejects_repeated_port() {
        let parsed = parse_channels("2000\tone\n2000\ttwo\n");
        assert!(parsed[0].is_ok());
        assert!(matches!(
            parsed[1],
            Err(ConfigError::DuplicatePort { line: 2, port: 2000 })
        ));
    }

    #[test]
    fn default_config_lives_in_data_dir() {
        let args = Args::parse_from(["ais-recorder", "-d", "/data", "-l", "/logs"]);
        let paths = args.resolve_paths().unwrap();
        assert_eq!(paths.data_dir, PathBuf::from("/data"));
        assert_eq!(paths.log_dir, PathBuf::from("/logs"));
        assert_eq!(paths.config_file, PathBuf::from("/data/LogAIS.txt"));
    }

    #[test]
    fn rotation_defaults() {
        let args = Args::parse_from(["ais-recorder", "-d", "/data", "-l", "/logs"]);
        assert_eq!(
            args.rotation_policy(),
            RotationPolicy {
                max_bytes: 102_400,
                max_generations: 4,
                check_interval: Duration::from_secs(600),
            }
        );
    }
}
