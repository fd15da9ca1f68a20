use std::{
    fmt::Display,
    fs::File,
    io::{self, Read},
    path::PathBuf,
    sync::LazyLock,
};

use clap::{error::ErrorKind, CommandFactory, Parser};
use regex::Regex;

use crate::config::DEFAULT_API;

static APP_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w+)=(v\d+\.\d+\.\d+)$").expect("app version regex is valid")
});

/// Push application updates to a fleet of devices.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Applications to install, as `application_id=vMAJOR.MINOR.PATCH`,
    /// followed by the CSV file with a `mac_addresses` column listing the
    /// devices to update. Use `-` to read the devices from standard input.
    ///
    /// If an application is given more than once, the last version wins.
    #[arg(value_name = "APP=VERSION... DEVICE_CSV", required = true, num_args = 1..)]
    pub rest: Vec<String>,

    /// Number of parallel updates.
    #[arg(short = 'n', long, default_value_t = 4)]
    pub workers: usize,

    /// Base URL of the fleet API.
    #[arg(long, env = "TOUCHTUNES_FLEET_API", default_value = DEFAULT_API)]
    pub api: String,

    /// Token sent with every update request.
    #[arg(long, env = "TOUCHTUNES_AUTH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Write logs to this file instead of standard error.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Verbosity. Repeat to be more verbose.
    #[arg(short, action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

impl Args {
    /// Splits the positional arguments into the application versions and the
    /// device input, which always comes last.
    pub fn batch_input(&self) -> Result<BatchInput, clap::Error> {
        let Some((device_csv, apps)) = self.rest.split_last() else {
            return Err(Self::command().error(
                ErrorKind::MissingRequiredArgument,
                "Missing DEVICE_CSV argument",
            ));
        };

        let apps = apps
            .iter()
            .map(|a| parse_app_version(a))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Self::command().error(ErrorKind::ValueValidation, e))?;

        Ok(BatchInput {
            apps,
            device_csv: device_csv.as_str().into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchInput {
    pub apps: Vec<AppVersion>,
    pub device_csv: InputSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppVersion {
    pub application_id: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    Path(PathBuf),
}

impl InputSource {
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(match self {
            InputSource::Stdin => Box::new(io::stdin()),
            InputSource::Path(p) => Box::new(File::open(p)?),
        })
    }
}

impl From<&str> for InputSource {
    fn from(value: &str) -> Self {
        match value {
            "-" => Self::Stdin,
            path => Self::Path(path.into()),
        }
    }
}

impl Display for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputSource::Stdin => write!(f, "standard input"),
            InputSource::Path(p) => write!(f, "{}", p.to_string_lossy()),
        }
    }
}

fn parse_app_version(arg: &str) -> Result<AppVersion, String> {
    let caps = APP_VERSION
        .captures(arg)
        .ok_or_else(|| format!("Invalid app version specification '{arg}'"))?;
    Ok(AppVersion {
        application_id: caps[1].to_owned(),
        version: caps[2].to_owned(),
    })
}
