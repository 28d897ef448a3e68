//! Command line options.
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use clap::App;
use clap::Arg;
use clap::ArgMatches;
use clap::SubCommand;
use crate::fetch::RetryPolicy;

pub const DEFAULT_DB: &str = "ip_country.db";
pub const DEFAULT_CSV: &str = "ip_country_table.csv";
pub const DEFAULT_JSON: &str = "ipv4_ranges.json";
pub const DEFAULT_STATS: &str = "country_stats.csv";


//------------ app -----------------------------------------------------------

fn db_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("db")
        .long("db")
        .value_name("FILE")
        .env("RIR_COUNTRY_DB")
        .default_value(DEFAULT_DB)
        .help("Range database file.")
}

fn output_arg<'a, 'b>(default: &'a str) -> Arg<'a, 'b> {
    Arg::with_name("output")
        .value_name("FILE")
        .default_value(default)
        .help("Output file.")
}

/// The command line interface.
pub fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("rir_country")
        .version("0.1.0")
        .about("Builds and queries an IP to country table from RIR delegation files")
        .subcommand(SubCommand::with_name("build")
            .about("Fetch all registries and rebuild the database")
            .arg(db_arg())
            .arg(Arg::with_name("source")
                .short("s")
                .long("source")
                .value_name("DIR")
                .help("Read delegated-<rir>-extended-latest files from this directory instead of downloading.")
                .required(false))
            .arg(Arg::with_name("retries")
                .long("retries")
                .value_name("N")
                .default_value("3")
                .help("Attempts per registry for transient failures."))
            .arg(Arg::with_name("backoff")
                .long("backoff")
                .value_name("SECS")
                .default_value("5")
                .help("Wait between attempts."))
            .arg(Arg::with_name("timeout")
                .long("timeout")
                .value_name("SECS")
                .default_value("120")
                .help("Download timeout per registry."))
        )
        .subcommand(SubCommand::with_name("json")
            .about("Write IPv4 ranges as JSON")
            .arg(db_arg())
            .arg(output_arg(DEFAULT_JSON))
        )
        .subcommand(SubCommand::with_name("export")
            .about("Write IPv4 ranges as CSV")
            .arg(db_arg())
            .arg(output_arg(DEFAULT_CSV))
        )
        .subcommand(SubCommand::with_name("stats")
            .about("Write per country statistics as CSV")
            .arg(db_arg())
            .arg(output_arg(DEFAULT_STATS))
        )
        .subcommand(SubCommand::with_name("lookup")
            .about("Look up the country of one or more addresses")
            .arg(db_arg())
            .arg(Arg::with_name("address")
                .value_name("IP")
                .multiple(true)
                .required(true))
        )
}

fn db(matches: &ArgMatches) -> PathBuf {
    PathBuf::from(matches.value_of("db").unwrap_or(DEFAULT_DB))
}

fn number<T: FromStr>(matches: &ArgMatches, name: &str, default: &str) -> Result<T, Error> {
    let value = matches.value_of(name).unwrap_or(default);
    T::from_str(value).map_err(|_| {
        Error::InvalidNumber(format!("--{} expects a number, got '{}'", name, value))
    })
}


//------------ BuildOpts -----------------------------------------------------

pub struct BuildOpts {
    pub db: PathBuf,
    pub source: Option<PathBuf>,
    pub policy: RetryPolicy,
    pub timeout: Duration
}

impl BuildOpts {
    pub fn parse(matches: &ArgMatches) -> Result<Self, Error> {
        let retries: u32 = number(matches, "retries", "3")?;
        if retries == 0 {
            return Err(Error::WithMessage("--retries must be at least 1".to_string()))
        }
        let backoff: u64 = number(matches, "backoff", "5")?;
        let timeout: u64 = number(matches, "timeout", "120")?;

        Ok(BuildOpts {
            db: db(matches),
            source: matches.value_of("source").map(PathBuf::from),
            policy: RetryPolicy::new(retries, Duration::from_secs(backoff)),
            timeout: Duration::from_secs(timeout)
        })
    }
}


//------------ ExportOpts ----------------------------------------------------

pub struct ExportOpts {
    pub db: PathBuf,
    pub output: PathBuf
}

impl ExportOpts {
    pub fn parse(matches: &ArgMatches, default: &str) -> Result<Self, Error> {
        Ok(ExportOpts {
            db: db(matches),
            output: PathBuf::from(matches.value_of("output").unwrap_or(default))
        })
    }
}


//------------ LookupOpts ----------------------------------------------------

pub struct LookupOpts {
    pub db: PathBuf,
    pub addresses: Vec<String>
}

impl LookupOpts {
    pub fn parse(matches: &ArgMatches) -> Result<Self, Error> {
        let addresses: Vec<String> = match matches.values_of("address") {
            Some(values) => values.map(|s| s.trim().to_string()).collect(),
            None => Vec::new()
        };
        if addresses.is_empty() {
            return Err(Error::WithMessage("No address given".to_string()))
        }
        Ok(LookupOpts { db: db(matches), addresses })
    }
}


//------------ Error --------------------------------------------------------

#[derive(Debug, Display)]
pub enum Error {
    #[display(fmt = "{}", _0)]
    WithMessage(String),

    #[display(fmt = "{}", _0)]
    InvalidNumber(String),
}


//------------ Tests --------------------------------------------------------
