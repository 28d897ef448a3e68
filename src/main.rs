extern crate clap;
#[macro_use] extern crate derive_more;
#[macro_use] extern crate tracing;
extern crate rir_country;
extern crate tracing_subscriber;

use std::fs::File;
use std::io;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use rir_country::config;
use rir_country::config::BuildOpts;
use rir_country::config::ExportOpts;
use rir_country::config::LookupOpts;
use rir_country::export;
use rir_country::fetch::DirectoryFetcher;
use rir_country::fetch::FetchError;
use rir_country::fetch::Fetcher;
use rir_country::fetch::HttpFetcher;
use rir_country::fetch::Retrying;
use rir_country::ingest::Ingest;
use rir_country::lookup::IndexGeneration;
use rir_country::lookup::Lookup;
use rir_country::reconcile::InvariantViolation;
use rir_country::report::CountryStats;
use rir_country::report::Summary;
use rir_country::store;
use rir_country::store::RangeStore;
use rir_country::store::SnapshotStore;
use rir_country::store::Tables;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;


fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match Options::create() {
        Err(e) => {
            eprintln!("{}", e);
            ::std::process::exit(1);
        },
        Ok(option) => {
            let res = match option {
                Options::Build(opts) => build(&opts),
                Options::Json(opts) => json(&opts),
                Options::Export(opts) => export_csv(&opts),
                Options::Stats(opts) => stats(&opts),
                Options::Lookup(opts) => lookup(&opts)
            };
            match res {
                Ok(()) => {},
                Err(e) => {
                    eprintln!("{}", e);
                    ::std::process::exit(1);
                }
            }
        }
    }
}

enum Options {
    Build(BuildOpts),
    Json(ExportOpts),
    Export(ExportOpts),
    Stats(ExportOpts),
    Lookup(LookupOpts)
}

impl Options {
    pub fn create() -> Result<Self, Error> {
        let matches = config::app().get_matches();

        if let Some(opts) = matches.subcommand_matches("build") {
            Ok(Options::Build(BuildOpts::parse(opts)?))
        } else if let Some(opts) = matches.subcommand_matches("json") {
            Ok(Options::Json(ExportOpts::parse(opts, config::DEFAULT_JSON)?))
        } else if let Some(opts) = matches.subcommand_matches("export") {
            Ok(Options::Export(ExportOpts::parse(opts, config::DEFAULT_CSV)?))
        } else if let Some(opts) = matches.subcommand_matches("stats") {
            Ok(Options::Stats(ExportOpts::parse(opts, config::DEFAULT_STATS)?))
        } else if let Some(opts) = matches.subcommand_matches("lookup") {
            Ok(Options::Lookup(LookupOpts::parse(opts)?))
        } else {
            Err(Error::msg("No sub-command given. See --help for options."))
        }
    }
}


//------------ Commands ------------------------------------------------------

fn build(opts: &BuildOpts) -> Result<(), Error> {
    match &opts.source {
        Some(dir) => {
            info!("reading registry files from {}", dir.display());
            run_build(&Retrying::new(DirectoryFetcher::new(dir.clone()), opts.policy), opts)
        }
        None => {
            let fetcher = HttpFetcher::new(opts.timeout)?;
            run_build(&Retrying::new(fetcher, opts.policy), opts)
        }
    }
}

fn run_build<F: Fetcher>(fetcher: &F, opts: &BuildOpts) -> Result<(), Error> {
    let (generation, report) = Ingest::run(fetcher)?;
    if report.successful().is_empty() {
        return Err(Error::msg("No registry data could be processed, keeping the existing database."))
    }
    eprintln!("{}", report);

    let lookup = Lookup::new();
    let id = lookup.publish(generation);
    let generation = lookup.current();

    let mut tables = Tables::from_generation(&generation);
    for (key, value) in report.metadata(id) {
        tables.set_metadata(&key, &value);
    }
    SnapshotStore::new(opts.db.clone()).replace(tables)?;

    println!("{}", Summary::new(&generation));
    Ok(())
}

fn load(db: &Path) -> Result<IndexGeneration, Error> {
    let store = SnapshotStore::new(db);
    match store.load()? {
        Some(tables) => {
            if let Some(updated) = tables.metadata("last_updated") {
                info!("using data from {}", updated);
            }
            Ok(tables.to_generation()?)
        }
        None => Err(Error::WithMessage(format!(
            "No database at {}. Run the build command first.", db.display()
        )))
    }
}

fn create(path: &Path) -> Result<BufWriter<File>, Error> {
    Ok(BufWriter::new(File::create(path)?))
}

fn json(opts: &ExportOpts) -> Result<(), Error> {
    let generation = load(&opts.db)?;
    let mut writer = create(&opts.output)?;
    let count = export::write_json(&mut writer, generation.v4().iter())?;
    writer.flush()?;
    println!("Exported {} IPv4 ranges to {}", count, opts.output.display());
    Ok(())
}

fn export_csv(opts: &ExportOpts) -> Result<(), Error> {
    let generation = load(&opts.db)?;
    let count = export::write_csv(create(&opts.output)?, generation.v4().iter())?;
    println!("Exported {} IPv4 ranges to {}", count, opts.output.display());
    Ok(())
}

fn stats(opts: &ExportOpts) -> Result<(), Error> {
    let generation = load(&opts.db)?;
    let stats = CountryStats::from_ranges(generation.v4().iter());
    let count = export::write_country_stats(create(&opts.output)?, &stats)?;
    println!("Exported statistics for {} countries to {}", count, opts.output.display());
    Ok(())
}

fn lookup(opts: &LookupOpts) -> Result<(), Error> {
    let lookup = Lookup::new();
    lookup.publish(load(&opts.db)?);

    let mut invalid = 0;
    let queries = opts.addresses.iter().map(String::as_str);
    for (query, res) in opts.addresses.iter().zip(lookup.lookup_all(queries)) {
        match res {
            Ok(res) => println!("{}\n", res),
            Err(e) => {
                eprintln!("{}: {}\n", query, e);
                invalid += 1;
            }
        }
    }
    if invalid > 0 {
        return Err(Error::WithMessage(format!("{} invalid address(es)", invalid)))
    }
    Ok(())
}


//------------ Error --------------------------------------------------------

#[derive(Debug, Display)]
pub enum Error {
    #[display(fmt = "{}", _0)]
    WithMessage(String),

    #[display(fmt = "{}", _0)]
    ConfigError(config::Error),

    #[display(fmt = "{}", _0)]
    IoError(io::Error),

    #[display(fmt = "{}", _0)]
    FetchError(FetchError),

    #[display(fmt = "{}", _0)]
    InvariantViolation(InvariantViolation),

    #[display(fmt = "{}", _0)]
    StoreError(store::Error),

    #[display(fmt = "{}", _0)]
    ExportError(export::Error),
}

impl Error {
    pub fn msg(s: &str) -> Self {
        Error::WithMessage(s.to_string())
    }
}

impl From<config::Error> for Error {
    fn from(e: config::Error) -> Self { Error::ConfigError(e) }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self { Error::IoError(e) }
}

impl From<FetchError> for Error {
    fn from(e: FetchError) -> Self { Error::FetchError(e) }
}

impl From<InvariantViolation> for Error {
    fn from(e: InvariantViolation) -> Self { Error::InvariantViolation(e) }
}

impl From<store::Error> for Error {
    fn from(e: store::Error) -> Self { Error::StoreError(e) }
}

impl From<export::Error> for Error {
    fn from(e: export::Error) -> Self { Error::ExportError(e) }
}
