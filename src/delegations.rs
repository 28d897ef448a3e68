//! Parse delegated extended stats
//!
//! Each registry publishes a `delegated-<registry>-extended-latest` file with
//! one pipe separated line per delegation:
//!
//! ```text
//! registry|cc|type|start|value|date|status[|opaque-id[|extensions...]]
//! ```
//!
//! Lines are normalized into [`AllocationRecord`] values. Headers, summary
//! lines, comments and ASN delegations are skipped, lines that cannot be
//! parsed are reported one by one and never stop the rest of the file.
use std::fmt;
use std::io;
use std::io::BufRead;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::num::ParseIntError;
use std::str::FromStr;
use chrono::NaiveDate;
use crate::ip::prefix_range;
use crate::ip::AddressFamily;


//------------ Registry -----------------------------------------------------

/// The five Regional Internet Registries. The declaration order is the order
/// in which their records are concatenated before reconciliation.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Registry {
    Arin,
    Ripe,
    Apnic,
    Lacnic,
    Afrinic
}

impl Registry {
    pub const ALL: [Registry; 5] = [
        Registry::Arin,
        Registry::Ripe,
        Registry::Apnic,
        Registry::Lacnic,
        Registry::Afrinic
    ];

    /// The token used for this registry in file names and the first column
    /// of its delegated stats.
    pub fn token(self) -> &'static str {
        match self {
            Registry::Arin    => "arin",
            Registry::Ripe    => "ripencc",
            Registry::Apnic   => "apnic",
            Registry::Lacnic  => "lacnic",
            Registry::Afrinic => "afrinic"
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Registry::Arin    => "ARIN",
            Registry::Ripe    => "RIPE",
            Registry::Apnic   => "APNIC",
            Registry::Lacnic  => "LACNIC",
            Registry::Afrinic => "AFRINIC"
        }
    }

    pub fn file_name(self) -> String {
        format!("delegated-{}-extended-latest", self.token())
    }
}

impl FromStr for Registry {
    type Err = Error;

    /// Accepts both the file token and the display name, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "arin"              => Ok(Registry::Arin),
            "ripencc" | "ripe"  => Ok(Registry::Ripe),
            "apnic"             => Ok(Registry::Apnic),
            "lacnic"            => Ok(Registry::Lacnic),
            "afrinic"           => Ok(Registry::Afrinic),
            r => Err(Error::parse_error(format!("unknown registry: {}", r)))
        }
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}


//------------ Status --------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Status {
    Allocated,
    Assigned,
    Reserved,
    Available
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Allocated => "allocated",
            Status::Assigned  => "assigned",
            Status::Reserved  => "reserved",
            Status::Available => "available"
        }
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allocated" => Ok(Status::Allocated),
            "assigned"  => Ok(Status::Assigned),
            "reserved"  => Ok(Status::Reserved),
            "available" => Ok(Status::Available),
            s => Err(Error::parse_error(format!("unknown status: {}", s)))
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


//------------ CountryCode ---------------------------------------------------

/// An uppercase ISO 3166-1 alpha-2 code, or `ZZ` for delegations that are
/// not held in any country.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CountryCode([u8; 2]);

impl CountryCode {
    pub const UNKNOWN: CountryCode = CountryCode(*b"ZZ");

    /// Normalizes the raw country column. Lowercase codes are uppercased,
    /// empty values and reserved tokens such as `*` become `ZZ`.
    pub fn normalize(s: &str) -> Self {
        let bytes = s.trim().as_bytes();
        if bytes.len() == 2 && bytes.iter().all(u8::is_ascii_alphabetic) {
            CountryCode([
                bytes[0].to_ascii_uppercase(),
                bytes[1].to_ascii_uppercase()
            ])
        } else {
            CountryCode::UNKNOWN
        }
    }

    pub fn as_str(&self) -> &str {
        // Always two ASCII letters.
        ::std::str::from_utf8(&self.0).unwrap_or("ZZ")
    }
}

impl FromStr for CountryCode {
    type Err = Error;

    /// Strict parsing, used when reading back exported data.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() == 2 && bytes.iter().all(u8::is_ascii_uppercase) {
            Ok(CountryCode([bytes[0], bytes[1]]))
        } else {
            Err(Error::parse_error(format!("invalid country code: {}", s)))
        }
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CountryCode({})", self.as_str())
    }
}


//------------ AllocDate -----------------------------------------------------

/// The allocation date of a delegation. Registries use `00000000` or leave
/// the column empty when the date is not known.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AllocDate {
    Unknown,
    Known(NaiveDate)
}

impl AllocDate {
    /// The textual form used for unknown dates.
    pub const UNKNOWN: &'static str = "00000000";

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            AllocDate::Unknown => None,
            AllocDate::Known(date) => Some(*date)
        }
    }
}

impl FromStr for AllocDate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == Self::UNKNOWN {
            return Ok(AllocDate::Unknown)
        }
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::parse_error(format!("invalid date: {}", s)))
        }
        NaiveDate::parse_from_str(s, "%Y%m%d")
            .map(AllocDate::Known)
            .map_err(|e| Error::parse_error(format!("invalid date {}: {}", s, e)))
    }
}

impl fmt::Display for AllocDate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocDate::Unknown => f.write_str(Self::UNKNOWN),
            AllocDate::Known(date) => write!(f, "{}", date.format("%Y%m%d"))
        }
    }
}


//------------ Resource ------------------------------------------------------

/// The address space of a delegation. IPv4 delegations are published as a
/// start address and a count, IPv6 delegations as a prefix.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Resource {
    V4 { start: u32, end: u32 },
    V6 { network: u128, length: u8 }
}

impl Resource {
    pub fn family(&self) -> AddressFamily {
        match self {
            Resource::V4 { .. } => AddressFamily::Ipv4,
            Resource::V6 { .. } => AddressFamily::Ipv6
        }
    }

    fn parse_v4(start: &str, count: &str) -> Result<Self, Error> {
        let start = u32::from(Ipv4Addr::from_str(start)
            .map_err(|e| Error::parse_error(format!("invalid ipv4 start {}: {}", start, e)))?);
        let count = u64::from_str(count)?;
        if count == 0 {
            return Err(Error::parse_error("ipv4 delegation of zero addresses"))
        }
        let end = u64::from(start) + count - 1;
        if end > u64::from(::std::u32::MAX) {
            return Err(Error::parse_error("ipv4 delegation exceeds address space"))
        }
        Ok(Resource::V4 { start, end: end as u32 })
    }

    fn parse_v6(start: &str, length: &str) -> Result<Self, Error> {
        let address = u128::from(Ipv6Addr::from_str(start)
            .map_err(|e| Error::parse_error(format!("invalid ipv6 start {}: {}", start, e)))?);
        let length = u8::from_str(length)?;
        if length > 128 {
            return Err(Error::parse_error(format!("invalid prefix length: {}", length)))
        }
        let (network, _) = prefix_range(address, length);
        Ok(Resource::V6 { network, length })
    }
}


//------------ AllocationRecord ----------------------------------------------

/// One normalized delegation line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AllocationRecord {
    registry: Registry,
    resource: Resource,
    country: CountryCode,
    date: AllocDate,
    status: Status
}

impl AllocationRecord {
    pub fn new(
        registry: Registry,
        resource: Resource,
        country: CountryCode,
        date: AllocDate,
        status: Status
    ) -> Self {
        AllocationRecord { registry, resource, country, date, status }
    }

    pub fn registry(&self) -> Registry { self.registry }
    pub fn resource(&self) -> Resource { self.resource }
    pub fn family(&self) -> AddressFamily { self.resource.family() }
    pub fn country(&self) -> CountryCode { self.country }
    pub fn date(&self) -> AllocDate { self.date }
    pub fn status(&self) -> Status { self.status }
}


//------------ Line ----------------------------------------------------------

/// The classification of a single input line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Line {
    Blank,
    Comment,
    Header,
    Summary,
    Asn,
    Record(AllocationRecord)
}

impl Line {
    /// Parses one line of a file published by `registry`. The registry of
    /// the stream is authoritative for provenance, the first column is only
    /// used to recognise the version header.
    pub fn parse(registry: Registry, line: &str) -> Result<Self, Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Line::Blank)
        }
        if line.starts_with('#') {
            return Ok(Line::Comment)
        }

        let mut values = line.split('|');

        let reg_str = values.next().ok_or(Error::MissingColumn)?;
        if !reg_str.is_empty() && reg_str.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
            // version|registry|serial|records|startdate|enddate|UTCoffset
            return Ok(Line::Header)
        }

        let cc_str = values.next().ok_or(Error::MissingColumn)?;
        let type_str = values.next().ok_or(Error::MissingColumn)?;
        let start_str = values.next().ok_or(Error::MissingColumn)?;
        let value_str = values.next().ok_or(Error::MissingColumn)?;
        let date_str = values.next().ok_or(Error::MissingColumn)?;

        // registry|*|type|*|count|summary
        if date_str == "summary" {
            return Ok(Line::Summary)
        }

        let status_str = values.next().ok_or(Error::MissingColumn)?;

        let resource = match type_str {
            "ipv4" => Resource::parse_v4(start_str, value_str)?,
            "ipv6" => Resource::parse_v6(start_str, value_str)?,
            "asn"  => return Ok(Line::Asn),
            t => return Err(Error::parse_error(format!("unsupported type: {}", t)))
        };

        let country = CountryCode::normalize(cc_str);
        let date = AllocDate::from_str(date_str)?;
        let status = Status::from_str(status_str)?;

        Ok(Line::Record(
            AllocationRecord { registry, resource, country, date, status }
        ))
    }
}


//------------ NormalizeStats ------------------------------------------------

/// Counters kept while normalizing one registry's file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NormalizeStats {
    pub lines: usize,
    pub records: usize,
    pub skipped: usize,
    pub asns: usize,
    pub malformed: usize
}

impl NormalizeStats {
    pub fn merge(&mut self, other: &NormalizeStats) {
        self.lines += other.lines;
        self.records += other.records;
        self.skipped += other.skipped;
        self.asns += other.asns;
        self.malformed += other.malformed;
    }
}

impl fmt::Display for NormalizeStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "lines: {}, records: {}, skipped: {}, asns: {}, malformed: {}",
            self.lines,
            self.records,
            self.skipped,
            self.asns,
            self.malformed
        )
    }
}


//------------ Records -------------------------------------------------------

/// A lazy sequence of records read from one registry's byte stream.
///
/// Yields every record in input order, and an error item for every line that
/// could not be parsed. Reading the same bytes again yields the same items.
pub struct Records<R> {
    registry: Registry,
    lines: io::Split<R>,
    line_no: usize,
    stats: NormalizeStats,
    done: bool
}

impl<R: BufRead> Records<R> {
    pub fn new(registry: Registry, reader: R) -> Self {
        Records {
            registry,
            lines: reader.split(b'\n'),
            line_no: 0,
            stats: NormalizeStats::default(),
            done: false
        }
    }

    pub fn registry(&self) -> Registry { self.registry }

    /// The counters for everything read so far.
    pub fn stats(&self) -> &NormalizeStats { &self.stats }
}

impl<R: BufRead> Iterator for Records<R> {
    type Item = Result<AllocationRecord, MalformedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let bytes = match self.lines.next() {
                None => {
                    self.done = true;
                    return None
                }
                Some(Err(e)) => {
                    // The reader itself failed, nothing after this is safe
                    // to read.
                    self.done = true;
                    self.stats.malformed += 1;
                    return Some(Err(MalformedRecord::new(
                        self.registry, self.line_no + 1, Error::IoError(e)
                    )))
                }
                Some(Ok(bytes)) => bytes
            };
            self.line_no += 1;
            self.stats.lines += 1;

            let parsed = match ::std::str::from_utf8(&bytes) {
                Ok(line) => Line::parse(self.registry, line),
                Err(_) => Err(Error::parse_error("line is not valid UTF-8"))
            };

            match parsed {
                Ok(Line::Record(record)) => {
                    self.stats.records += 1;
                    return Some(Ok(record))
                }
                Ok(Line::Asn) => self.stats.asns += 1,
                Ok(_) => self.stats.skipped += 1,
                Err(e) => {
                    self.stats.malformed += 1;
                    return Some(Err(MalformedRecord::new(
                        self.registry, self.line_no, e
                    )))
                }
            }
        }
        None
    }
}

/// Reads all records from the stream, skipping malformed lines. Returns the
/// records in input order together with the counters.
pub fn normalize<R: BufRead>(
    registry: Registry,
    reader: R
) -> (Vec<AllocationRecord>, NormalizeStats) {
    let mut records = Records::new(registry, reader);
    let mut res = Vec::new();

    for item in &mut records {
        match item {
            Ok(record) => res.push(record),
            Err(e) => debug!("skipping {}", e)
        }
    }

    (res, *records.stats())
}


//------------ MalformedRecord -----------------------------------------------

/// A line that could not be normalized.
#[derive(Debug)]
pub struct MalformedRecord {
    registry: Registry,
    line: usize,
    error: Error
}

impl MalformedRecord {
    fn new(registry: Registry, line: usize, error: Error) -> Self {
        MalformedRecord { registry, line, error }
    }

    pub fn registry(&self) -> Registry { self.registry }
    pub fn line(&self) -> usize { self.line }
    pub fn error(&self) -> &Error { &self.error }
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "malformed {} line {}: {}",
            self.registry, self.line, self.error
        )
    }
}


//------------ Error --------------------------------------------------------

#[derive(Debug, Display)]
pub enum Error {
    #[display(fmt = "{}", _0)]
    IoError(io::Error),

    #[display(fmt = "Missing column in delegated-extended")]
    MissingColumn,

    #[display(fmt = "Error parsing delegated-extended: {}", _0)]
    ParseError(String),
}

impl Error {
    fn parse_error(e: impl fmt::Display) -> Self {
        Error::ParseError(format!("{}", e))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self { Error::IoError(e) }
}

impl From<ParseIntError> for Error {
    fn from(e: ParseIntError) -> Self { Self::parse_error(e) }
}

//------------ Tests --------------------------------------------------------
