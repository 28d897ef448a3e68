//! Persistence of reconciled ranges.
//!
//! A store holds three logical tables: `ipv4_ranges`, `ipv6_ranges` and
//! `metadata`. Every build replaces all three at once. IPv6 ranges are kept
//! as `(network, prefix_length)` rows; an interval that is not a single CIDR
//! block is stored as its minimal set of blocks, and merged again on load.
use std::fmt;
use std::fs;
use std::fs::File;
use std::io;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::net::Ipv6Addr;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use chrono::Utc;
use crate::delegations;
use crate::delegations::AllocDate;
use crate::delegations::CountryCode;
use crate::delegations::Registry;
use crate::delegations::Status;
use crate::ip::prefix_range;
use crate::ip::prefixes;
use crate::lookup::IndexGeneration;
use crate::index::Ipv4Index;
use crate::index::Ipv6Index;
use crate::reconcile::merge_adjacent;
use crate::reconcile::Attribution;
use crate::reconcile::DisjointRange;
use crate::reconcile::InvariantViolation;


//------------ Rows ----------------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ipv4Row {
    pub start_ip: u32,
    pub end_ip: u32,
    pub country_code: String,
    pub rir: String,
    pub date_allocated: String,
    pub status: String
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ipv6Row {
    pub network: String,
    pub prefix_length: u8,
    pub country_code: String,
    pub rir: String,
    pub date_allocated: String,
    pub status: String
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MetadataRow {
    pub key: String,
    pub value: String,
    pub updated_at: String
}

fn attribution(
    country_code: &str,
    rir: &str,
    date_allocated: &str,
    status: &str
) -> Result<Attribution, Error> {
    Ok(Attribution::new(
        CountryCode::from_str(country_code)?,
        Registry::from_str(rir)?,
        AllocDate::from_str(date_allocated)?,
        Status::from_str(status)?
    ))
}

impl Ipv4Row {
    pub fn from_range(range: &DisjointRange<u32>) -> Self {
        Ipv4Row {
            start_ip: range.start(),
            end_ip: range.end(),
            country_code: range.country().to_string(),
            rir: range.registry().to_string(),
            date_allocated: range.date().to_string(),
            status: range.status().to_string()
        }
    }

    pub fn to_range(&self) -> Result<DisjointRange<u32>, Error> {
        let att = attribution(
            &self.country_code, &self.rir, &self.date_allocated, &self.status
        )?;
        Ok(DisjointRange::new(self.start_ip, self.end_ip, att))
    }
}

impl Ipv6Row {
    /// One row per CIDR block of the range.
    pub fn from_range(range: &DisjointRange<u128>) -> Vec<Self> {
        prefixes(range.start(), range.end()).into_iter()
            .map(|(network, prefix_length)| Ipv6Row {
                network: Ipv6Addr::from(network).to_string(),
                prefix_length,
                country_code: range.country().to_string(),
                rir: range.registry().to_string(),
                date_allocated: range.date().to_string(),
                status: range.status().to_string()
            })
            .collect()
    }

    pub fn to_range(&self) -> Result<DisjointRange<u128>, Error> {
        let network = Ipv6Addr::from_str(&self.network)
            .map_err(|e| Error::Corrupt(format!("network {}: {}", self.network, e)))?;
        if self.prefix_length > 128 {
            return Err(Error::Corrupt(format!("prefix length {}", self.prefix_length)))
        }
        let (start, end) = prefix_range(u128::from(network), self.prefix_length);
        let att = attribution(
            &self.country_code, &self.rir, &self.date_allocated, &self.status
        )?;
        Ok(DisjointRange::new(start, end, att))
    }
}


//------------ Tables --------------------------------------------------------

/// The content of a store, each range table sorted by its start column.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Tables {
    pub ipv4_ranges: Vec<Ipv4Row>,
    pub ipv6_ranges: Vec<Ipv6Row>,
    pub metadata: Vec<MetadataRow>
}

impl Tables {
    pub fn from_generation(generation: &IndexGeneration) -> Self {
        Tables {
            ipv4_ranges: generation.v4().iter().map(Ipv4Row::from_range).collect(),
            ipv6_ranges: generation.v6().iter().flat_map(Ipv6Row::from_range).collect(),
            metadata: Vec::new()
        }
    }

    /// Inserts or replaces a metadata entry, stamped with the current time.
    pub fn set_metadata(&mut self, key: &str, value: &str) {
        let updated_at = Utc::now().to_rfc3339();
        match self.metadata.iter_mut().find(|row| row.key == key) {
            Some(row) => {
                row.value = value.to_string();
                row.updated_at = updated_at;
            }
            None => self.metadata.push(MetadataRow {
                key: key.to_string(),
                value: value.to_string(),
                updated_at
            })
        }
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.iter()
            .find(|row| row.key == key)
            .map(|row| row.value.as_str())
    }

    /// Sorts the range tables by start address.
    fn sort(&mut self) {
        self.ipv4_ranges.sort_by_key(|row| row.start_ip);
        self.ipv6_ranges.sort_by_key(|row| {
            Ipv6Addr::from_str(&row.network).map(u128::from).unwrap_or(0)
        });
    }

    /// Rebuilds the indexes from the stored rows.
    pub fn to_generation(&self) -> Result<IndexGeneration, Error> {
        let v4 = self.ipv4_ranges.iter()
            .map(Ipv4Row::to_range)
            .collect::<Result<Vec<_>, _>>()?;
        let v6 = self.ipv6_ranges.iter()
            .map(Ipv6Row::to_range)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(IndexGeneration::new(
            Ipv4Index::build(v4)?,
            Ipv6Index::build(merge_adjacent(v6))?
        ))
    }
}


//------------ RangeStore ----------------------------------------------------

/// Storage for the tables.
pub trait RangeStore {
    /// Bulk loads all tables, replacing whatever was stored before. Readers
    /// see either the old or the new content, never a mix.
    fn replace(&mut self, tables: Tables) -> Result<(), Error>;

    /// Returns the stored tables, or `None` if nothing was stored yet.
    fn load(&self) -> Result<Option<Tables>, Error>;
}


//------------ MemoryStore ---------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Option<Tables>
}

impl RangeStore for MemoryStore {
    fn replace(&mut self, mut tables: Tables) -> Result<(), Error> {
        tables.sort();
        self.tables = Some(tables);
        Ok(())
    }

    fn load(&self) -> Result<Option<Tables>, Error> {
        Ok(self.tables.clone())
    }
}


//------------ SnapshotStore -------------------------------------------------

/// Keeps the tables in a single binary file. A new snapshot is written next
/// to the old one and renamed over it.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    path: PathBuf
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotStore { path: path.into() }
    }

    pub fn path(&self) -> &Path { &self.path }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl RangeStore for SnapshotStore {
    fn replace(&mut self, mut tables: Tables) -> Result<(), Error> {
        tables.sort();

        let tmp = self.tmp_path();
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, &tables)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        info!(
            "stored {} ipv4 and {} ipv6 rows in {}",
            tables.ipv4_ranges.len(), tables.ipv6_ranges.len(), self.path.display()
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<Tables>, Error> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::IoError(e))
        };
        let tables = bincode::deserialize_from(BufReader::new(file))?;
        Ok(Some(tables))
    }
}


//------------ Error --------------------------------------------------------

#[derive(Debug, Display)]
pub enum Error {
    #[display(fmt = "{}", _0)]
    IoError(io::Error),

    #[display(fmt = "Cannot encode or decode snapshot: {}", _0)]
    Encoding(bincode::Error),

    #[display(fmt = "Corrupt stored data: {}", _0)]
    Corrupt(String),

    #[display(fmt = "Stored ranges are inconsistent: {}", _0)]
    Invariant(InvariantViolation),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self { Error::IoError(e) }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self { Error::Encoding(e) }
}

impl From<delegations::Error> for Error {
    fn from(e: delegations::Error) -> Self { Error::Corrupt(e.to_string()) }
}

impl From<InvariantViolation> for Error {
    fn from(e: InvariantViolation) -> Self { Error::Invariant(e) }
}

impl fmt::Display for Tables {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} ipv4 rows, {} ipv6 rows, {} metadata entries",
            self.ipv4_ranges.len(),
            self.ipv6_ranges.len(),
            self.metadata.len()
        )
    }
}


//------------ Tests --------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegations::AllocationRecord;
    use crate::delegations::Resource;
    use crate::reconcile::reconcile;

    fn record(resource: Resource, cc: &str, registry: Registry) -> AllocationRecord {
        AllocationRecord::new(
            registry,
            resource,
            CountryCode::normalize(cc),
            AllocDate::from_str("20050101").unwrap(),
            Status::Allocated
        )
    }

    fn generation() -> IndexGeneration {
        let v6 = |s: &str| u128::from(Ipv6Addr::from_str(s).unwrap());
        IndexGeneration::build(reconcile(vec![
            record(Resource::V4 { start: 16843008, end: 16843263 }, "US", Registry::Arin),
            record(Resource::V4 { start: 3238002688, end: 3238004735 }, "NL", Registry::Ripe),
            record(Resource::V6 { network: v6("2001:db9::"), length: 32 }, "NL", Registry::Ripe),
            record(Resource::V6 { network: v6("2001:dba::"), length: 32 }, "NL", Registry::Ripe),
            record(Resource::V6 { network: v6("2400::"), length: 12 }, "JP", Registry::Apnic),
        ])).unwrap()
    }

    #[test]
    fn should_split_non_prefix_intervals_into_rows() {
        let tables = Tables::from_generation(&generation());
        assert_eq!(2, tables.ipv4_ranges.len());

        // The merged 2001:db9::-2001:dba:ffff:... interval needs two rows.
        assert_eq!(3, tables.ipv6_ranges.len());
        assert_eq!("2001:db9::", tables.ipv6_ranges[0].network);
        assert_eq!("2001:dba::", tables.ipv6_ranges[1].network);
        assert_eq!("RIPE", tables.ipv6_ranges[0].rir);
        assert_eq!("20050101", tables.ipv6_ranges[0].date_allocated);
    }

    #[test]
    fn generation_survives_a_round_trip() {
        let generation = generation();
        let tables = Tables::from_generation(&generation);
        let loaded = tables.to_generation().unwrap();
        assert_eq!(generation.v4().ranges(), loaded.v4().ranges());
        assert_eq!(generation.v6().ranges(), loaded.v6().ranges());
    }

    #[test]
    fn should_replace_metadata_entries() {
        let mut tables = Tables::default();
        tables.set_metadata("total_entries", "10");
        tables.set_metadata("total_entries", "12");
        tables.set_metadata("successful_rirs", "ARIN");
        assert_eq!(2, tables.metadata.len());
        assert_eq!(Some("12"), tables.metadata("total_entries"));
        assert_eq!(None, tables.metadata("missing"));
    }

    #[test]
    fn snapshot_store_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::new(dir.path().join("ip_country.db"));
        assert_eq!(None, store.load().unwrap());

        let mut tables = Tables::from_generation(&generation());
        tables.set_metadata("generation", "1");
        store.replace(tables.clone()).unwrap();
        assert_eq!(Some(tables), store.load().unwrap());
        assert!(!store.tmp_path().exists());

        store.replace(Tables::default()).unwrap();
        assert_eq!(Some(Tables::default()), store.load().unwrap());
    }

    #[test]
    fn memory_store_sorts_rows() {
        let mut tables = Tables::from_generation(&generation());
        tables.ipv4_ranges.reverse();
        tables.ipv6_ranges.reverse();

        let mut store = MemoryStore::default();
        store.replace(tables).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert!(loaded.ipv4_ranges[0].start_ip < loaded.ipv4_ranges[1].start_ip);
        assert_eq!("2001:db9::", loaded.ipv6_ranges[0].network);
        assert!(loaded.to_generation().is_ok());
    }

    #[test]
    fn should_reject_corrupt_rows() {
        let mut tables = Tables::from_generation(&generation());
        tables.ipv4_ranges[0].country_code = "usa".to_string();
        assert!(tables.to_generation().is_err());

        let mut tables = Tables::from_generation(&generation());
        tables.ipv6_ranges[0].network = "nonsense".to_string();
        assert!(tables.to_generation().is_err());
    }
}
