//! Dump IPv4 ranges as JSON or CSV, and read such dumps back.
use std::io;
use std::str::FromStr;
use crate::delegations;
use crate::delegations::AllocDate;
use crate::delegations::CountryCode;
use crate::delegations::Registry;
use crate::delegations::Status;
use crate::reconcile::Attribution;
use crate::reconcile::DisjointRange;
use crate::report::CountryStats;
use crate::store::Ipv4Row;


//------------ JSON ----------------------------------------------------------

/// The entry format expected by consumers of the JSON dump.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct JsonRange {
    pub start: u32,
    pub end: u32,
    pub country: String
}

/// Writes `[{"start": .., "end": .., "country": ..}, ..]`, indented.
pub fn write_json<'a, W, I>(writer: W, ranges: I) -> Result<usize, Error>
where W: io::Write, I: IntoIterator<Item = &'a DisjointRange<u32>> {
    let entries: Vec<JsonRange> = ranges.into_iter()
        .map(|range| JsonRange {
            start: range.start(),
            end: range.end(),
            country: range.country().to_string()
        })
        .collect();
    serde_json::to_writer_pretty(writer, &entries)?;
    Ok(entries.len())
}

/// Reads a JSON dump. The dump carries no registry, date or status, so the
/// returned entries only have start, end and country.
pub fn read_json<R: io::Read>(reader: R) -> Result<Vec<JsonRange>, Error> {
    let entries: Vec<JsonRange> = serde_json::from_reader(reader)?;
    for entry in &entries {
        CountryCode::from_str(&entry.country)?;
        if entry.start > entry.end {
            return Err(Error::Invalid(format!(
                "range {}-{} ends before it starts", entry.start, entry.end
            )))
        }
    }
    Ok(entries)
}


//------------ CSV -----------------------------------------------------------

/// Writes the columns `start_ip, end_ip, country_code, rir, date_allocated,
/// status` with a header row. Addresses are written as integers.
pub fn write_csv<'a, W, I>(writer: W, ranges: I) -> Result<usize, Error>
where W: io::Write, I: IntoIterator<Item = &'a DisjointRange<u32>> {
    let mut writer = csv::Writer::from_writer(writer);
    let mut count = 0;
    for range in ranges {
        writer.serialize(Ipv4Row::from_range(range))?;
        count += 1;
        if count % 50_000 == 0 {
            debug!("exported {} rows", count);
        }
    }
    writer.flush()?;
    Ok(count)
}

pub fn read_csv<R: io::Read>(reader: R) -> Result<Vec<DisjointRange<u32>>, Error> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut res = Vec::new();
    for row in reader.deserialize() {
        let row: Ipv4Row = row?;
        let attribution = Attribution::new(
            CountryCode::from_str(&row.country_code)?,
            Registry::from_str(&row.rir)?,
            AllocDate::from_str(&row.date_allocated)?,
            Status::from_str(&row.status)?
        );
        res.push(DisjointRange::new(row.start_ip, row.end_ip, attribution));
    }
    Ok(res)
}


//------------ Country statistics --------------------------------------------

/// Writes one row per country, largest total address count first.
pub fn write_country_stats<W: io::Write>(
    writer: W,
    stats: &CountryStats
) -> Result<usize, Error> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(&[
        "country_code", "allocation_count", "total_ips",
        "first_allocation", "last_allocation"
    ])?;

    let rows = stats.by_total();
    for (cc, stat) in &rows {
        let first = stat.first_allocation()
            .map(|d| d.to_string())
            .unwrap_or_else(|| AllocDate::UNKNOWN.to_string());
        let last = stat.last_allocation()
            .map(|d| d.to_string())
            .unwrap_or_else(|| AllocDate::UNKNOWN.to_string());
        writer.write_record(&[
            cc.to_string(),
            stat.ranges().to_string(),
            stat.addresses().to_string(),
            first,
            last
        ])?;
    }
    writer.flush()?;
    Ok(rows.len())
}


//------------ Error --------------------------------------------------------

#[derive(Debug, Display)]
pub enum Error {
    #[display(fmt = "{}", _0)]
    IoError(io::Error),

    #[display(fmt = "JSON error: {}", _0)]
    JsonError(serde_json::Error),

    #[display(fmt = "CSV error: {}", _0)]
    CsvError(csv::Error),

    #[display(fmt = "Invalid exported data: {}", _0)]
    Invalid(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self { Error::IoError(e) }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self { Error::JsonError(e) }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self { Error::CsvError(e) }
}

impl From<delegations::Error> for Error {
    fn from(e: delegations::Error) -> Self { Error::Invalid(e.to_string()) }
}


//------------ Tests --------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges() -> Vec<DisjointRange<u32>> {
        let att = |cc: &str, registry, date: &str, status| Attribution::new(
            CountryCode::normalize(cc),
            registry,
            AllocDate::from_str(date).unwrap(),
            status
        );
        vec![
            DisjointRange::new(16777216, 16777471, att("AU", Registry::Apnic, "20110811", Status::Assigned)),
            DisjointRange::new(16843008, 16843263, att("US", Registry::Arin, "", Status::Allocated)),
            DisjointRange::new(3238002688, 3238004735, att("NL", Registry::Ripe, "19930901", Status::Allocated)),
            DisjointRange::new(3238004736, 3238004991, att("ZZ", Registry::Ripe, "00000000", Status::Reserved)),
        ]
    }

    #[test]
    fn json_has_expected_shape() {
        let mut out = Vec::new();
        assert_eq!(4, write_json(&mut out, &ranges()).unwrap());

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            serde_json::json!({"start": 16843008, "end": 16843263, "country": "US"}),
            value[1]
        );
        assert!(String::from_utf8(out).unwrap().contains("\n  {"));
    }

    #[test]
    fn json_round_trip_keeps_start_end_country() {
        let ranges = ranges();
        let mut out = Vec::new();
        write_json(&mut out, &ranges).unwrap();

        let read = read_json(out.as_slice()).unwrap();
        let expected: Vec<(u32, u32, String)> = ranges.iter()
            .map(|r| (r.start(), r.end(), r.country().to_string()))
            .collect();
        let found: Vec<(u32, u32, String)> = read.into_iter()
            .map(|r| (r.start, r.end, r.country))
            .collect();
        assert_eq!(expected, found);
    }

    #[test]
    fn csv_round_trip_is_identical() {
        let ranges = ranges();
        let mut out = Vec::new();
        assert_eq!(4, write_csv(&mut out, &ranges).unwrap());

        let text = String::from_utf8(out.clone()).unwrap();
        let mut lines = text.lines();
        assert_eq!(Some("start_ip,end_ip,country_code,rir,date_allocated,status"), lines.next());
        assert_eq!(Some("16777216,16777471,AU,APNIC,20110811,assigned"), lines.next());
        assert_eq!(Some("16843008,16843263,US,ARIN,00000000,allocated"), lines.next());

        assert_eq!(ranges, read_csv(out.as_slice()).unwrap());
    }

    #[test]
    fn should_reject_invalid_dumps() {
        assert!(read_json(r#"[{"start": 5, "end": 4, "country": "US"}]"#.as_bytes()).is_err());
        assert!(read_json(r#"[{"start": 1, "end": 4, "country": "us"}]"#.as_bytes()).is_err());
        assert!(read_json(r#"{"start": 1}"#.as_bytes()).is_err());

        let csv = "start_ip,end_ip,country_code,rir,date_allocated,status\n1,2,US,IANA,20000101,allocated\n";
        assert!(read_csv(csv.as_bytes()).is_err());
    }

    #[test]
    fn should_write_country_stats() {
        let stats = CountryStats::from_ranges(&ranges());
        let mut out = Vec::new();
        assert_eq!(4, write_country_stats(&mut out, &stats).unwrap());

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!("country_code,allocation_count,total_ips,first_allocation,last_allocation", lines[0]);
        assert_eq!("NL,1,2048,19930901,19930901", lines[1]);
        assert!(lines.contains(&"US,1,256,00000000,00000000"));
    }
}
