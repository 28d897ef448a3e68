//! Reporting of the ranges found
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use crate::delegations::AllocDate;
use crate::delegations::CountryCode;
use crate::delegations::Registry;
use crate::lookup::IndexGeneration;
use crate::reconcile::DisjointRange;


//------------ CountryStat --------------------------------------------------

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CountryStat {
    ranges: usize,
    addresses: u64,
    first: Option<AllocDate>,
    last: Option<AllocDate>
}

impl CountryStat {
    pub fn add(&mut self, range: &DisjointRange<u32>) {
        self.ranges += 1;
        self.addresses += range.size() as u64;

        // Unknown dates say nothing about when a country got its space.
        let date = range.date();
        if date != AllocDate::Unknown {
            if self.first.map_or(true, |first| date < first) {
                self.first = Some(date);
            }
            if self.last.map_or(true, |last| date > last) {
                self.last = Some(date);
            }
        }
    }

    pub fn ranges(&self) -> usize { self.ranges }
    pub fn addresses(&self) -> u64 { self.addresses }
    pub fn first_allocation(&self) -> Option<AllocDate> { self.first }
    pub fn last_allocation(&self) -> Option<AllocDate> { self.last }
}

impl fmt::Display for CountryStat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ranges: {}, Addresses: {}", self.ranges, self.addresses)?;
        if let (Some(first), Some(last)) = (self.first, self.last) {
            write!(f, ", Allocated: {} - {}", first, last)?;
        }
        Ok(())
    }
}


//------------ CountryStats -------------------------------------------------

/// This type keeps a map of country code to CountryStat, for IPv4 ranges.
#[derive(Clone, Debug, Default)]
pub struct CountryStats {
    stats: HashMap<CountryCode, CountryStat>
}

impl CountryStats {
    pub fn from_ranges<'a, I>(ranges: I) -> Self
    where I: IntoIterator<Item = &'a DisjointRange<u32>> {
        let mut res = CountryStats::default();
        for range in ranges {
            res.add(range);
        }
        res
    }

    pub fn add(&mut self, range: &DisjointRange<u32>) {
        self.stats.entry(range.country())
            .or_insert_with(CountryStat::default)
            .add(range);
    }

    pub fn get(&self, cc: CountryCode) -> Option<&CountryStat> {
        self.stats.get(&cc)
    }

    pub fn len(&self) -> usize { self.stats.len() }

    pub fn is_empty(&self) -> bool { self.stats.is_empty() }

    /// All countries, most addresses first. Ties are ordered by country code.
    pub fn by_total(&self) -> Vec<(CountryCode, &CountryStat)> {
        let mut res: Vec<_> = self.stats.iter().map(|(cc, stat)| (*cc, stat)).collect();
        res.sort_by(|a, b| {
            b.1.addresses.cmp(&a.1.addresses).then(a.0.cmp(&b.0))
        });
        res
    }

    /// The countries with the most ranges, at most `n`.
    pub fn top_by_ranges(&self, n: usize) -> Vec<(CountryCode, usize)> {
        let mut res: Vec<_> = self.stats.iter()
            .map(|(cc, stat)| (*cc, stat.ranges))
            .collect();
        res.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        res.truncate(n);
        res
    }
}

impl fmt::Display for CountryStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {

        #[derive(Eq, PartialEq)]
        struct CountryStatWithCode<'a> {
            cc: CountryCode,
            stat: &'a CountryStat
        }

        impl<'a> Ord for CountryStatWithCode<'a> {
            fn cmp(&self, other: &Self) -> Ordering {
                self.cc.cmp(&other.cc)
            }
        }

        impl<'a> PartialOrd for CountryStatWithCode<'a> {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        let mut countries: Vec<CountryStatWithCode> = self.stats.iter()
            .map(|(cc, stat)| CountryStatWithCode { cc: *cc, stat })
            .collect();

        countries.sort();
        for country in countries {
            writeln!(f, "{}: {}", country.cc, country.stat)?;
        }

        Ok(())
    }
}


//------------ Summary -------------------------------------------------------

/// The overview printed after a build.
#[derive(Clone, Debug)]
pub struct Summary {
    ipv4_ranges: usize,
    ipv6_ranges: usize,
    top_countries: Vec<(CountryCode, usize)>,
    registries: Vec<(Registry, usize)>
}

impl Summary {
    pub fn new(generation: &IndexGeneration) -> Self {
        let countries = CountryStats::from_ranges(generation.v4().iter());

        let mut per_registry: HashMap<Registry, usize> = HashMap::new();
        for range in generation.v4().iter() {
            *per_registry.entry(range.registry()).or_insert(0) += 1;
        }
        let mut registries: Vec<_> = per_registry.into_iter().collect();
        registries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        Summary {
            ipv4_ranges: generation.v4().len(),
            ipv6_ranges: generation.v6().len(),
            top_countries: countries.top_by_ranges(10),
            registries
        }
    }

    pub fn top_countries(&self) -> &[(CountryCode, usize)] { &self.top_countries }

    pub fn registries(&self) -> &[(Registry, usize)] { &self.registries }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "IPv4 ranges: {}", self.ipv4_ranges)?;
        writeln!(f, "IPv6 ranges: {}", self.ipv6_ranges)?;
        writeln!(f, "Total ranges: {}", self.ipv4_ranges + self.ipv6_ranges)?;
        writeln!(f)?;
        writeln!(f, "Top 10 countries by IPv4 allocations:")?;
        for (cc, count) in &self.top_countries {
            writeln!(f, "  {}: {}", cc, count)?;
        }
        writeln!(f)?;
        write!(f, "RIR distribution:")?;
        for (registry, count) in &self.registries {
            write!(f, "\n  {}: {}", registry, count)?;
        }
        Ok(())
    }
}


//------------ Tests --------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use crate::delegations::AllocationRecord;
    use crate::delegations::Resource;
    use crate::delegations::Status;
    use crate::reconcile::reconcile;

    fn record(start: u32, end: u32, cc: &str, registry: Registry, date: &str) -> AllocationRecord {
        AllocationRecord::new(
            registry,
            Resource::V4 { start, end },
            CountryCode::normalize(cc),
            AllocDate::from_str(date).unwrap(),
            Status::Allocated
        )
    }

    fn generation() -> IndexGeneration {
        IndexGeneration::build(reconcile(vec![
            record(0, 255, "US", Registry::Arin, "19950101"),
            record(512, 1023, "US", Registry::Arin, "20100101"),
            record(2048, 2048, "US", Registry::Arin, ""),
            record(4096, 4351, "NL", Registry::Ripe, "19930901"),
            record(8192, 8447, "JP", Registry::Apnic, "20000101"),
        ])).unwrap()
    }

    #[test]
    fn should_roll_up_per_country() {
        let generation = generation();
        let stats = CountryStats::from_ranges(generation.v4().iter());
        assert_eq!(3, stats.len());

        let us = stats.get(CountryCode::normalize("US")).unwrap();
        assert_eq!(3, us.ranges());
        assert_eq!(256 + 512 + 1, us.addresses());
        assert_eq!(Some(AllocDate::from_str("19950101").unwrap()), us.first_allocation());
        assert_eq!(Some(AllocDate::from_str("20100101").unwrap()), us.last_allocation());

        let order: Vec<String> = stats.by_total().iter().map(|(cc, _)| cc.to_string()).collect();
        assert_eq!(vec!["US", "JP", "NL"], order);
    }

    #[test]
    fn should_print_countries_sorted() {
        let generation = generation();
        let stats = CountryStats::from_ranges(generation.v4().iter());
        let text = stats.to_string();
        let codes: Vec<&str> = text.lines().map(|l| &l[..2]).collect();
        assert_eq!(vec!["JP", "NL", "US"], codes);
        assert!(text.contains("US: Ranges: 3, Addresses: 769, Allocated: 19950101 - 20100101"));
    }

    #[test]
    fn should_summarize_generation() {
        let summary = Summary::new(&generation());
        assert_eq!(
            vec![(CountryCode::normalize("US"), 3), (CountryCode::normalize("JP"), 1), (CountryCode::normalize("NL"), 1)],
            summary.top_countries().to_vec()
        );
        assert_eq!((Registry::Arin, 3), summary.registries()[0]);

        let text = summary.to_string();
        assert!(text.starts_with("IPv4 ranges: 5\nIPv6 ranges: 0\nTotal ranges: 5\n"));
        assert!(text.contains("  RIPE: 1"));
    }
}
