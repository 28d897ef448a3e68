//! The lookup entry point and the currently published index generation.
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use parking_lot::RwLock;
use crate::delegations::AllocDate;
use crate::delegations::CountryCode;
use crate::delegations::Registry;
use crate::delegations::Status;
use crate::index::Ipv4Index;
use crate::index::Ipv6Index;
use crate::ip::Address;
use crate::ip::AddressError;
use crate::ip::AddressFamily;
use crate::ip::IpAddress;
use crate::reconcile::InvariantViolation;
use crate::reconcile::Reconciled;


//------------ IndexGeneration -----------------------------------------------

/// One complete, immutable pair of indexes. A new generation is built for
/// every ingestion run and replaces the previous one as a whole.
#[derive(Clone, Debug, Default)]
pub struct IndexGeneration {
    id: u64,
    v4: Ipv4Index,
    v6: Ipv6Index
}

impl IndexGeneration {
    pub fn new(v4: Ipv4Index, v6: Ipv6Index) -> Self {
        IndexGeneration { id: 0, v4, v6 }
    }

    /// Builds both indexes from reconciled ranges, refusing ranges that
    /// overlap or are out of order.
    pub fn build(reconciled: Reconciled) -> Result<Self, InvariantViolation> {
        let v4 = Ipv4Index::build(reconciled.v4)?;
        let v6 = Ipv6Index::build(reconciled.v6)?;
        Ok(IndexGeneration::new(v4, v6))
    }

    /// The generation number assigned when it was published, zero before.
    pub fn id(&self) -> u64 { self.id }
    pub fn v4(&self) -> &Ipv4Index { &self.v4 }
    pub fn v6(&self) -> &Ipv6Index { &self.v6 }

    pub fn lookup(&self, address: IpAddress) -> LookupResult {
        match address {
            IpAddress::V4(value) => match self.v4.lookup(value) {
                Some(range) => LookupResult::Allocated(Allocation {
                    address,
                    country: range.country(),
                    registry: range.registry(),
                    date: range.date(),
                    status: range.status(),
                    first: range.start().to_ip_string(),
                    last: range.end().to_ip_string(),
                    network: None
                }),
                None => LookupResult::NotAllocated(address)
            },
            IpAddress::V6(value) => match self.v6.longest_prefix(value) {
                Some((range, network, length)) => LookupResult::Allocated(Allocation {
                    address,
                    country: range.country(),
                    registry: range.registry(),
                    date: range.date(),
                    status: range.status(),
                    first: range.start().to_ip_string(),
                    last: range.end().to_ip_string(),
                    network: Some(format!("{}/{}", network.to_ip_string(), length))
                }),
                None => LookupResult::NotAllocated(address)
            }
        }
    }
}


//------------ Allocation ----------------------------------------------------

/// The holder of an address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Allocation {
    address: IpAddress,
    country: CountryCode,
    registry: Registry,
    date: AllocDate,
    status: Status,
    first: String,
    last: String,
    network: Option<String>
}

impl Allocation {
    pub fn address(&self) -> IpAddress { self.address }
    pub fn country(&self) -> CountryCode { self.country }
    pub fn registry(&self) -> Registry { self.registry }
    pub fn date(&self) -> AllocDate { self.date }
    pub fn status(&self) -> Status { self.status }

    /// The first and last address of the holding range.
    pub fn range(&self) -> (&str, &str) { (&self.first, &self.last) }

    /// For IPv6, the matched network in CIDR notation.
    pub fn network(&self) -> Option<&str> { self.network.as_ref().map(String::as_str) }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "IP: {}", self.address)?;
        writeln!(f, "Country: {}", self.country)?;
        writeln!(f, "RIR: {}", self.registry)?;
        writeln!(f, "Date Allocated: {}", self.date)?;
        writeln!(f, "Status: {}", self.status)?;
        write!(f, "IP Version: {}", self.address.family().version())?;
        if let Some(network) = &self.network {
            write!(f, "\nNetwork: {}", network)?;
        }
        Ok(())
    }
}


//------------ LookupResult --------------------------------------------------

/// The outcome of a lookup for a valid address. Not being allocated is an
/// ordinary answer: reserved and private space is never published by any
/// registry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LookupResult {
    Allocated(Allocation),
    NotAllocated(IpAddress)
}

impl LookupResult {
    pub fn allocation(&self) -> Option<&Allocation> {
        match self {
            LookupResult::Allocated(allocation) => Some(allocation),
            LookupResult::NotAllocated(_) => None
        }
    }

    pub fn is_allocated(&self) -> bool { self.allocation().is_some() }
}

impl fmt::Display for LookupResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LookupResult::Allocated(allocation) => fmt::Display::fmt(allocation, f),
            LookupResult::NotAllocated(address) => {
                write!(f, "No information found for {}", address)
            }
        }
    }
}


//------------ Lookup --------------------------------------------------------

/// Answers lookups against the current generation.
///
/// Publishing swaps the shared reference in one step. Callers holding an
/// older generation keep using it until they drop it, and never see a
/// generation that is still being built.
#[derive(Debug)]
pub struct Lookup {
    current: RwLock<Arc<IndexGeneration>>
}

impl Lookup {
    pub fn new() -> Self {
        Lookup { current: RwLock::new(Arc::new(IndexGeneration::default())) }
    }

    /// Publishes a generation, numbering it after the current one. Returns
    /// the assigned generation number.
    pub fn publish(&self, mut generation: IndexGeneration) -> u64 {
        let mut current = self.current.write();
        generation.id = current.id + 1;
        let id = generation.id;
        *current = Arc::new(generation);
        info!(
            "published index generation {} ({} ipv4, {} ipv6 ranges)",
            id, current.v4.len(), current.v6.len()
        );
        id
    }

    /// The current generation. The read lock is held only to clone the
    /// reference.
    pub fn current(&self) -> Arc<IndexGeneration> {
        self.current.read().clone()
    }

    /// Looks up a textual address. Fails only if the text is not an IPv4 or
    /// IPv6 address.
    pub fn lookup(&self, query: &str) -> Result<LookupResult, AddressError> {
        let address = IpAddress::from_str(query)?;
        Ok(self.current().lookup(address))
    }

    /// Looks up many addresses against one generation, keeping their order.
    pub fn lookup_all<'a, I>(&self, queries: I) -> Vec<Result<LookupResult, AddressError>>
    where I: IntoIterator<Item = &'a str> {
        let generation = self.current();
        queries.into_iter()
            .map(|query| IpAddress::from_str(query).map(|a| generation.lookup(a)))
            .collect()
    }

    /// The number of ranges per family in the current generation.
    pub fn sizes(&self) -> Vec<(AddressFamily, usize)> {
        let generation = self.current();
        vec![
            (AddressFamily::Ipv4, generation.v4.len()),
            (AddressFamily::Ipv6, generation.v6.len()),
        ]
    }
}

impl Default for Lookup {
    fn default() -> Self { Self::new() }
}


//------------ Tests --------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use crate::delegations::AllocationRecord;
    use crate::delegations::Resource;
    use crate::reconcile::reconcile;

    fn record(resource: Resource, cc: &str) -> AllocationRecord {
        AllocationRecord::new(
            Registry::Apnic,
            resource,
            CountryCode::normalize(cc),
            AllocDate::from_str("20110811").unwrap(),
            Status::Assigned
        )
    }

    fn generation() -> IndexGeneration {
        IndexGeneration::build(reconcile(vec![
            record(Resource::V4 { start: 16843008, end: 16843263 }, "US"),
            record(Resource::V6 { network: 0x2000 << 112, length: 8 }, "US"),
            record(Resource::V6 { network: 0x2001_0db8 << 96, length: 32 }, "NL"),
        ])).unwrap()
    }

    #[test]
    fn should_dispatch_by_family() {
        let lookup = Lookup::new();
        lookup.publish(generation());

        let res = lookup.lookup("1.1.1.1").unwrap();
        let allocation = res.allocation().unwrap();
        assert_eq!("US", allocation.country().as_str());
        assert_eq!(Registry::Apnic, allocation.registry());
        assert_eq!(("1.1.1.0", "1.1.1.255"), allocation.range());
        assert_eq!(None, allocation.network());

        let res = lookup.lookup("2001:db8::1").unwrap();
        let allocation = res.allocation().unwrap();
        // 2001:db8::/32 sits inside 2000::/8 and adds nothing.
        assert_eq!("US", allocation.country().as_str());
        assert_eq!(Some("2000::/8"), allocation.network());
    }

    #[test]
    fn gaps_are_not_allocated_and_garbage_is_rejected() {
        let lookup = Lookup::new();
        lookup.publish(generation());

        assert_eq!(
            LookupResult::NotAllocated(IpAddress::V4(0xc0a80101)),
            lookup.lookup("192.168.1.1").unwrap()
        );
        assert!(!lookup.lookup("3000::1").unwrap().is_allocated());
        assert!(lookup.lookup("not-an-ip").is_err());
        assert!(lookup.lookup("1.1.1.1.1").is_err());
    }

    #[test]
    fn empty_lookup_answers_not_allocated() {
        let lookup = Lookup::new();
        assert_eq!(0, lookup.current().id());
        assert!(!lookup.lookup("8.8.8.8").unwrap().is_allocated());
    }

    #[test]
    fn should_keep_query_order_in_bulk_lookup() {
        let lookup = Lookup::new();
        lookup.publish(generation());

        let res = lookup.lookup_all(vec!["1.1.1.1", "bogus", "10.0.0.1"]);
        assert_eq!(3, res.len());
        assert!(res[0].as_ref().unwrap().is_allocated());
        assert!(res[1].is_err());
        assert!(!res[2].as_ref().unwrap().is_allocated());
    }

    #[test]
    fn publishing_replaces_whole_generation() {
        let lookup = Lookup::new();
        assert_eq!(1, lookup.publish(generation()));
        let old = lookup.current();

        let other = IndexGeneration::build(reconcile(vec![
            record(Resource::V4 { start: 0, end: 255 }, "CA"),
        ])).unwrap();
        assert_eq!(2, lookup.publish(other));

        // Holders of the old generation keep a consistent view.
        assert_eq!(1, old.id());
        assert!(old.lookup(IpAddress::V4(16843009)).is_allocated());
        assert!(!old.lookup(IpAddress::V4(1)).is_allocated());

        let new = lookup.current();
        assert_eq!(2, new.id());
        assert!(!new.lookup(IpAddress::V4(16843009)).is_allocated());
        assert!(new.lookup(IpAddress::V4(1)).is_allocated());
        assert_eq!(vec![(AddressFamily::Ipv4, 1), (AddressFamily::Ipv6, 0)], lookup.sizes());
    }

    #[test]
    fn concurrent_readers_see_complete_generations() {
        let lookup = Arc::new(Lookup::new());
        lookup.publish(generation());

        let readers: Vec<_> = (0..4).map(|_| {
            let lookup = lookup.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    let generation = lookup.current();
                    let v4 = generation.lookup(IpAddress::V4(16843009)).is_allocated();
                    let v6 = generation.lookup(IpAddress::V6(0x2001_0db8 << 96)).is_allocated();
                    // Every published generation holds both or neither.
                    assert_eq!(v4, v6);
                }
            })
        }).collect();

        for _ in 0..50 {
            lookup.publish(generation());
            lookup.publish(IndexGeneration::default());
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
