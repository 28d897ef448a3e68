//! Point lookup over reconciled ranges.
use crate::ip::enclosing_prefix;
use crate::ip::Address;
use crate::reconcile::verify;
use crate::reconcile::DisjointRange;
use crate::reconcile::InvariantViolation;


//------------ RangeIndex ----------------------------------------------------

/// An immutable, sorted array of disjoint ranges for one address family.
///
/// Lookups are a binary search for the last range starting at or before the
/// address, followed by a check against that range's end. Addresses in gaps
/// between ranges are simply not found.
#[derive(Clone, Debug)]
pub struct RangeIndex<A> {
    ranges: Vec<DisjointRange<A>>
}

pub type Ipv4Index = RangeIndex<u32>;
pub type Ipv6Index = RangeIndex<u128>;

impl<A: Address> RangeIndex<A> {
    pub fn empty() -> Self {
        RangeIndex { ranges: Vec::new() }
    }

    /// Builds the index. Fails if the ranges are not strictly ascending and
    /// disjoint, in which case nothing may be served from them.
    pub fn build(ranges: Vec<DisjointRange<A>>) -> Result<Self, InvariantViolation> {
        verify(&ranges)?;
        Ok(RangeIndex { ranges })
    }

    pub fn lookup(&self, address: A) -> Option<&DisjointRange<A>> {
        let pos = self.ranges.partition_point(|range| range.start() <= address);
        if pos == 0 {
            return None
        }
        let candidate = &self.ranges[pos - 1];
        if address <= candidate.end() {
            Some(candidate)
        } else {
            None
        }
    }

    pub fn ranges(&self) -> &[DisjointRange<A>] { &self.ranges }

    pub fn iter(&self) -> impl Iterator<Item = &DisjointRange<A>> {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize { self.ranges.len() }

    pub fn is_empty(&self) -> bool { self.ranges.is_empty() }
}

impl RangeIndex<u128> {
    /// Longest prefix match: the range holding the address together with the
    /// most specific CIDR block that the registry data supports for it, i.e.
    /// the widest aligned block around the address that stays inside the
    /// holding range.
    pub fn longest_prefix(
        &self,
        address: u128
    ) -> Option<(&DisjointRange<u128>, u128, u8)> {
        let range = self.lookup(address)?;
        let (network, length) = enclosing_prefix(range.start(), range.end(), address)?;
        Some((range, network, length))
    }
}

impl<A: Address> Default for RangeIndex<A> {
    fn default() -> Self { Self::empty() }
}


//------------ Tests --------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;
    use std::str::FromStr;
    use crate::delegations::AllocDate;
    use crate::delegations::CountryCode;
    use crate::delegations::Registry;
    use crate::delegations::Status;
    use crate::ip::prefix_range;
    use crate::reconcile::Attribution;

    fn att(cc: &str) -> Attribution {
        Attribution::new(
            CountryCode::normalize(cc),
            Registry::Arin,
            AllocDate::Unknown,
            Status::Allocated
        )
    }

    fn v4_index() -> Ipv4Index {
        RangeIndex::build(vec![
            DisjointRange::new(16843008, 16843263, att("US")),
            DisjointRange::new(16843264, 16843519, att("AU")),
            DisjointRange::new(16844000, 16844000, att("CN")),
        ]).unwrap()
    }

    fn v6(s: &str) -> u128 {
        u128::from(Ipv6Addr::from_str(s).unwrap())
    }

    #[test]
    fn should_find_containing_range() {
        let index = v4_index();
        let found = index.lookup(16843009).unwrap();
        assert_eq!("US", found.country().as_str());

        assert_eq!("US", index.lookup(16843008).unwrap().country().as_str());
        assert_eq!("US", index.lookup(16843263).unwrap().country().as_str());
        assert_eq!("AU", index.lookup(16843264).unwrap().country().as_str());
        assert_eq!("CN", index.lookup(16844000).unwrap().country().as_str());
    }

    #[test]
    fn should_not_find_addresses_in_gaps() {
        let index = v4_index();
        assert!(index.lookup(0).is_none());
        assert!(index.lookup(16843007).is_none());
        assert!(index.lookup(16843520).is_none());
        assert!(index.lookup(16843999).is_none());
        assert!(index.lookup(::std::u32::MAX).is_none());
        assert!(Ipv4Index::empty().lookup(16843009).is_none());
    }

    #[test]
    fn lookup_agrees_with_linear_scan() {
        let index = v4_index();
        for address in 16842900..16844100u32 {
            let expected = index.iter().find(|r| r.contains(address));
            assert_eq!(expected, index.lookup(address));
            assert_eq!(index.lookup(address), index.lookup(address));
        }
    }

    #[test]
    fn should_refuse_overlapping_ranges() {
        let res = RangeIndex::build(vec![
            DisjointRange::new(100u32, 199, att("US")),
            DisjointRange::new(150u32, 249, att("CA")),
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn should_match_longest_prefix() {
        let (start, end) = prefix_range(v6("2001:db8::"), 32);
        let (jp_start, jp_end) = prefix_range(v6("2400::"), 12);
        let index = Ipv6Index::build(vec![
            DisjointRange::new(start, end, att("NL")),
            DisjointRange::new(jp_start, jp_end, att("JP")),
        ]).unwrap();

        let (range, network, length) = index.longest_prefix(v6("2001:db8:1::1")).unwrap();
        assert_eq!("NL", range.country().as_str());
        assert_eq!(start, network);
        assert_eq!(32, length);

        let (range, _, length) = index.longest_prefix(v6("2401::1")).unwrap();
        assert_eq!("JP", range.country().as_str());
        assert_eq!(12, length);

        assert!(index.longest_prefix(v6("2001:db9::")).is_none());
        assert!(index.longest_prefix(v6("::1")).is_none());
    }
}
