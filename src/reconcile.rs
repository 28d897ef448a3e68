//! Reconcile overlapping delegations into disjoint ranges.
//!
//! Records of all registries are swept per address family in order of
//! ascending start address, wider ranges first when two start at the same
//! address. The sweep keeps a frontier, the highest address claimed so far.
//! A record overlapping the frontier only keeps the part above it, a record
//! entirely below it is dropped. Contested addresses therefore belong to the
//! record that comes first in this scan order: the earlier start, or the
//! wider range at equal starts. Records with identical spans keep the order
//! in which they were given, which is registry order for a full run.
//!
//! IPv6 prefixes are handled as the integer interval they cover, so that a
//! trimmed prefix is kept as an interval rather than being split into new
//! prefixes.
use std::fmt;
use crate::delegations::AllocDate;
use crate::delegations::AllocationRecord;
use crate::delegations::CountryCode;
use crate::delegations::Registry;
use crate::delegations::Resource;
use crate::delegations::Status;
use crate::ip::interval_size;
use crate::ip::prefix_range;
use crate::ip::Address;


//------------ Attribution ---------------------------------------------------

/// Who holds a range, and since when.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Attribution {
    country: CountryCode,
    registry: Registry,
    date: AllocDate,
    status: Status
}

impl Attribution {
    pub fn new(
        country: CountryCode,
        registry: Registry,
        date: AllocDate,
        status: Status
    ) -> Self {
        Attribution { country, registry, date, status }
    }

    pub fn country(&self) -> CountryCode { self.country }
    pub fn registry(&self) -> Registry { self.registry }
    pub fn date(&self) -> AllocDate { self.date }
    pub fn status(&self) -> Status { self.status }
}

impl<'a> From<&'a AllocationRecord> for Attribution {
    fn from(record: &'a AllocationRecord) -> Self {
        Attribution::new(
            record.country(),
            record.registry(),
            record.date(),
            record.status()
        )
    }
}


//------------ DisjointRange -------------------------------------------------

/// An inclusive address interval with a single attribution. Ranges of the
/// same family produced by one reconciliation never overlap.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DisjointRange<A> {
    start: A,
    end: A,
    attribution: Attribution
}

impl<A: Address> DisjointRange<A> {
    pub fn new(start: A, end: A, attribution: Attribution) -> Self {
        DisjointRange { start, end, attribution }
    }

    pub fn start(&self) -> A { self.start }
    pub fn end(&self) -> A { self.end }
    pub fn attribution(&self) -> &Attribution { &self.attribution }
    pub fn country(&self) -> CountryCode { self.attribution.country }
    pub fn registry(&self) -> Registry { self.attribution.registry }
    pub fn date(&self) -> AllocDate { self.attribution.date }
    pub fn status(&self) -> Status { self.attribution.status }

    pub fn contains(&self, address: A) -> bool {
        self.start <= address && address <= self.end
    }

    /// The number of addresses in the range.
    pub fn size(&self) -> u128 {
        interval_size(self.start, self.end)
    }

    /// Whether `next` continues this range without a gap and with the same
    /// attribution, so that both can be stored as one.
    fn joins(&self, next: &DisjointRange<A>) -> bool {
        self.attribution == next.attribution
            && self.end.successor() == Some(next.start)
    }
}

impl<A: Address> fmt::Display for DisjointRange<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}-{} {} {} {} {}",
            self.start.to_ip_string(),
            self.end.to_ip_string(),
            self.attribution.country,
            self.attribution.registry,
            self.attribution.date,
            self.attribution.status
        )
    }
}


//------------ FamilyStats ---------------------------------------------------

/// What happened to the records of one family during the sweep.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FamilyStats {
    /// Records fed into the sweep.
    pub claims: usize,

    /// Records that lost part of their span to an earlier claim.
    pub trimmed: usize,

    /// Records that lost all of their span to earlier claims.
    pub subsumed: usize,

    /// Ranges folded into an adjacent range with the same attribution.
    pub merged: usize,

    /// Disjoint ranges produced.
    pub ranges: usize
}


//------------ Reconciled ----------------------------------------------------

/// The disjoint, ascending ranges for both families.
#[derive(Clone, Debug, Default)]
pub struct Reconciled {
    pub v4: Vec<DisjointRange<u32>>,
    pub v6: Vec<DisjointRange<u128>>,
    pub v4_stats: FamilyStats,
    pub v6_stats: FamilyStats
}

/// Reconciles records from any number of registries. The records must be
/// given in a deterministic order; for a full run that is the registry order
/// of [`Registry::ALL`].
pub fn reconcile<I>(records: I) -> Reconciled
where I: IntoIterator<Item = AllocationRecord> {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();

    for record in records {
        let attribution = Attribution::from(&record);
        match record.resource() {
            Resource::V4 { start, end } => {
                v4.push(DisjointRange::new(start, end, attribution))
            }
            Resource::V6 { network, length } => {
                let (start, end) = prefix_range(network, length);
                v6.push(DisjointRange::new(start, end, attribution))
            }
        }
    }

    let (v4, v4_stats) = sweep(v4);
    let (v6, v6_stats) = sweep(v6);

    Reconciled { v4, v6, v4_stats, v6_stats }
}

/// Sorts the claims of one family and resolves overlaps.
///
/// The sort is stable so that claims over identical spans keep their input
/// order.
pub fn sweep<A: Address>(
    mut claims: Vec<DisjointRange<A>>
) -> (Vec<DisjointRange<A>>, FamilyStats) {
    let mut stats = FamilyStats { claims: claims.len(), ..Default::default() };

    claims.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut res: Vec<DisjointRange<A>> = Vec::with_capacity(claims.len());
    let mut frontier: Option<A> = None;

    for claim in claims {
        let start = match frontier {
            Some(claimed) if claimed >= claim.start => {
                match claimed.successor() {
                    Some(next) if next <= claim.end => {
                        stats.trimmed += 1;
                        next
                    }
                    _ => {
                        stats.subsumed += 1;
                        continue
                    }
                }
            }
            _ => claim.start
        };
        frontier = Some(claim.end);

        let range = DisjointRange::new(start, claim.end, claim.attribution);
        match res.last_mut() {
            Some(last) if last.joins(&range) => {
                last.end = range.end;
                stats.merged += 1;
            }
            _ => res.push(range)
        }
    }

    stats.ranges = res.len();
    (res, stats)
}

/// Folds adjacent ranges with the same attribution together. The input must
/// be ascending and disjoint.
pub fn merge_adjacent<A: Address>(
    ranges: impl IntoIterator<Item = DisjointRange<A>>
) -> Vec<DisjointRange<A>> {
    let mut res: Vec<DisjointRange<A>> = Vec::new();
    for range in ranges {
        match res.last_mut() {
            Some(last) if last.joins(&range) => last.end = range.end,
            _ => res.push(range)
        }
    }
    res
}

/// Checks that the ranges are well formed, strictly ascending and do not
/// overlap. An index must never be built from ranges failing this check.
pub fn verify<A: Address>(ranges: &[DisjointRange<A>]) -> Result<(), InvariantViolation> {
    for (pos, range) in ranges.iter().enumerate() {
        if range.start > range.end {
            return Err(InvariantViolation::inverted(pos, range))
        }
        if pos > 0 {
            let prev = &ranges[pos - 1];
            if prev.start >= range.start {
                return Err(InvariantViolation::unordered(pos, prev, range))
            }
            if prev.end >= range.start {
                return Err(InvariantViolation::overlap(pos, prev, range))
            }
        }
    }
    Ok(())
}


//------------ InvariantViolation --------------------------------------------

/// Reconciled ranges that cannot be served. This is a logic fault, never a
/// data problem.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum InvariantViolation {
    #[display(fmt = "Range ends before it starts: {}", _0)]
    Inverted(String),

    #[display(fmt = "Ranges not in ascending order: {}", _0)]
    Unordered(String),

    #[display(fmt = "Ranges overlap: {}", _0)]
    Overlap(String),
}

impl InvariantViolation {
    fn inverted<A: Address>(pos: usize, range: &DisjointRange<A>) -> Self {
        InvariantViolation::Inverted(
            format!("{} #{} {}", A::FAMILY, pos, range)
        )
    }

    fn unordered<A: Address>(
        pos: usize,
        prev: &DisjointRange<A>,
        range: &DisjointRange<A>
    ) -> Self {
        InvariantViolation::Unordered(
            format!("{} #{} {} after {}", A::FAMILY, pos, range, prev)
        )
    }

    fn overlap<A: Address>(
        pos: usize,
        prev: &DisjointRange<A>,
        range: &DisjointRange<A>
    ) -> Self {
        InvariantViolation::Overlap(
            format!("{} #{} {} with {}", A::FAMILY, pos, range, prev)
        )
    }
}


//------------ Tests --------------------------------------------------------
