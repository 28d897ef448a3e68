//! IP addresses, address families and prefix arithmetic.
use std::fmt;
use std::net::AddrParseError;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::str::FromStr;


//------------ AddressFamily -------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AddressFamily {
    Ipv4,
    Ipv6
}

impl AddressFamily {
    pub fn version(self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 4,
            AddressFamily::Ipv6 => 6
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6")
        }
    }
}


//------------ Address -------------------------------------------------------

/// The integer form of an address in one family. IPv4 addresses live in a
/// flat `u32` space, IPv6 addresses in `u128`.
pub trait Address: Copy + Ord + fmt::Debug + Send + Sync + Into<u128> + 'static {
    const MAX: Self;
    const FAMILY: AddressFamily;

    /// The next address, or `None` at the top of the space.
    fn successor(self) -> Option<Self>;

    /// Renders the address in its conventional textual form.
    fn to_ip_string(self) -> String;
}

impl Address for u32 {
    const MAX: u32 = ::std::u32::MAX;
    const FAMILY: AddressFamily = AddressFamily::Ipv4;

    fn successor(self) -> Option<Self> { self.checked_add(1) }

    fn to_ip_string(self) -> String { Ipv4Addr::from(self).to_string() }
}

impl Address for u128 {
    const MAX: u128 = ::std::u128::MAX;
    const FAMILY: AddressFamily = AddressFamily::Ipv6;

    fn successor(self) -> Option<Self> { self.checked_add(1) }

    fn to_ip_string(self) -> String { Ipv6Addr::from(self).to_string() }
}

/// Number of addresses in the inclusive interval, saturating at `u128::MAX`
/// for the complete IPv6 space.
pub fn interval_size<A: Address>(start: A, end: A) -> u128 {
    (end.into() - start.into()).saturating_add(1)
}


//------------ IpAddress -----------------------------------------------------

/// A single address as given in a lookup query.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum IpAddress {
    V4(u32),
    V6(u128)
}

impl IpAddress {
    pub fn family(&self) -> AddressFamily {
        match self {
            IpAddress::V4(_) => AddressFamily::Ipv4,
            IpAddress::V6(_) => AddressFamily::Ipv6
        }
    }
}

impl FromStr for IpAddress {
    type Err = AddressError;

    /// The family is decided by syntax alone: a colon means IPv6, a dot
    /// means IPv4. Anything else is rejected before parsing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(':') {
            let addr = Ipv6Addr::from_str(s)
                .map_err(|e| AddressError::parse(s, e))?;
            Ok(IpAddress::V6(u128::from(addr)))
        } else if s.contains('.') {
            let addr = Ipv4Addr::from_str(s)
                .map_err(|e| AddressError::parse(s, e))?;
            Ok(IpAddress::V4(u32::from(addr)))
        } else {
            Err(AddressError::NotAnAddress(s.to_string()))
        }
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpAddress::V4(value) => write!(f, "{}", Ipv4Addr::from(*value)),
            IpAddress::V6(value) => write!(f, "{}", Ipv6Addr::from(*value))
        }
    }
}


//------------ Prefix arithmetic ---------------------------------------------

/// The host part mask of an IPv6 prefix with the given length.
fn host_mask(length: u8) -> u128 {
    ::std::u128::MAX.checked_shr(u32::from(length)).unwrap_or(0)
}

/// Returns the first and last address covered by `address/length`. Host
/// bits in `address` are ignored.
pub fn prefix_range(address: u128, length: u8) -> (u128, u128) {
    let mask = host_mask(length);
    let network = address & !mask;
    (network, network | mask)
}

/// Whether the inclusive interval is exactly one CIDR block.
pub fn is_prefix(min: u128, max: u128) -> bool {
    if min > max {
        return false
    }

    // The longest common leading part of min and max is the only candidate
    // prefix. The interval is a prefix when min has all zeroes after that
    // part and max has all ones.
    let lead_in_common = (min ^ max).leading_zeros() as u8;
    let (lower_bound, upper_bound) = prefix_range(min, lead_in_common);

    min == lower_bound && max == upper_bound
}

/// Finds the shortest prefix containing `address` that lies entirely inside
/// the interval. Returns the network address and the prefix length.
pub fn enclosing_prefix(min: u128, max: u128, address: u128) -> Option<(u128, u8)> {
    if address < min || address > max {
        return None
    }
    (0..=128u8)
        .map(|length| (prefix_range(address, length), length))
        .find(|((network, last), _)| *network >= min && *last <= max)
        .map(|((network, _), length)| (network, length))
}

/// Splits the inclusive interval into the minimal list of CIDR blocks,
/// ascending.
pub fn prefixes(min: u128, max: u128) -> Vec<(u128, u8)> {
    let mut res = Vec::new();
    if min > max {
        return res
    }

    let mut start = min;
    loop {
        let remaining = max - start;

        // Bits of the largest block that still fits the remaining span.
        let fits = if remaining == ::std::u128::MAX {
            128
        } else {
            127 - (remaining + 1).leading_zeros()
        };
        let aligned = if start == 0 { 128 } else { start.trailing_zeros() };
        let bits = fits.min(aligned) as u8;

        let (network, last) = prefix_range(start, 128 - bits);
        res.push((network, 128 - bits));

        if last >= max {
            break
        }
        start = last + 1;
    }
    res
}


//------------ AddressError --------------------------------------------------

#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum AddressError {
    #[display(fmt = "Not an IP address: '{}'", _0)]
    NotAnAddress(String),

    #[display(fmt = "Invalid IP address: {}", _0)]
    ParseError(String),
}

impl AddressError {
    fn parse(s: &str, e: AddrParseError) -> Self {
        AddressError::ParseError(format!("'{}': {}", s, e))
    }
}


//------------ Tests --------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;

    fn v6(s: &str) -> u128 {
        u128::from(Ipv6Addr::from_str(s).unwrap())
    }

    #[test]
    fn should_parse_addresses_by_syntax() {
        assert_eq!(IpAddress::V4(0), IpAddress::from_str("0.0.0.0").unwrap());
        assert_eq!(IpAddress::V4(16843009), IpAddress::from_str("1.1.1.1").unwrap());
        assert_eq!(IpAddress::V4(65536), IpAddress::from_str(" 0.1.0.0 ").unwrap());
        assert_eq!(
            IpAddress::V6(v6("2001:db8::1")),
            IpAddress::from_str("2001:db8::1").unwrap()
        );

        assert_eq!(
            AddressError::NotAnAddress("yadiyada".to_string()),
            IpAddress::from_str("yadiyada").unwrap_err()
        );
        assert!(IpAddress::from_str("").is_err());
        assert!(IpAddress::from_str("1.1").is_err());
        assert!(IpAddress::from_str("256.0.0.1").is_err());
        assert!(IpAddress::from_str("2001:db8::g").is_err());
    }

    #[test]
    fn should_report_family() {
        assert_eq!(AddressFamily::Ipv4, IpAddress::from_str("10.0.0.0").unwrap().family());
        assert_eq!(AddressFamily::Ipv6, IpAddress::from_str("::1").unwrap().family());
        assert_eq!(AddressFamily::Ipv6, IpAddress::from_str("::ffff:1.2.3.4").unwrap().family());
    }

    #[test]
    fn should_compute_prefix_range() {
        assert_eq!((0, ::std::u128::MAX), prefix_range(v6("2001:db8::1"), 0));
        assert_eq!((v6("2001:db8::1"), v6("2001:db8::1")), prefix_range(v6("2001:db8::1"), 128));
        assert_eq!(
            (v6("2001:db8::"), v6("2001:db8:ffff:ffff:ffff:ffff:ffff:ffff")),
            prefix_range(v6("2001:db8:1::"), 32)
        );
    }

    #[test]
    fn test_range_is_prefix() {
        assert!(is_prefix(v6("2001:db8::"), v6("2001:db8:ffff:ffff:ffff:ffff:ffff:ffff")));
        assert!(is_prefix(0, ::std::u128::MAX));
        assert!(is_prefix(5, 5));
        assert!(is_prefix(4, 7));
        assert!(!is_prefix(4, 8));
        assert!(!is_prefix(2, 5));
        assert!(!is_prefix(8, 4));
    }

    #[test]
    fn should_split_interval_into_prefixes() {
        assert_eq!(vec![(0, 0)], prefixes(0, ::std::u128::MAX));
        assert_eq!(vec![(4, 126)], prefixes(4, 7));
        assert_eq!(vec![(2, 127), (4, 126), (8, 127), (10, 128)], prefixes(2, 10));

        let start = v6("2001:db8:8000::");
        let end = v6("2001:db9:ffff:ffff:ffff:ffff:ffff:ffff");
        assert_eq!(
            vec![(start, 33), (v6("2001:db9::"), 32)],
            prefixes(start, end)
        );
    }

    #[test]
    fn should_find_enclosing_prefix() {
        let (start, end) = prefix_range(v6("2001:db8::"), 32);
        assert_eq!(Some((start, 32)), enclosing_prefix(start, end, v6("2001:db8:1::1")));
        assert_eq!(None, enclosing_prefix(start, end, v6("2001:db9::")));

        // Trimmed interval: 2001:db8:8000::/33 is the widest block around
        // an address in its upper half.
        let trimmed = v6("2001:db8:8000::");
        assert_eq!(
            Some((trimmed, 33)),
            enclosing_prefix(trimmed, end, v6("2001:db8:9000::"))
        );
    }
}
