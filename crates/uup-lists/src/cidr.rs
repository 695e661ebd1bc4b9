//! IPv4 and IPv6 CIDR ranges.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Returned by searches that land on a `/0` range, distinguishing
/// "matched everything" from "no match" (0).
pub const CIDR_MATCH_ALL: u32 = u32::MAX;

/// What address forms a list accepts.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CidrParse {
    /// Bare addresses only.
    IpOnly,
    /// `addr/len` only.
    CidrOnly,
    /// Either; a bare address is a full-length range.
    IpOrCidr,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CidrV4 {
    pub addr: u32,
    pub mask: u32,
}

impl CidrV4 {
    pub fn new(addr: Ipv4Addr, maskbits: u32) -> Self {
        let mask = if maskbits == 0 { 0 } else { u32::MAX << (32 - maskbits) };
        Self { addr: u32::from(addr) & mask, mask }
    }

    pub fn maskbits(&self) -> u32 {
        self.mask.count_ones()
    }

    fn first(&self) -> u32 {
        self.addr & self.mask
    }

    fn last(&self) -> u32 {
        self.addr | !self.mask
    }

    pub fn contains_addr(&self, addr: u32) -> bool {
        addr & self.mask == self.addr & self.mask
    }

    pub fn collides(&self, other: &Self) -> bool {
        self.first() <= other.last() && other.first() <= self.last()
    }

    /// Sort order: by range start, wider (less specific) ranges first, so
    /// containment reduction only ever drops the later entry.
    pub fn sort_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.first().cmp(&other.first()).then(self.mask.cmp(&other.mask))
    }

    /// Binary-search order for a full-mask probe against a reduced
    /// (disjoint) array.
    pub fn find_cmp(probe: u32, member: &Self) -> std::cmp::Ordering {
        if probe < member.first() {
            std::cmp::Ordering::Less
        } else if probe > member.last() {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    }

    fn to_text(self, elide_full_mask: bool) -> String {
        let addr = Ipv4Addr::from(self.addr);

        if elide_full_mask && self.mask == u32::MAX {
            addr.to_string()
        } else {
            format!("{addr}/{}", self.maskbits())
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CidrV6 {
    pub addr: u128,
    pub maskbits: u32,
}

impl CidrV6 {
    pub fn new(addr: Ipv6Addr, maskbits: u32) -> Self {
        Self { addr: u128::from(addr) & Self::mask_of(maskbits), maskbits }
    }

    fn mask_of(maskbits: u32) -> u128 {
        if maskbits == 0 {
            0
        } else {
            u128::MAX << (128 - maskbits)
        }
    }

    fn first(&self) -> u128 {
        self.addr & Self::mask_of(self.maskbits)
    }

    fn last(&self) -> u128 {
        self.addr | !Self::mask_of(self.maskbits)
    }

    pub fn contains_addr(&self, addr: u128) -> bool {
        addr & Self::mask_of(self.maskbits) == self.first()
    }

    pub fn collides(&self, other: &Self) -> bool {
        self.first() <= other.last() && other.first() <= self.last()
    }

    pub fn sort_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.first().cmp(&other.first()).then(self.maskbits.cmp(&other.maskbits))
    }

    pub fn find_cmp(probe: u128, member: &Self) -> std::cmp::Ordering {
        if probe < member.first() {
            std::cmp::Ordering::Less
        } else if probe > member.last() {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    }

    fn to_text(self, elide_full_mask: bool) -> String {
        let addr = Ipv6Addr::from(self.addr);

        if elide_full_mask && self.maskbits == 128 {
            addr.to_string()
        } else {
            format!("[{addr}]/{}", self.maskbits)
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cidr {
    V4(CidrV4),
    V6(CidrV6),
}

impl Cidr {
    /// Parse one address/range from the front of `text`, returning the
    /// range and the number of bytes consumed. How much syntax is
    /// accepted depends on `how`; a trailing `/len` under
    /// [`CidrParse::IpOnly`] is left unconsumed.
    pub fn scan(text: &str, how: CidrParse) -> Option<(Self, usize)> {
        let addr_len = text
            .find(|c: char| !(c.is_ascii_hexdigit() || c == '.' || c == ':'))
            .unwrap_or(text.len());
        let addr_text = &text[..addr_len];

        if addr_text.is_empty() {
            return None;
        }

        let slash_len = text[addr_len..]
            .strip_prefix('/')
            .map(|rest| {
                let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
                digits + 1
            })
            .filter(|&l| l > 1);

        if let Ok(v4) = addr_text.parse::<Ipv4Addr>() {
            return match (how, slash_len) {
                (CidrParse::IpOnly, _) | (CidrParse::IpOrCidr, None) => {
                    Some((Self::V4(CidrV4::new(v4, 32)), addr_len))
                }
                (CidrParse::CidrOnly | CidrParse::IpOrCidr, Some(sl)) => {
                    let bits: u32 = text[addr_len + 1..addr_len + sl].parse().ok()?;
                    (bits <= 32).then(|| (Self::V4(CidrV4::new(v4, bits)), addr_len + sl))
                }
                (CidrParse::CidrOnly, None) => None,
            };
        }

        if let Ok(v6) = addr_text.parse::<Ipv6Addr>() {
            return match (how, slash_len) {
                (CidrParse::IpOnly, _) | (CidrParse::IpOrCidr, None) => {
                    Some((Self::V6(CidrV6::new(v6, 128)), addr_len))
                }
                (CidrParse::CidrOnly | CidrParse::IpOrCidr, Some(sl)) => {
                    let bits: u32 = text[addr_len + 1..addr_len + sl].parse().ok()?;
                    (bits <= 128).then(|| (Self::V6(CidrV6::new(v6, bits)), addr_len + sl))
                }
                (CidrParse::CidrOnly, None) => None,
            };
        }

        None
    }

    pub fn to_text(self, how: CidrParse) -> String {
        let elide = how != CidrParse::CidrOnly;

        match self {
            Self::V4(c) => c.to_text(elide),
            Self::V6(c) => c.to_text(elide),
        }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text(CidrParse::IpOrCidr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_v4() {
        let (c, used) = Cidr::scan("1.2.3.0/24", CidrParse::IpOrCidr).expect("parses");
        assert_eq!(used, 10);
        assert_eq!(c, Cidr::V4(CidrV4::new(Ipv4Addr::new(1, 2, 3, 0), 24)));

        let (c, used) = Cidr::scan("1.2.3.4 rest", CidrParse::IpOrCidr).expect("parses");
        assert_eq!(used, 7);
        assert_eq!(c, Cidr::V4(CidrV4::new(Ipv4Addr::new(1, 2, 3, 4), 32)));
    }

    #[test]
    fn scan_v6() {
        let (c, used) = Cidr::scan("1:2:3:4::/64", CidrParse::IpOrCidr).expect("parses");
        assert_eq!(used, 12);
        assert_eq!(c, Cidr::V6(CidrV6::new("1:2:3:4::".parse().expect("addr"), 64)));
    }

    #[test]
    fn how_restricts_forms() {
        assert!(Cidr::scan("1.2.3.4/24", CidrParse::CidrOnly).is_some());
        assert!(Cidr::scan("1.2.3.4", CidrParse::CidrOnly).is_none());
        assert!(Cidr::scan("1.2.3", CidrParse::IpOnly).is_none());

        // IpOnly stops at the slash, leaving it unconsumed.
        let (_, used) = Cidr::scan("1.2.3.4/24", CidrParse::IpOnly).expect("parses");
        assert_eq!(used, 7);
    }

    #[test]
    fn containment() {
        let wide = CidrV4::new(Ipv4Addr::new(1, 2, 3, 0), 24);
        let narrow = CidrV4::new(Ipv4Addr::new(1, 2, 3, 4), 32);
        assert!(wide.collides(&narrow));
        assert_eq!(wide.sort_cmp(&narrow), std::cmp::Ordering::Less);
    }

    #[test]
    fn rendering() {
        let v4 = Cidr::V4(CidrV4::new(Ipv4Addr::new(5, 6, 7, 8), 32));
        assert_eq!(v4.to_text(CidrParse::IpOrCidr), "5.6.7.8");
        assert_eq!(v4.to_text(CidrParse::CidrOnly), "5.6.7.8/32");

        let v6 = Cidr::V6(CidrV6::new("1:2:3:4::".parse().expect("addr"), 64));
        assert_eq!(v6.to_text(CidrParse::IpOrCidr), "[1:2:3:4::]/64");
    }
}
