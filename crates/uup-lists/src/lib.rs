//! Primitive lookup structures for the UUP resolution core.
//!
//! Everything in this crate is immutable once built and cheap to share:
//! domain lists (reversed-name binary search), URL lists (prefix hash),
//! CIDR lists (most-specific range search), and sorted id sets, all
//! de-duplicated across owners through the content-addressed
//! [`ObjectHash`].

pub mod cidr;
pub mod cidrlist;
pub mod counters;
pub mod dnsname;
pub mod domainlist;
pub mod error;
pub mod fingerprint;
pub mod hash;
pub mod objecthash;
pub mod uint32list;
pub mod urllist;
pub mod urlnorm;
pub mod xray;

pub use cidr::{CidrParse, CidrV4, CidrV6, CIDR_MATCH_ALL};
pub use cidrlist::{CidrList, RandomPick};
pub use counters::UupCounters;
pub use domainlist::{DomainList, DomainListFlags, MatchKind};
pub use error::{ListError, Result};
pub use fingerprint::{Fingerprint, ObjectFingerprint};
pub use objecthash::ObjectHash;
pub use uint32list::Uint32List;
pub use urllist::{UrlList, UrlListFlags};
pub use xray::{NoXray, Xray};
