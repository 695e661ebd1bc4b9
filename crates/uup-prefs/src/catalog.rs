//! The shared list catalog.
//!
//! One per process: the four content-addressed hashes that de-duplicate
//! primitive lists across org segments, plus the shared counters. Created
//! by the process owner and passed by reference into every loader.

use std::sync::Arc;

use uup_lists::{CidrList, DomainList, ObjectHash, Uint32List, UrlList, UupCounters};

const DOMAINLIST_ROWS: usize = 1 << 16;
const URLLIST_ROWS: usize = 1 << 12;
const CIDRLIST_ROWS: usize = 1 << 12;
const APPLICATIONLIST_ROWS: usize = 1 << 12;

pub struct ListCatalog {
    pub counters: Arc<UupCounters>,
    pub domainlists: Arc<ObjectHash<DomainList>>,
    pub urllists: Arc<ObjectHash<UrlList>>,
    pub cidrlists: Arc<ObjectHash<CidrList>>,
    pub applicationlists: Arc<ObjectHash<Uint32List>>,
}

impl ListCatalog {
    /// Create a catalog keyed by `fingerprint_len`-byte fingerprints.
    pub fn new(fingerprint_len: usize) -> Self {
        let counters = Arc::new(UupCounters::new());

        Self {
            domainlists: Arc::new(ObjectHash::new(
                DOMAINLIST_ROWS,
                fingerprint_len,
                Arc::clone(&counters),
            )),
            urllists: Arc::new(ObjectHash::new(
                URLLIST_ROWS,
                fingerprint_len,
                Arc::clone(&counters),
            )),
            cidrlists: Arc::new(ObjectHash::new(
                CIDRLIST_ROWS,
                fingerprint_len,
                Arc::clone(&counters),
            )),
            applicationlists: Arc::new(ObjectHash::new(
                APPLICATIONLIST_ROWS,
                fingerprint_len,
                Arc::clone(&counters),
            )),
            counters,
        }
    }
}

impl Default for ListCatalog {
    /// Catalog for the stock tooling, which fingerprints with MD5.
    fn default() -> Self {
        Self::new(16)
    }
}
