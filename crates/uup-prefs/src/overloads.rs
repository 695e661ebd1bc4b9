//! Country/region policy overloads.
//!
//! Some jurisdictions force categories or flags onto every policy served
//! there. The overloads table maps a country code (optionally refined by
//! a region id) to the flags and categories to impose and the masks
//! limiting what local policy may still override.

use crate::categories::PrefCategories;
use crate::error::{PrefsError, Result};
use crate::lines::{LineCursor, Scan};
use crate::types::{BundleFlags, OrgFlags};

pub const OVERLOADS_VERSION: u32 = 1;

#[derive(Clone, Default)]
pub struct OverloadedPref {
    pub orgflags: OrgFlags,
    pub overridable_orgflags: OrgFlags,
    pub bundleflags: BundleFlags,
    pub overridable_bundleflags: BundleFlags,
    pub categories: PrefCategories,
    pub overridable_categories: PrefCategories,
}

pub struct PrefOverloads {
    /// Sorted by (country code, region); region 0 is the country-wide
    /// entry.
    entries: Vec<([u8; 2], u32, OverloadedPref)>,
}

impl PrefOverloads {
    /// Parse an overloads file:
    /// `cc[/region]:orgflags:overridable_orgflags:bundleflags:overridable_bundleflags:categories:overridable_categories`.
    pub fn parse(text: &str, path: &str) -> Result<Self> {
        let mut cur = LineCursor::new(text, path);

        let err = |cur: &LineCursor<'_>, what: &str| PrefsError::parse(path, cur.line_no(), what);

        let header = cur.next_line().ok_or_else(|| err(&cur, "No content found"))?;

        if header != format!("overloads {OVERLOADS_VERSION}") {
            return Err(err(&cur, "Unrecognized header line"));
        }

        let count: usize = cur
            .next_line()
            .and_then(|l| l.strip_prefix("count "))
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| err(&cur, "Invalid count; must be a numeric value"))?;

        let mut entries = Vec::with_capacity(count);

        for _ in 0..count {
            let line = cur.next_line().ok_or_else(|| err(&cur, "Unexpected EOF"))?;
            let mut s = Scan::new(line);

            let key = s.until_colon().ok_or_else(|| err(&cur, "Invalid country key"))?;
            let (cc, region) = match key.split_once('/') {
                Some((cc, region)) => {
                    (cc, region.parse().map_err(|_| err(&cur, "Invalid region"))?)
                }
                None => (key, 0),
            };

            if cc.len() != 2 || !cc.bytes().all(|b| b.is_ascii_uppercase()) {
                return Err(err(&cur, "Invalid country code"));
            }

            let cc = [cc.as_bytes()[0], cc.as_bytes()[1]];

            let orgflags =
                s.hex_u64().filter(|_| s.colon()).ok_or_else(|| err(&cur, "Invalid orgflags"))?;
            let overridable_orgflags = s
                .hex_u64()
                .filter(|_| s.colon())
                .ok_or_else(|| err(&cur, "Invalid overridable orgflags"))?;
            let bundleflags =
                s.hex_u32().filter(|_| s.colon()).ok_or_else(|| err(&cur, "Invalid bundleflags"))?;
            let overridable_bundleflags = s
                .hex_u32()
                .filter(|_| s.colon())
                .ok_or_else(|| err(&cur, "Invalid overridable bundleflags"))?;
            let categories = s
                .categories()
                .filter(|_| s.colon())
                .ok_or_else(|| err(&cur, "Invalid categories"))?;
            let overridable_categories = s
                .categories()
                .filter(|_| s.done())
                .ok_or_else(|| err(&cur, "Invalid overridable categories"))?;

            let entry = OverloadedPref {
                orgflags,
                overridable_orgflags,
                bundleflags,
                overridable_bundleflags,
                categories,
                overridable_categories,
            };

            if entries
                .last()
                .is_some_and(|(lcc, lregion, _): &([u8; 2], u32, _)| (lcc, *lregion) >= (&cc, region))
            {
                return Err(err(&cur, "Invalid line (out of order)"));
            }

            entries.push((cc, region, entry));
        }

        if !cur.eof() {
            return Err(err(&cur, "Trailing junk"));
        }

        Ok(Self { entries })
    }

    /// Look up by country and region, falling back to the country-wide
    /// entry.
    pub fn by_cc(&self, cc: &str, region: u32) -> Option<&OverloadedPref> {
        if cc.len() != 2 {
            return None;
        }

        let cc = [cc.as_bytes()[0], cc.as_bytes()[1]];

        for want in [region, 0] {
            if let Ok(i) =
                self.entries.binary_search_by(|(ecc, eregion, _)| (ecc, eregion).cmp(&(&cc, &want)))
            {
                return Some(&self.entries[i].2);
            }
        }

        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "overloads 1\n\
                          count 3\n\
                          DE:10:0:0:FFFFFFFF:80:0\n\
                          US:0:FFFFFFFFFFFFFFFF:0:FFFFFFFF:0:FFFFFFFF\n\
                          US/5:0:0:1:0:100:0\n";

    #[test]
    fn parse_and_lookup() {
        let ov = PrefOverloads::parse(SAMPLE, "overloads").expect("parses");
        assert_eq!(ov.len(), 3);

        let de = ov.by_cc("DE", 9).expect("country-wide fallback");
        assert_eq!(de.orgflags, 0x10);
        assert!(de.categories.get_bit(7));

        let us5 = ov.by_cc("US", 5).expect("region entry");
        assert_eq!(us5.bundleflags, 1);
        assert!(us5.categories.get_bit(8));

        assert!(ov.by_cc("FR", 0).is_none());
    }

    #[test]
    fn rejects_disorder_and_bad_codes() {
        let bad = "overloads 1\ncount 2\nUS:0:0:0:0:0:0\nDE:0:0:0:0:0:0\n";
        assert!(PrefOverloads::parse(bad, "bad").is_err());

        let bad = "overloads 1\ncount 1\nusa:0:0:0:0:0:0\n";
        assert!(PrefOverloads::parse(bad, "bad").is_err());
    }
}
