//! Domain tagging: domains mapped to category masks.
//!
//! The big categorization database. Each line tags one domain with a hex
//! category mask; a lookup unions the mask of the most specific entry
//! covering the queried name.

use std::sync::Arc;

use uup_lists::dnsname::{DNS_TOHOST, reversed_key};
use uup_lists::domainlist::cmp_reversed;
use uup_lists::xray::Xray;
use uup_prefs::PrefCategories;

use crate::error::{ConfError, Result};

pub struct DomainTagging {
    /// (reversed lowercase name, categories), sorted by the reversed-name
    /// ordering.
    entries: Vec<(Box<[u8]>, PrefCategories)>,
}

impl DomainTagging {
    /// Parse `domain:HEXMASK` lines.
    pub fn parse(text: &str, path: &str) -> Result<Arc<Self>> {
        let mut entries: Vec<(Box<[u8]>, PrefCategories)> = Vec::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let err = |what: &str| ConfError::parse(path, lineno as u32 + 1, what);

            let (domain, mask) = line.split_once(':').ok_or_else(|| err("Missing ':'"))?;

            let mut name: Vec<u8> = Vec::with_capacity(domain.len());

            for &b in domain.as_bytes() {
                match DNS_TOHOST[b as usize] {
                    0 => return Err(err("Invalid domain character")),
                    mapped => name.push(mapped),
                }
            }

            if name.is_empty() {
                return Err(err("Empty domain"));
            }

            name.reverse();

            let (cats, used) =
                PrefCategories::sscan(mask).ok_or_else(|| err("Invalid category mask"))?;

            if used != mask.len() {
                return Err(err("Invalid category mask"));
            }

            entries.push((name.into(), cats));
        }

        entries.sort_by(|a, b| cmp_reversed(&a.0, &b.0, false));

        Ok(Arc::new(Self { entries }))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union the categories of the most specific entry covering `name`
    /// into `match_out`.
    ///
    /// Entries nest (`example.com` and `mail.example.com` may both be
    /// tagged), so each label suffix of the query is probed exactly,
    /// longest first.
    pub fn matches(
        &self,
        match_out: &mut PrefCategories,
        name: &[u8],
        x: Option<&dyn Xray>,
        listname: &str,
    ) -> bool {
        let mut off = 0;

        while off < name.len() && name[off] != 0 {
            if let Some(key) = reversed_key(&name[off..]) {
                let found = self
                    .entries
                    .binary_search_by(|(member, _)| cmp_reversed(&key, member, false).reverse());

                if let Ok(idx) = found {
                    match_out.union_with(&self.entries[idx].1);
                    uup_lists::xray!(x, "{listname} match: categories now {match_out}");
                    return true;
                }
            }

            off += name[off] as usize + 1;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uup_lists::dnsname::text_to_name;

    #[test]
    fn tags_union_most_specific() {
        let dt = DomainTagging::parse("example.com:3\nmail.example.com:8\nother.net:10\n", "dt")
            .expect("parses");
        assert_eq!(dt.len(), 3);

        let mut cats = PrefCategories::none();
        let name = text_to_name("mail.example.com").expect("valid");
        assert!(dt.matches(&mut cats, &name, None, "dt"));
        assert!(cats.get_bit(3), "most specific entry wins");
        assert!(!cats.get_bit(0));

        let mut cats = PrefCategories::none();
        let name = text_to_name("www.example.com").expect("valid");
        assert!(dt.matches(&mut cats, &name, None, "dt"));
        assert!(cats.get_bit(0) && cats.get_bit(1));

        let mut cats = PrefCategories::none();
        let name = text_to_name("absent.org").expect("valid");
        assert!(!dt.matches(&mut cats, &name, None, "dt"));
        assert!(cats.is_none());
    }

    #[test]
    fn rejects_junk() {
        assert!(DomainTagging::parse("bad domain:3\n", "dt").is_err());
        assert!(DomainTagging::parse("ok.com:xyz\n", "dt").is_err());
        assert!(DomainTagging::parse("ok.com\n", "dt").is_err());
    }
}
