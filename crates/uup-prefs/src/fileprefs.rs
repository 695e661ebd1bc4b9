//! Preferences-file reading.
//!
//! All structured files share one layout: a header line naming the file
//! type and the versions present, a `count N` line, then
//! `[section:count[:versions]]` blocks. A section tagged with versions
//! that exclude the reader's chosen version is skipped by count, which is
//! how one file serves readers of different eras. The sum of section
//! counts must equal the header count.

use tracing::{debug, warn};

use crate::block::PrefBlock;
use crate::builder::{BuilderFlags, PrefBuilder};
use crate::catalog::ListCatalog;
use crate::error::{PrefsError, Result};
use crate::lines::{LineCursor, Scan};
use crate::types::{ActType, ElementType, LType, LTYPE_NONE, ListKind, ListPointer, LIST_KINDS};
use uup_lists::{
    CidrList, CidrParse, DomainList, DomainListFlags, Fingerprint, ObjectFingerprint, Uint32List,
    UrlList, UrlListFlags,
};

/// How identity lines are keyed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KeyKind {
    /// No identities section (rules / cidrprefs / urlprefs).
    None,
    /// `orgid:originid:` key prefix, looked up by origin id (cloudprefs).
    Origin,
}

/// Static description of one preferences file type.
pub struct FileKind {
    pub type_name: &'static str,
    pub supported_versions: &'static [u32],
    pub key: KeyKind,
    /// Single `[lists:N]` section with id-only (no-ltype) lines.
    pub lists_only: bool,
}

#[derive(Clone, Copy, Default)]
pub struct PrefsLoadFlags {
    pub accept_application: bool,
    pub accept_cidr: bool,
    pub accept_domain: bool,
    pub accept_url: bool,
    /// Unaccepted element types are discarded quietly.
    pub allow_other_types: bool,
    /// List lines carry `id:` with no leading ltype.
    pub no_ltype: bool,
    /// Broken references abort the file instead of dropping rows.
    pub strict_refs: bool,
    /// Bundle attachments may reference lists in the parent/global block.
    pub allow_bundle_extrefs: bool,
}

impl PrefsLoadFlags {
    pub fn accepts(&self, et: ElementType) -> bool {
        match et {
            ElementType::Application => self.accept_application,
            ElementType::Cidr => self.accept_cidr,
            ElementType::Domain => self.accept_domain,
            ElementType::Url => self.accept_url,
        }
    }

    pub fn accept_all() -> Self {
        Self {
            accept_application: true,
            accept_cidr: true,
            accept_domain: true,
            accept_url: true,
            ..Self::default()
        }
    }
}

/// A parsed preferences file: the compiled block plus identity keys.
pub struct FilePrefs {
    pub version: u32,
    pub block: PrefBlock,
    /// Identity search keys, parallel to `block.identities`.
    pub keys: Box<[u32]>,
    pub loaded: usize,
}

impl FilePrefs {
    /// Resolve an identity index by origin key.
    pub fn find_key(&self, originid: u32) -> Option<usize> {
        self.keys.binary_search(&originid).ok()
    }
}

struct Reader<'a> {
    kind: &'a FileKind,
    flags: PrefsLoadFlags,
    catalog: &'a ListCatalog,
    version: u32,
    keys: Vec<u32>,
}

const SECTION_LISTS: usize = 0;
const SECTION_SETTINGGROUP: usize = 1;
const SECTION_BUNDLES: usize = 2;
const SECTION_ORGS: usize = 3;
const SECTION_IDENTITIES: usize = 4;

const SECTION_NAMES: [&str; 5] = ["lists", "settinggroup", "bundles", "orgs", "identities"];

enum SectionStatus {
    NotFound,
    Loaded(usize),
}

/// Parse a whole preferences file.
pub fn parse_prefs(
    text: &str,
    path: &str,
    kind: &FileKind,
    flags: PrefsLoadFlags,
    catalog: &ListCatalog,
) -> Result<FilePrefs> {
    let mut cur = LineCursor::new(text, path);
    let mut reader = Reader { kind, flags, catalog, version: 0, keys: Vec::new() };
    let builder_flags =
        BuilderFlags { no_external_refs: !flags.allow_bundle_extrefs };
    let mut builder = PrefBuilder::new(builder_flags);

    let (total, okvers) = reader.load_fileheader(&mut cur)?;

    let mut loaded = 0;
    let mut section = None;

    loop {
        match reader.load_section(&mut cur, &mut builder, &okvers, &mut section)? {
            SectionStatus::Loaded(count) => loaded += count,
            SectionStatus::NotFound => break,
        }
    }

    if !cur.eof() {
        return Err(PrefsError::parse(path, cur.line_no(), "Expected section header"));
    }

    if loaded != total {
        return Err(PrefsError::parse(
            path,
            cur.line_no(),
            format!("Incorrect total count {total} - read {loaded} data lines"),
        ));
    }

    Ok(FilePrefs {
        version: reader.version,
        block: builder.consume(),
        keys: reader.keys.into(),
        loaded,
    })
}

impl<'a> Reader<'a> {
    fn err(&self, cur: &LineCursor<'_>, what: impl Into<String>) -> PrefsError {
        PrefsError::parse(cur.path, cur.line_no(), what)
    }

    /// `<type> <v> [<v>...]` then `count <N>`.
    fn load_fileheader(&mut self, cur: &mut LineCursor<'_>) -> Result<(usize, Vec<u32>)> {
        let Some(line) = cur.next_line() else {
            return Err(self.err(cur, "No content found"));
        };

        let Some(vers) = line.strip_prefix(self.kind.type_name).and_then(|r| r.strip_prefix(' '))
        else {
            return Err(self.err(
                cur,
                format!("Invalid header; must contain '{}'", self.kind.type_name),
            ));
        };

        let mut okvers = Vec::new();

        for tok in vers.split(' ').filter(|t| !t.is_empty()) {
            let ver: u32 = tok
                .parse()
                .map_err(|_| self.err(cur, "Invalid header version(s); must be numeric"))?;

            okvers.push(ver);

            if ver > self.version && self.kind.supported_versions.contains(&ver) {
                self.version = ver;
            }
        }

        if self.version == 0 {
            return Err(self.err(
                cur,
                format!("Invalid version(s); must be from the set {:?}", self.kind.supported_versions),
            ));
        }

        let Some(line) = cur.next_line() else {
            return Err(self.err(cur, "No count line found"));
        };

        let count = line
            .strip_prefix("count ")
            .and_then(|n| n.trim_end().parse::<usize>().ok())
            .ok_or_else(|| self.err(cur, "Invalid count; must be a numeric value"))?;

        Ok((count, okvers))
    }

    /// Load (or version-skip) one `[name:count[:versions]]` section.
    fn load_section(
        &mut self,
        cur: &mut LineCursor<'_>,
        builder: &mut PrefBuilder,
        okvers: &[u32],
        section: &mut Option<usize>,
    ) -> Result<SectionStatus> {
        let Some(line) = cur.next_line() else {
            return Ok(SectionStatus::NotFound);
        };

        let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) else {
            cur.unread();
            return Ok(SectionStatus::NotFound);
        };

        if !header.contains(':') {
            cur.unread();
            return Ok(SectionStatus::NotFound);
        }

        let mut parts = header.splitn(3, ':');
        let name = parts.next().unwrap_or_default();
        let count: usize = parts
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| self.err(cur, "Invalid section header count"))?;

        let mut skip = false;

        if let Some(vers) = parts.next() {
            skip = true;

            for tok in vers.split(' ').filter(|t| !t.is_empty()) {
                let v: u32 = tok
                    .parse()
                    .ok()
                    .filter(|&v| v != 0)
                    .ok_or_else(|| self.err(cur, "Invalid section header version(s)"))?;

                if v == self.version {
                    skip = false;
                }

                if !okvers.contains(&v) {
                    return Err(self.err(
                        cur,
                        format!("Section header version {v} not specified in file header"),
                    ));
                }
            }
        }

        if skip {
            debug!("skipping [{name}:{count}] section for a different version");

            for _ in 0..count {
                let Some(line) = cur.next_line() else {
                    return Err(self.err(cur, "Unexpected EOF in skipped section"));
                };

                if line.starts_with('[') {
                    return Err(self.err(cur, "Unexpected header in skipped section"));
                }
            }

            return Ok(SectionStatus::Loaded(count));
        }

        // Sections appear in fixed order; searching forward from the
        // previous one enforces that.
        let first = section.map_or(SECTION_LISTS, |s| s + 1);
        let found = (first..SECTION_NAMES.len()).find(|&i| {
            SECTION_NAMES[i] == name && (!self.kind.lists_only || i == SECTION_LISTS)
        });

        let Some(idx) = found else {
            return Err(self.err(cur, format!("Invalid section header '{name}'")));
        };

        *section = Some(idx);

        if count > 0 {
            match idx {
                SECTION_LISTS => builder.alloc_lists(count),
                SECTION_SETTINGGROUP => builder.alloc_settinggroups(count),
                SECTION_BUNDLES => builder.alloc_bundles(count),
                SECTION_ORGS => builder.alloc_orgs(count),
                SECTION_IDENTITIES => {
                    if self.kind.key == KeyKind::None {
                        return Err(self.err(cur, "identities section header count must be 0"));
                    }

                    builder.alloc_identities(count);
                    self.keys.reserve(count);
                }
                _ => unreachable!(),
            }
        }

        for _ in 0..count {
            let Some(line) = cur.next_line() else {
                return Err(self.err(
                    cur,
                    format!("Unexpected EOF - read fewer [{name}] items than declared"),
                ));
            };

            match idx {
                SECTION_LISTS => self.read_list(cur, builder, line)?,
                SECTION_SETTINGGROUP => self.read_settinggroup(cur, builder, line)?,
                SECTION_BUNDLES => self.read_bundle(cur, builder, line)?,
                SECTION_ORGS => self.read_org(cur, builder, line)?,
                SECTION_IDENTITIES => self.read_identity(cur, builder, line)?,
                _ => unreachable!(),
            }
        }

        Ok(SectionStatus::Loaded(count))
    }

    /// `ltype:id:elementtype:catbit:fingerprint_hex:<body>`
    /// (`id:elementtype:...` under no-ltype).
    fn read_list(
        &mut self,
        cur: &LineCursor<'_>,
        builder: &mut PrefBuilder,
        line: &str,
    ) -> Result<()> {
        let mut s = Scan::new(line);

        let ltype = if self.flags.no_ltype {
            LTYPE_NONE
        } else {
            let bits = s
                .hex_u32()
                .filter(|&b| b <= 0xff && s.colon())
                .ok_or_else(|| self.err(cur, "Unrecognised list line (invalid ltype:)"))?;

            match LType::from_bits(bits as u8) {
                Some(lt) => lt,
                None => {
                    warn!("{}: {}: Unrecognised list line (invalid ltype)", cur.path, cur.line_no());
                    return Ok(());
                }
            }
        };

        let id = s
            .dec_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised list line (invalid id:)"))?;

        let name = s
            .until_colon()
            .ok_or_else(|| self.err(cur, "Unrecognised list line (no elementtype terminator)"))?;

        let Some(elementtype) = ElementType::from_name(name) else {
            let what = format!("Unrecognised list line (invalid elementtype '{name}')");

            if self.flags.strict_refs {
                return Err(self.err(cur, what));
            }

            warn!("{}: {}: {what}", cur.path, cur.line_no());
            return Ok(());
        };

        if !self.flags.accepts(elementtype) {
            // Remember the id so bundle references to it drop quietly.
            builder.disc_list(ltype, id, elementtype);

            let what = format!("list line with unwanted elementtype {name}");

            if self.flags.allow_other_types || !self.flags.strict_refs {
                debug!("{}: {}: Discarding {what}", cur.path, cur.line_no());
                return Ok(());
            }

            return Err(self.err(cur, format!("Invalid {what}")));
        }

        let requires_empty = ltype.kind().is_some_and(ListKind::requires_empty_bit);
        let bit;

        if s.peek() == Some(':') {
            if !(requires_empty || self.flags.no_ltype) {
                return Err(self.err(cur, "Invalid category bit field for list type"));
            }

            bit = 0;
            s.colon();
        } else if requires_empty {
            return Err(self.err(cur, "Invalid category bit field for list type"));
        } else {
            bit = s
                .dec_u32()
                .filter(|&b| b != 0 && b < 256 && s.colon())
                .ok_or_else(|| self.err(cur, "Unrecognised bit for list type"))?;
        }

        let fp = s
            .until_colon()
            .and_then(Fingerprint::from_hex)
            .ok_or_else(|| {
                self.err(cur, "List must have a fingerprint (even number of hex digits)")
            })?;
        let fp = fp.as_bytes();

        let body = s.rest();

        let lp = match elementtype {
            ElementType::Application => {
                let of = ObjectFingerprint::new(&self.catalog.applicationlists, fp);
                ListPointer::Application(Uint32List::from_text(body, Some(of)).map_err(|e| {
                    self.err(cur, format!("Unrecognised list line (parsing uint32list failed: {e})"))
                })?)
            }
            ElementType::Cidr => {
                let of = ObjectFingerprint::new(&self.catalog.cidrlists, fp);
                let (cl, consumed) =
                    CidrList::from_string(body, ", \t\n", CidrParse::IpOrCidr, Some(of)).map_err(
                        |e| {
                            self.err(
                                cur,
                                format!("Unrecognised list line (parsing cidrlist failed: {e})"),
                            )
                        },
                    )?;

                if consumed != body.len() {
                    return Err(
                        self.err(cur, "Unrecognised list line (parsing cidrlist failed)")
                    );
                }

                ListPointer::Cidr(cl)
            }
            ElementType::Domain => {
                let of = ObjectFingerprint::new(&self.catalog.domainlists, fp);
                let flags = if ltype.kind() == Some(ListKind::UrlProxyHttps) {
                    DomainListFlags::exact()
                } else {
                    DomainListFlags::default()
                };

                ListPointer::Domain(DomainList::from_buffer(body.as_bytes(), flags, Some(of))
                    .map_err(|e| {
                        self.err(
                            cur,
                            format!("Unrecognised list line (parsing domainlist failed: {e})"),
                        )
                    })?)
            }
            ElementType::Url => {
                let of = ObjectFingerprint::new(&self.catalog.urllists, fp);
                ListPointer::Url(
                    UrlList::from_buffer(body.as_bytes(), UrlListFlags::default(), Some(of))
                        .map_err(|e| {
                            self.err(
                                cur,
                                format!("Unrecognised list line (parsing urllist failed: {e})"),
                            )
                        })?,
                )
            }
        };

        builder.add_list(ltype, id, lp, bit as u8).map_err(|e| {
            self.err(cur, format!("Cannot create preflist {ltype}:{id}:{name} ({e})"))
        })
    }

    /// `idx:id:flags_hex:blocked:nodecrypt:warn`
    fn read_settinggroup(
        &mut self,
        cur: &LineCursor<'_>,
        builder: &mut PrefBuilder,
        line: &str,
    ) -> Result<()> {
        let mut s = Scan::new(line);

        let idx = s
            .dec_u32()
            .filter(|&i| i < 4 && s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised settinggroup line (invalid idx)"))?;
        let id = s
            .dec_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised settinggroup line (invalid id)"))?;
        let flags = s
            .hex_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised settinggroup line (invalid flags)"))?;
        let blocked = s
            .categories()
            .filter(|_| s.colon())
            .ok_or_else(|| {
                self.err(cur, "Unrecognised settinggroup line (invalid blocked-categories)")
            })?;
        let nodecrypt = s
            .categories()
            .filter(|_| s.colon())
            .ok_or_else(|| {
                self.err(cur, "Unrecognised settinggroup line (invalid nodecrypt-categories)")
            })?;
        let warn = s
            .categories()
            .filter(|_| s.done())
            .ok_or_else(|| {
                self.err(cur, "Unrecognised settinggroup line (invalid warn-categories)")
            })?;

        builder
            .add_settinggroup(idx as u8, id, flags, blocked, nodecrypt, warn)
            .map_err(|e| self.err(cur, format!("Cannot create settinggroup {idx}:{id} ({e})")))
    }

    /// `actype:id:priority:flags:categories:sgids:<list refs per kind>`
    fn read_bundle(
        &mut self,
        cur: &LineCursor<'_>,
        builder: &mut PrefBuilder,
        line: &str,
    ) -> Result<()> {
        let mut s = Scan::new(line);

        let actype_bits = s
            .hex_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised bundle line (invalid actype:)"))?;
        let actype = u8::try_from(actype_bits)
            .ok()
            .and_then(ActType::from_bits)
            .ok_or_else(|| self.err(cur, "Unrecognised bundle line (invalid actype)"))?;
        let id = s
            .dec_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised bundle line (invalid bundleid)"))?;
        let priority = s
            .dec_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised bundle line (invalid priority)"))?;
        let flags = s
            .hex_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised bundle line (invalid flags)"))?;
        let categories = s
            .categories()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised bundle line (invalid categories)"))?;

        // Zero to four settinggroup ids, space separated, colon
        // terminated.
        let mut sgids = [0u32; 4];

        for sgid in &mut sgids {
            if s.peek() == Some(':') {
                break;
            }

            *sgid = s
                .dec_u32()
                .ok_or_else(|| self.err(cur, "Unrecognised bundle line (invalid settinggroup id)"))?;

            if s.peek() == Some(' ') {
                s.spaces();
            }
        }

        if !s.colon() {
            return Err(
                self.err(cur, "Unrecognised bundle line (invalid settinggroup-ids terminator)")
            );
        }

        builder
            .add_bundle(actype, id, priority, flags, categories, sgids)
            .map_err(|e| self.err(cur, format!("Cannot create bundle {actype_bits:X}:{id} ({e})")))?;

        // One field per list kind, each a space-separated run of listids.
        for (i, kind) in LIST_KINDS.iter().enumerate() {
            let last = i == LIST_KINDS.len() - 1;
            let ltype = LType::new(*kind, actype);

            loop {
                s.spaces();

                if s.done() || s.peek() == Some(':') {
                    break;
                }

                let listid = s.dec_u32().ok_or_else(|| {
                    self.err(
                        cur,
                        format!("Unrecognised bundle line (invalid {} list)", kind.describe()),
                    )
                })?;

                let flags = self.flags;
                builder
                    .attach_list(id, ltype, listid, |et| flags.accepts(et))
                    .map_err(|e| {
                        self.err(
                            cur,
                            format!("Cannot attach bundle {actype_bits:X}:{id} to list {ltype}:{listid} ({e})"),
                        )
                    })?;
            }

            if !last && !s.colon() {
                return Err(self.err(cur, "Unrecognised bundle line (missing list terminator)"));
            }
        }

        if !s.done() {
            return Err(self.err(cur, "Unrecognised bundle line (trailing junk)"));
        }

        Ok(())
    }

    /// `orgid:flags:unmasked:retention:warnperiod:originid:parentid`
    fn read_org(
        &mut self,
        cur: &LineCursor<'_>,
        builder: &mut PrefBuilder,
        line: &str,
    ) -> Result<()> {
        let mut s = Scan::new(line);

        let orgid = s
            .dec_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised org line (invalid orgid)"))?;
        let flags = s
            .hex_u64()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised org line (invalid orgflags)"))?;
        let unmasked = s
            .categories()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised org line (invalid unmasked categories)"))?;
        let retention = s
            .dec_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised org line (invalid retention)"))?;
        let warnperiod = s
            .dec_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised org line (invalid warn period)"))?;
        let originid = s
            .dec_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised org line (invalid originid)"))?;
        let parentid = s
            .dec_u32()
            .filter(|_| s.done())
            .ok_or_else(|| self.err(cur, "Unrecognised org line (invalid parentid)"))?;

        builder
            .add_org(orgid, flags, unmasked, retention, warnperiod, originid, parentid)
            .map_err(|e| self.err(cur, format!("Cannot create org {orgid} ({e})")))
    }

    /// `<key>:originid:origintypeid:orgid:actype:bundleid`
    fn read_identity(
        &mut self,
        cur: &LineCursor<'_>,
        builder: &mut PrefBuilder,
        line: &str,
    ) -> Result<()> {
        let mut s = Scan::new(line);

        // Type-specific key prefix.
        let key = match self.kind.key {
            KeyKind::None => {
                return Err(self.err(cur, "identities are not supported by this file type"));
            }
            KeyKind::Origin => {
                let _orgid = s
                    .dec_u32()
                    .filter(|_| s.colon())
                    .ok_or_else(|| self.err(cur, "Unrecognised line (invalid key format)"))?;

                s.dec_u32()
                    .filter(|_| s.colon())
                    .ok_or_else(|| self.err(cur, "Unrecognised line (invalid key format)"))?
            }
        };

        if self.keys.last().is_some_and(|&last| last >= key) {
            return Err(self.err(
                cur,
                if self.keys.last() == Some(&key) {
                    "Invalid line (duplicate)"
                } else {
                    "Invalid line (out of order)"
                },
            ));
        }

        let originid = s
            .dec_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised identity line"))?;
        let origintypeid = s
            .dec_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised identity line"))?;
        let orgid = s
            .dec_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised identity line"))?;
        let actype_bits = s
            .hex_u32()
            .filter(|_| s.colon())
            .ok_or_else(|| self.err(cur, "Unrecognised identity line"))?;
        let actype = u8::try_from(actype_bits)
            .ok()
            .and_then(ActType::from_bits)
            .ok_or_else(|| self.err(cur, "Unrecognised identity line (invalid actype)"))?;
        let bundleid = s
            .dec_u32()
            .filter(|_| s.done())
            .ok_or_else(|| self.err(cur, "Unrecognised identity line (trailing junk)"))?;

        match builder.add_identity(originid, origintypeid, orgid, actype, bundleid) {
            Ok(()) => {
                self.keys.push(key);
                Ok(())
            }
            Err(e) => {
                if self.flags.strict_refs {
                    Err(self.err(cur, format!("Cannot add identity; invalid bundleid or orgid ({e})")))
                } else {
                    warn!(
                        "{}: {}: Cannot add identity; invalid bundleid or orgid",
                        cur.path,
                        cur.line_no()
                    );
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ListKind;
    use pretty_assertions::assert_eq;

    pub const TEST_KIND: FileKind = FileKind {
        type_name: "cloudprefs",
        supported_versions: &[1],
        key: KeyKind::Origin,
        lists_only: false,
    };

    fn catalog() -> ListCatalog {
        ListCatalog::new(2)
    }

    const SAMPLE: &str = "cloudprefs 1\n\
                          count 6\n\
                          [lists:2]\n\
                          10:1:domain:70:ABCD:black.com grey.com\n\
                          60:4:application:71:1234:4\n\
                          [bundles:1]\n\
                          0:1:32:0:4000000000000000::1:::::4::::\n\
                          [orgs:2]\n\
                          1:0:0:365:30:99:0\n\
                          1234:10:0:365:30:100:1\n\
                          [identities:1]\n\
                          1234:55:55:22:1234:0:1\n";

    #[test]
    fn parses_a_complete_file() {
        let cat = catalog();
        let fp = parse_prefs(SAMPLE, "sample", &TEST_KIND, PrefsLoadFlags::accept_all(), &cat)
            .expect("parses");

        assert_eq!(fp.version, 1);
        assert_eq!(fp.loaded, 6);
        assert_eq!(fp.block.lists.len(), 2);
        assert_eq!(fp.block.bundles.len(), 1);
        assert_eq!(fp.block.orgs.len(), 2);
        assert_eq!(fp.block.identities.len(), 1);

        let idx = fp.find_key(55).expect("identity by origin key");
        let ident = fp.block.identity(idx).expect("present");
        assert_eq!(ident.origintypeid, 22);
        assert_eq!(fp.block.orgs[ident.org as usize].id, 1234);

        let bundle = &fp.block.bundles[ident.bundle as usize];
        assert_eq!(bundle.priority, 32);

        let dest = fp.block.bundle_list(bundle, ListKind::DestBlock, 0).expect("attached");
        assert_eq!(dest.id, 1);
        assert_eq!(dest.bit, 70);

        let app = fp.block.bundle_list(bundle, ListKind::AppBlock, 0).expect("attached");
        assert_eq!(app.id, 4);
        assert!(app.lp.as_applicationlist().expect("app list").contains(4));
    }

    #[test]
    fn count_mismatch_is_fatal() {
        let bad = SAMPLE.replace("count 6", "count 7");
        let cat = catalog();
        assert!(parse_prefs(&bad, "bad", &TEST_KIND, PrefsLoadFlags::accept_all(), &cat).is_err());
    }

    #[test]
    fn unknown_versions_skip_sections() {
        let text = "cloudprefs 1 9\n\
                    count 2\n\
                    [lists:1:9]\n\
                    this line is only read by version 9 parsers\n\
                    [orgs:1:1 9]\n\
                    10:0:0:365:30:1:0\n";
        let cat = catalog();
        let fp = parse_prefs(text, "skip", &TEST_KIND, PrefsLoadFlags::accept_all(), &cat)
            .expect("parses");

        assert_eq!(fp.block.lists.len(), 0);
        assert_eq!(fp.block.orgs.len(), 1);
    }

    #[test]
    fn undeclared_section_version_is_fatal() {
        let text = "cloudprefs 1\n\
                    count 1\n\
                    [lists:1:2]\n\
                    10:1:domain:70:ABCD:x.com\n";
        let cat = catalog();
        assert!(parse_prefs(text, "bad", &TEST_KIND, PrefsLoadFlags::accept_all(), &cat).is_err());
    }

    #[test]
    fn sections_must_appear_in_order() {
        let text = "cloudprefs 1\n\
                    count 2\n\
                    [orgs:1]\n\
                    10:0:0:365:30:1:0\n\
                    [lists:1]\n\
                    10:1:domain:70:ABCD:x.com\n";
        let cat = catalog();
        assert!(parse_prefs(text, "bad", &TEST_KIND, PrefsLoadFlags::accept_all(), &cat).is_err());
    }

    #[test]
    fn elementtype_filtering_discards_references() {
        let mut flags = PrefsLoadFlags::accept_all();
        flags.accept_domain = false;
        flags.allow_other_types = true;

        let cat = catalog();
        let fp = parse_prefs(SAMPLE, "filtered", &TEST_KIND, flags, &cat).expect("parses");

        // The domain list was discarded and the bundle's reference to it
        // dropped with it; the application list survived.
        assert_eq!(fp.block.lists.len(), 1);
        let bundle = &fp.block.bundles[0];
        assert!(fp.block.bundle_list(bundle, ListKind::DestBlock, 0).is_none());
        assert!(fp.block.bundle_list(bundle, ListKind::AppBlock, 0).is_some());
    }

    #[test]
    fn empty_bit_rules() {
        // An except list must carry an empty bit...
        let text = "cloudprefs 1\n\
                    count 1\n\
                    [lists:1]\n\
                    20:1:domain::AB:x.com\n";
        let cat = catalog();
        let fp = parse_prefs(text, "except", &TEST_KIND, PrefsLoadFlags::accept_all(), &cat)
            .expect("parses");
        assert_eq!(fp.block.lists[0].bit, 0);

        // ...and a block list must not.
        let text = "cloudprefs 1\n\
                    count 1\n\
                    [lists:1]\n\
                    10:1:domain::AB:x.com\n";
        assert!(parse_prefs(text, "block", &TEST_KIND, PrefsLoadFlags::accept_all(), &cat).is_err());
    }
}
