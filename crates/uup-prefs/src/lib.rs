//! Preference data model and policy resolution for the UUP core.
//!
//! A preferences file compiles into a [`PrefBlock`] of strictly sorted
//! arrays; a [`Pref`] cursor resolves a query against one block plus its
//! parent and global inheritance chain, matching attached domain / url /
//! cidr / application lists and cooking settinggroups, listener defaults
//! and geographic overloads into effective flags and categories.

pub mod block;
pub mod builder;
pub mod catalog;
pub mod categories;
pub mod error;
pub mod fileprefs;
pub mod lines;
pub mod overloads;
pub mod pref;
pub mod types;

pub use block::{NO_ORG_ITEM, PREF_NOLIST, PrefBlock, PrefBundle, PrefIdentity, PrefList, PrefOrg,
    PrefSettingGroup, SETTINGGROUP_IDX_COUNT};
pub use builder::{BuilderFlags, PrefBuilder};
pub use catalog::ListCatalog;
pub use categories::{PREF_CATEGORIES_MAX_BITS, PrefCategories};
pub use error::{PrefsError, Result};
pub use fileprefs::{FileKind, FilePrefs, KeyKind, PrefsLoadFlags, parse_prefs};
pub use lines::{LineCursor, Scan};
pub use overloads::{OverloadedPref, PrefOverloads};
pub use pref::{AppCatalog, CookState, Pref};
pub use types::{
    ActType, BundleFlags, ElementType, LType, LTYPE_NONE, ListKind, ListPointer, OrgFlags,
    ltype_matches_elementtype,
};
