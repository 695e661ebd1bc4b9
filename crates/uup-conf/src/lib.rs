//! Segmented, hot-reloadable configuration sets for the UUP resolution
//! core.
//!
//! A single loader thread reads files and builds new per-org segments;
//! workers acquire an immutable [`ConfSet`] snapshot per request and
//! never block. Unchanged segments survive reloads by pointer, and the
//! primitive lists inside them are shared across orgs and generations
//! through the content-addressed object hash.

pub mod application;
pub mod categorization;
pub mod confset;
pub mod domaintagging;
pub mod error;
pub mod listsconf;
pub mod loader;
pub mod prefsorg;
pub mod registry;
pub mod reloader;
pub mod segment;

pub use application::{AppFlavor, AppLists, AppShared, ApplicationConf};
pub use categorization::{
    Categorization, CategorizedApps, categorization_set_thread_options,
};
pub use confset::{ConfData, ConfSet, ConfSystem};
pub use domaintagging::DomainTagging;
pub use error::{ConfError, Result};
pub use listsconf::{ListsConf, ListsHit, ListsOrg};
pub use loader::ConfLoader;
pub use prefsorg::{PrefsFlavor, PrefsOrg, PrefsOrgConf};
pub use registry::{ConfKind, ConfRegistry, ModuleId};
pub use reloader::Reloader;
pub use segment::{SegmentData, SegmentInfo, Segmented};
