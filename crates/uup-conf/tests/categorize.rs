//! End-to-end categorization and application matching through a loaded
//! confset.

use std::fs;
use std::path::Path;

use uup_conf::{
    CategorizedApps, ConfKind, PrefsFlavor, Reloader, categorization_set_thread_options,
};
use uup_lists::dnsname::text_to_name;
use uup_prefs::types::ORGFLAG_HALF_DOMAINTAGGING;
use uup_prefs::{ListKind, PrefCategories};

fn write(dir: &Path, rel: &str, body: &str) {
    let path = dir.join(rel);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }

    fs::write(path, body).expect("writes");
}

/// A conf tree with a categorization (domaintagging + application), an
/// application module and cloudprefs for org 1234 whose bundle carries
/// app-list {4}.
fn build_tree(dir: &Path) {
    write(
        dir,
        "categorization",
        "categorization 1\n\
         domaintagging:domaintagging:domaintagging.txt:::26\n\
         iplist:botnets:botnets.txt:66::\n\
         application:apps:apps/app.%u:148::\n",
    );

    write(dir, "domaintagging.txt", "name.com:3\n");
    write(dir, "botnets.txt", "5.6.7.8\n");

    write(
        dir,
        "apps/app.4",
        "application 1\n\
         count 3\n\
         [meta:1]\n\
         name:bobdata\n\
         [domains:1]\n\
         name.com\n\
         [urls:1]\n\
         http://api.bobdata.com/bobpost\n",
    );

    write(
        dir,
        "prefs/cloudprefs.1234",
        "cloudprefs 1\n\
         count 4\n\
         [lists:1]\n\
         60:9:application:71:FEEDFACEFEEDFACEFEEDFACEFEEDFACE:4\n\
         [bundles:1]\n\
         0:1:32:0:0::::::9::::\n\
         [orgs:1]\n\
         1234:4000000:0:365:30:100:0\n\
         [identities:1]\n\
         1234:55:55:22:1234:0:1\n",
    );
}

fn load(dir: &Path) -> Reloader {
    let mut reloader = Reloader::new(dir);

    reloader.register("categorization", "categorization", ConfKind::Categorization)
        .expect("registers");
    reloader
        .register("cloudprefs", "prefs/cloudprefs.%u", ConfKind::PrefsOrg {
            flavor: PrefsFlavor::CloudPrefs,
        })
        .expect("registers");
    // The URL-matching surface keeps URLs whole (the resolver flavor
    // registered by the categorization folds them into proxy domains).
    reloader
        .register("apps-proxy", "apps/app.%u", ConfKind::Application {
            flavor: uup_conf::AppFlavor::Proxy,
        })
        .expect("registers");

    reloader.load();
    reloader
}

#[test]
fn half_domaintagging_masks_tag_bits() {
    let dir = tempfile::tempdir().expect("tempdir");
    build_tree(dir.path());
    let reloader = load(dir.path());
    let set = reloader.system().current();

    let cat_module = reloader.registry().module_by_name("categorization").expect("module");
    let cat = set.categorization_conf_get(cat_module).expect("loaded");

    // Thread option: bit 1 is masked under half domaintagging.
    categorization_set_thread_options(&PrefCategories::with_bit(1));

    let name = text_to_name("name.com").expect("valid");

    // Org without HALF_DOMAINTAGGING: both tag bits plus the
    // application entry's bit.
    let mut cats = PrefCategories::none();
    cat.by_domain(&set, &mut cats, &name, 0, 0, None);
    assert!(!cats.get_bit(0), "entry is org-gated and this org has no flags");

    let mut cats = PrefCategories::none();
    cat.by_domain(&set, &mut cats, &name, 0, ORGFLAG_HALF_DOMAINTAGGING, None);
    assert!(cats.get_bit(0), "tag bit 0 stays");
    assert!(!cats.get_bit(1), "tag bit 1 is half-domaintagging masked");
    assert!(cats.get_bit(148), "application entry bit");

    categorization_set_thread_options(&PrefCategories::none());
}

#[test]
fn app_url_match_through_the_pref() {
    let dir = tempfile::tempdir().expect("tempdir");
    build_tree(dir.path());
    let reloader = load(dir.path());
    let set = reloader.system().current();

    let cat_module = reloader.registry().module_by_name("categorization").expect("module");
    let proxy_module = reloader.registry().module_by_name("apps-proxy").expect("module");
    let prefs_module = reloader.registry().module_by_name("cloudprefs").expect("module");

    let cat = set.categorization_conf_get(cat_module).expect("loaded");
    let apps = set.application_conf_get(proxy_module).expect("loaded");
    let prefs = set.prefs_conf_get(prefs_module).expect("loaded");

    let pref = prefs.pref_by_origin(1234, 55, 0).expect("resolves");
    let catalog = CategorizedApps {
        categorization: Some(cat.as_ref()),
        set: set.as_ref(),
        app: Some(apps.as_ref()),
    };

    // The bundle's app-block list {4} + app 4's URL list.
    let mut cats = PrefCategories::none();
    let appid = pref.applicationlist_url_match(
        &catalog,
        ListKind::AppBlock,
        b"api.bobdata.com/bobpost",
        &mut cats,
    );
    assert_eq!(appid, 4);
    assert!(cats.get_bit(71), "the app list's category bit is set");

    let mut cats = PrefCategories::none();
    let appid = pref.applicationlist_url_match(
        &catalog,
        ListKind::AppBlock,
        b"api.bobdata.com/other",
        &mut cats,
    );
    assert_eq!(appid, 0);
    assert!(cats.is_none());
}

#[test]
fn address_categorization() {
    let dir = tempfile::tempdir().expect("tempdir");
    build_tree(dir.path());
    let reloader = load(dir.path());
    let set = reloader.system().current();

    let cat_module = reloader.registry().module_by_name("categorization").expect("module");
    let cat = set.categorization_conf_get(cat_module).expect("loaded");

    let mut cats = PrefCategories::none();
    cat.by_address(&set, &mut cats, &"5.6.7.8".parse().expect("valid"), 0, 0, None);
    assert!(cats.get_bit(66));

    let mut cats = PrefCategories::none();
    cat.by_address(&set, &mut cats, &"5.6.7.9".parse().expect("valid"), 0, 0, None);
    assert!(cats.is_none());
}

#[test]
fn app_proxy_through_the_pref() {
    let dir = tempfile::tempdir().expect("tempdir");
    build_tree(dir.path());
    let reloader = load(dir.path());
    let set = reloader.system().current();

    let cat_module = reloader.registry().module_by_name("categorization").expect("module");
    let prefs_module = reloader.registry().module_by_name("cloudprefs").expect("module");

    let catalog = CategorizedApps {
        categorization: set.categorization_conf_get(cat_module).map(|c| c.as_ref()),
        set: set.as_ref(),
        app: None,
    };

    let prefs = set.prefs_conf_get(prefs_module).expect("loaded");
    let pref = prefs.pref_by_origin(1234, 55, 0).expect("resolves");

    // App 4's URL hostname landed in its exact proxy list; the
    // super-index pre-check admits it and the per-app search names it.
    let name = text_to_name("api.bobdata.com").expect("valid");
    assert_eq!(pref.applicationlist_proxy(&name, ListKind::AppBlock, &catalog, None), 4);

    let name = text_to_name("not-a-proxy.example").expect("valid");
    assert_eq!(pref.applicationlist_proxy(&name, ListKind::AppBlock, &catalog, None), 0);
}

#[test]
fn app_domain_match_through_the_pref() {
    let dir = tempfile::tempdir().expect("tempdir");
    build_tree(dir.path());
    let reloader = load(dir.path());
    let set = reloader.system().current();

    let cat_module = reloader.registry().module_by_name("categorization").expect("module");
    let apps_module = reloader.registry().module_by_name("apps").expect("module");
    let prefs_module = reloader.registry().module_by_name("cloudprefs").expect("module");

    let catalog = CategorizedApps {
        categorization: set.categorization_conf_get(cat_module).map(|c| c.as_ref()),
        set: set.as_ref(),
        app: set.application_conf_get(apps_module).map(|a| a.as_ref()),
    };

    let prefs = set.prefs_conf_get(prefs_module).expect("loaded");
    let pref = prefs.pref_by_origin(1234, 55, 0).expect("resolves");

    let name = text_to_name("www.name.com").expect("valid");
    let find = PrefCategories::with_bit(148);
    let mut cats = PrefCategories::none();

    let appid = pref.applicationlist_domain_match(
        Some(&mut cats),
        ListKind::AppBlock,
        &name,
        &find,
        &catalog,
        None,
    );

    assert_eq!(appid, 4);
    assert!(cats.get_bit(71), "the bundle list's bit");
    assert!(cats.get_bit(148), "the categorization entry's bit");
}
