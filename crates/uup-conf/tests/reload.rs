//! Reload behavior: segment sharing, failure isolation and generation
//! publication.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use uup_conf::{AppFlavor, ConfKind, Reloader, SegmentData};

fn write_app(dir: &Path, appid: u32, domains: &[&str]) {
    let body = format!(
        "application 1\ncount {}\n[domains:{}]\n{}\n",
        domains.len(),
        domains.len(),
        domains.join("\n")
    );
    fs::write(dir.join(format!("app.{appid}")), body).expect("writes");
}

#[test]
fn unchanged_segments_keep_their_lists() {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = tempfile::tempdir().expect("tempdir");
    let apps = dir.path().join("apps");
    fs::create_dir(&apps).expect("mkdir");

    write_app(&apps, 1, &["one.com"]);
    write_app(&apps, 2, &["two.com", "extra.two.com"]);
    write_app(&apps, 3, &["three.com"]);

    let mut reloader = Reloader::new(dir.path());
    reloader
        .register("apps", "apps/app.%u", ConfKind::Application { flavor: AppFlavor::Resolver })
        .expect("registers");

    reloader.load();
    let first = reloader.system().current();
    let apps_conf = first.application_conf_get(0).expect("loaded");
    assert_eq!(apps_conf.segments().len(), 3);

    let seg1 = Arc::clone(apps_conf.segments().find(1).expect("app 1"));
    let seg2 = Arc::clone(apps_conf.segments().find(2).expect("app 2"));
    let list2 = Arc::clone(seg2.domainlist().expect("list"));

    // Update only app 3 and reload.
    write_app(&apps, 3, &["three.com", "more.example"]);
    reloader.load();

    let second = reloader.system().current();
    assert_eq!(second.generation(), first.generation() + 1);

    let apps_conf2 = second.application_conf_get(0).expect("loaded");

    // The untouched segments are the same objects, their lists by
    // pointer; only app 3 was rebuilt.
    assert!(Arc::ptr_eq(apps_conf2.segments().find(1).expect("app 1"), &seg1));
    assert!(Arc::ptr_eq(apps_conf2.segments().find(2).expect("app 2"), &seg2));
    assert!(Arc::ptr_eq(
        apps_conf2.segments().find(2).expect("app 2").domainlist().expect("list"),
        &list2
    ));
    assert!(!Arc::ptr_eq(
        apps_conf2.segments().find(3).expect("app 3"),
        apps_conf.segments().find(3).expect("app 3")
    ));

    // A worker still holding the first generation sees it intact.
    assert!(first.application_conf_get(0).expect("held").segments().find(3).is_some());
}

#[test]
fn rewriting_identical_bytes_is_a_noop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let apps = dir.path().join("apps");
    fs::create_dir(&apps).expect("mkdir");
    write_app(&apps, 7, &["seven.com"]);

    let mut reloader = Reloader::new(dir.path());
    reloader
        .register("apps", "apps/app.%u", ConfKind::Application { flavor: AppFlavor::Resolver })
        .expect("registers");

    reloader.load();
    let first = reloader.system().current();
    let conf1 = Arc::clone(first.application_conf_get(0).expect("loaded"));

    write_app(&apps, 7, &["seven.com"]);
    reloader.load();

    let second = reloader.system().current();
    // Content hash unchanged: the whole module object is carried over.
    assert!(Arc::ptr_eq(second.application_conf_get(0).expect("loaded"), &conf1));
}

#[test]
fn vanished_orgs_are_dropped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let apps = dir.path().join("apps");
    fs::create_dir(&apps).expect("mkdir");
    write_app(&apps, 1, &["one.com"]);
    write_app(&apps, 2, &["two.com"]);

    let mut reloader = Reloader::new(dir.path());
    reloader
        .register("apps", "apps/app.%u", ConfKind::Application { flavor: AppFlavor::Resolver })
        .expect("registers");
    reloader.load();

    fs::remove_file(apps.join("app.1")).expect("removes");
    reloader.load();

    let set = reloader.system().current();
    let conf = set.application_conf_get(0).expect("loaded");
    assert!(conf.segments().find(1).is_none());
    assert!(conf.segments().find(2).is_some());
}

#[test]
fn broken_org_files_become_failed_placeholders() {
    let dir = tempfile::tempdir().expect("tempdir");
    let apps = dir.path().join("apps");
    fs::create_dir(&apps).expect("mkdir");
    write_app(&apps, 1, &["good.com"]);
    fs::write(apps.join("app.2"), "this is not an application file\n").expect("writes");

    let mut reloader = Reloader::new(dir.path());
    reloader
        .register("apps", "apps/app.%u", ConfKind::Application { flavor: AppFlavor::Resolver })
        .expect("registers");
    reloader.load();

    let set = reloader.system().current();
    let conf = set.application_conf_get(0).expect("whole module still loads");

    assert!(!conf.segments().find(1).expect("good org").info().failed_load);
    assert!(conf.segments().find(2).expect("placeholder").info().failed_load);
}

#[test]
fn shared_list_content_is_pointer_shared_across_segments() {
    let dir = tempfile::tempdir().expect("tempdir");
    let apps = dir.path().join("apps");
    fs::create_dir(&apps).expect("mkdir");

    // Two apps with byte-identical domain sections.
    write_app(&apps, 1, &["common.com", "also.common.com"]);
    write_app(&apps, 2, &["common.com", "also.common.com"]);

    let mut reloader = Reloader::new(dir.path());
    reloader
        .register("apps", "apps/app.%u", ConfKind::Application { flavor: AppFlavor::Resolver })
        .expect("registers");

    let misses_before = reloader.counters().misses();
    reloader.load();

    let set = reloader.system().current();
    let conf = set.application_conf_get(0).expect("loaded");

    let l1 = conf.segments().find(1).expect("app 1").domainlist().expect("list");
    let l2 = conf.segments().find(2).expect("app 2").domainlist().expect("list");
    assert!(Arc::ptr_eq(l1, l2), "identical content resolves to one list");

    assert!(reloader.counters().hits() > 0);
    assert!(reloader.counters().misses() > misses_before);
}

#[test]
fn unsegmented_modules_reload_on_content_change() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("blocklist.txt"), "bad.com\n").expect("writes");

    let mut reloader = Reloader::new(dir.path());
    reloader
        .register(
            "blocklist",
            "blocklist.txt",
            ConfKind::Domainlist { flags: uup_lists::DomainListFlags::default() },
        )
        .expect("registers");

    reloader.load();
    let dl1 = Arc::clone(
        reloader.system().current().domainlist_conf_get(0).expect("loaded"),
    );
    assert_eq!(dl1.to_sorted_ascii(), "bad.com");

    // No content change: same object survives the next pass.
    reloader.load();
    assert!(Arc::ptr_eq(
        reloader.system().current().domainlist_conf_get(0).expect("loaded"),
        &dl1
    ));

    fs::write(dir.path().join("blocklist.txt"), "bad.com\nworse.com\n").expect("writes");
    reloader.load();
    let dl2 = reloader.system().current();
    assert_eq!(
        dl2.domainlist_conf_get(0).expect("loaded").to_sorted_ascii(),
        "bad.com worse.com"
    );
}

#[test]
fn lists_module_loads_per_org() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lists = dir.path().join("lists");
    fs::create_dir(&lists).expect("mkdir");
    fs::write(
        lists.join("lists.100"),
        "lists 1\n\
         count 1\n\
         [lists:1]\n\
         1:domain:11:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA:alpha.com\n",
    )
    .expect("writes");

    let mut reloader = Reloader::new(dir.path());
    reloader.register("lists", "lists/lists.%u", ConfKind::Lists).expect("registers");
    reloader.load();

    let set = reloader.system().current();
    let conf = set.lists_conf_get(0).expect("loaded");
    let org = conf.find_org(100).expect("org segment");

    let name = uup_lists::dnsname::text_to_name("www.alpha.com").expect("valid");
    let hit = org.lookup_domainlist(None, 0, &name).expect("hit");
    assert_eq!(hit.listid, 1);
    assert_eq!(hit.bit, 11);
}

#[test]
fn overloads_module_loads() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("overloads"),
        "overloads 1\ncount 1\nDE:10:0:0:FFFFFFFF:80:0\n",
    )
    .expect("writes");

    let mut reloader = Reloader::new(dir.path());
    reloader.register("overloads", "overloads", ConfKind::Overloads).expect("registers");
    reloader.load();

    let set = reloader.system().current();
    let ov = set.overloads_conf_get(0).expect("loaded");
    assert_eq!(ov.by_cc("DE", 0).expect("entry").orgflags, 0x10);
    assert!(ov.by_cc("US", 0).is_none());
}

#[test]
fn a_broken_module_never_unpublishes_old_data() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("blocklist.txt"), "bad.com\n").expect("writes");

    let mut reloader = Reloader::new(dir.path());
    reloader
        .register(
            "blocklist",
            "blocklist.txt",
            ConfKind::Domainlist { flags: uup_lists::DomainListFlags::default() },
        )
        .expect("registers");
    reloader.load();

    fs::write(dir.path().join("blocklist.txt"), "not!!a@@domain\n").expect("writes");
    reloader.load();

    let set = reloader.system().current();
    let dl = set.domainlist_conf_get(0).expect("old data still published");
    assert_eq!(dl.to_sorted_ascii(), "bad.com");
}
