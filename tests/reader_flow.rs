use std::fs;
use std::path::Path;
use std::time::Duration;

use clawmic_reader::catalog::{AssetPaths, Catalog, Lang};
use clawmic_reader::config::OfflineConfig;
use clawmic_reader::data::{self, Connectivity};
use clawmic_reader::network::{HttpNetwork, Source};
use clawmic_reader::offline::{CachePolicy, InstallOutcome, Lifecycle, Settings, Worker};
use clawmic_reader::preferences::{self, ReaderPreferences};
use clawmic_reader::reader::{PageContent, ReaderSession};
use clawmic_reader::router::{Route, Router};
use clawmic_reader::storage::{Options, Store};
use url::Url;

const CATALOG: &str = r#"[
    {"issue_id": 1, "date": "2025-01-05", "author": "Satoshi",
     "title_en": "Claws Out", "title_ch": "出爪",
     "comics_en": ["p1.png", "p2.png"], "comics_ch": ["p1.png"]},
    {"issue_id": 2, "date": "2025-02-10", "author": "Satoshi",
     "title_en": "Second Helping", "title_ch": "再來一份",
     "comics_en": ["p1.png", "p2.png", "p3.png", "p4.png"], "comics_ch": ["p1.png", "p2.png"]}
]"#;

const ABOUT: &str = "我是編輯。\n------\nEnglish Version\n------\nI am the editor.";

fn write_site(dir: &Path) {
    fs::write(dir.join("index.html"), "<!doctype html>").unwrap();
    fs::write(dir.join("styles.css"), "body {}").unwrap();
    fs::write(dir.join("app.js"), "// app").unwrap();
    fs::write(dir.join("comic_db.json"), CATALOG).unwrap();
    fs::write(dir.join("about_the_editor.txt"), ABOUT).unwrap();
    fs::write(dir.join("editor_photo.png"), [0x89, b'P', b'N', b'G']).unwrap();
}

fn spawn_worker(site: &Path, db: &Path, version: &str) -> (Worker, AssetPaths) {
    let base = Url::from_directory_path(site).unwrap();
    let paths = AssetPaths::new(base.as_str()).unwrap();
    let store = Store::open(Options {
        path: Some(db.to_path_buf()),
    })
    .unwrap();
    let policy = CachePolicy::new(
        store,
        HttpNetwork::new(Duration::from_secs(5)).unwrap(),
        Settings {
            version: version.into(),
            base_url: base.to_string(),
            shell: OfflineConfig::default().shell,
            document: "index.html".into(),
        },
    )
    .unwrap();
    (Worker::spawn(policy), paths)
}

#[test]
fn installed_site_keeps_working_without_its_files() {
    let site = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let db = state.path().join("offline.db");
    write_site(site.path());

    {
        let (worker, paths) = spawn_worker(site.path(), &db, "clawmic-v1.009");
        let lifecycle = worker.handle().start().recv().unwrap();
        assert_eq!(
            lifecycle,
            Lifecycle::Activated {
                install: InstallOutcome::Installed { assets: 6 },
                purged: vec![],
            }
        );
        let site_data = data::load_site(&worker.handle(), &paths).unwrap();
        assert_eq!(site_data.catalog.len(), 2);
        assert_eq!(site_data.about.en, "I am the editor.");
    }

    for entry in fs::read_dir(site.path()).unwrap() {
        fs::remove_file(entry.unwrap().path()).unwrap();
    }

    let (worker, paths) = spawn_worker(site.path(), &db, "clawmic-v1.009");
    let lifecycle = worker.handle().start().recv().unwrap();
    assert!(matches!(
        lifecycle,
        Lifecycle::Activated {
            install: InstallOutcome::AlreadyInstalled,
            ..
        }
    ));
    let site_data = data::load_site(&worker.handle(), &paths).unwrap();
    assert_eq!(site_data.about.ch, "我是編輯。");
    assert_eq!(
        data::check_connectivity(&worker.handle(), &paths),
        Connectivity::Offline
    );

    let cached = worker
        .handle()
        .fetch(clawmic_reader::network::Request::get(paths.catalog()))
        .recv()
        .unwrap()
        .unwrap();
    assert_eq!(cached.source, Source::Cache);
}

#[test]
fn deep_link_reading_session() {
    let catalog = Catalog::from_json(CATALOG.as_bytes()).unwrap();
    let paths = AssetPaths::new("https://clawmic.example/").unwrap();
    let mut router = Router::new("#/reader/2/3");

    let route = router.settle(&catalog);
    assert_eq!(
        route,
        Route::Reader {
            issue_id: 2,
            page: 2
        }
    );

    let issue = catalog.issue(2).unwrap();
    let mut session = ReaderSession::enter(issue, Lang::English, 2);
    match session.content(issue, &paths) {
        PageContent::Comic { image_url, alt } => {
            assert_eq!(image_url, "https://clawmic.example/img/issue2/p2.png");
            assert_eq!(alt, "Second Helping - page 2");
        }
        other => panic!("expected a comic page, got {other:?}"),
    }

    session.go_to(4);
    let next = session.advance(&catalog);
    assert_eq!(next.fragment(), "#/reader/1/1");
    router.navigate(&next.fragment());
    assert!(router.can_go_back());
    assert!(router.back());
    assert_eq!(router.current(), "#/reader/2/3");

    router.navigate("#/reader/42");
    assert_eq!(router.settle(&catalog), Route::Library);
    assert_eq!(router.current(), "#/library");
}

#[test]
fn preferences_survive_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");
    let prefs = ReaderPreferences {
        lang: Lang::Chinese,
        issue_id: Some(2),
        page: Some(1),
        ..ReaderPreferences::default()
    };
    {
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        preferences::save(&store, &prefs).unwrap();
        store.close().unwrap();
    }

    let store = Store::open(Options { path: Some(path) }).unwrap();
    assert_eq!(preferences::load(&store), prefs);
}
