use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use capture_core::ResourceCategory;
use capture_engine::{ResourceInfo, ResourceStore, StoreOutcome};
use pretty_assertions::assert_eq;

fn info(url: &str, path: &str) -> ResourceInfo {
    ResourceInfo {
        url: url.to_string(),
        local_path: path.to_string(),
        category: ResourceCategory::Images,
        content: Bytes::from_static(b"img"),
    }
}

#[test]
fn the_same_url_is_stored_once() {
    let store = ResourceStore::new(200);
    let first = store.put_if_absent(info("https://a.test/x.png", "static/images/x.png"));
    let second = store.put_if_absent(info("https://a.test/x.png", "static/images/other.png"));
    assert_eq!(first, StoreOutcome::Inserted("static/images/x.png".to_string()));
    assert_eq!(second, StoreOutcome::Existing("static/images/x.png".to_string()));
    assert_eq!(store.len(), 1);
}

#[test]
fn capacity_is_never_exceeded() {
    let store = ResourceStore::new(200);
    let mut full = 0;
    for i in 0..250 {
        let url = format!("https://a.test/{i}.png");
        if store.put_if_absent(info(&url, &format!("static/images/{i}.png"))) == StoreOutcome::Full {
            full += 1;
        }
    }
    assert_eq!(store.len(), 200);
    assert_eq!(full, 50);
    assert!(store.is_full());
}

#[test]
fn racing_writers_agree_on_one_entry() {
    let store = Arc::new(ResourceStore::new(200));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                store.put_if_absent(info("https://a.test/shared.png", "static/images/shared.png"))
            })
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let inserted = outcomes
        .iter()
        .filter(|o| matches!(o, StoreOutcome::Inserted(_)))
        .count();
    assert_eq!(inserted, 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn racing_writers_respect_the_cap() {
    let store = Arc::new(ResourceStore::new(200));
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let url = format!("https://a.test/{worker}/{i}.png");
                    store.put_if_absent(info(&url, &format!("static/images/{worker}-{i}.png")));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(store.len(), 200);
}

#[test]
fn colliding_paths_get_distinct_names() {
    let store = ResourceStore::new(200);
    let a = store.put_if_absent(info("https://a.test/one/logo.png", "static/images/logo.png"));
    let b = store.put_if_absent(info("https://b.test/two/logo.png", "static/images/logo.png"));
    let (StoreOutcome::Inserted(a), StoreOutcome::Inserted(b)) = (a, b) else {
        panic!("both should be stored");
    };
    assert_eq!(a, "static/images/logo.png");
    assert_ne!(a, b);
    assert!(b.starts_with("static/images/logo-") && b.ends_with(".png"));

    let paths: Vec<_> = store.snapshot().iter().map(|r| r.local_path.clone()).collect();
    assert_eq!(paths.len(), 2);
}

#[test]
fn reserved_paths_are_honoured_by_the_later_download() {
    let store = ResourceStore::new(200);
    let reserved = store.reserve_path("https://a.test/bg.png", "static/images/bg.png");
    let other = store.reserve_path("https://b.test/bg.png", "static/images/bg.png");
    assert_ne!(reserved, other);

    let stored = store.put_if_absent(info("https://a.test/bg.png", &reserved));
    assert_eq!(stored, StoreOutcome::Inserted(reserved));
}
