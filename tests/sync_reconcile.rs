// tests/sync_reconcile.rs
mod common;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::{listing, posted};
use job_board_sync::enrich::{slugify, EnrichedListing};
use job_board_sync::sync::memory::Call;
use job_board_sync::sync::store::fields;
use job_board_sync::sync::{InMemoryCms, Reconciler, RemoteStore, WriterLease};
use job_board_sync::Source;
use serde_json::{json, Map, Value};

fn now() -> DateTime<Utc> {
    "2024-06-01T12:00:00Z".parse().unwrap()
}

fn reconciler(cms: &Arc<InMemoryCms>) -> Reconciler {
    Reconciler::new(
        Arc::clone(cms) as Arc<dyn RemoteStore>,
        WriterLease::assume_single_writer("test"),
    )
}

fn enriched(company: &str, title: &str, url: &str) -> EnrichedListing {
    EnrichedListing::bare(posted(
        listing(Source::Greenhouse, company, title, url),
        now() - Duration::days(2),
    ))
}

/// Field data for an item the pipeline wrote on an earlier run.
fn managed(company: &str, title: &str, url: &str, expires: DateTime<Utc>) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert(fields::NAME.into(), json!(format!("{title} at {company}")));
    m.insert(
        fields::SLUG.into(),
        json!(slugify(title, company, "New York, NY")),
    );
    m.insert(fields::COMPANY.into(), json!(company));
    m.insert(fields::TITLE.into(), json!(title));
    m.insert(fields::LOCATION.into(), json!("New York, NY"));
    m.insert(fields::SOURCE_URL.into(), json!(url));
    m.insert(fields::EXPIRATION_DATE.into(), json!(expires.to_rfc3339()));
    m.insert(fields::PIPELINE_MANAGED.into(), json!(true));
    m
}

/// An item created by hand in the CMS.
fn manual(name: &str, expires: DateTime<Utc>) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert(fields::NAME.into(), json!(name));
    m.insert(fields::SLUG.into(), json!(name.to_lowercase()));
    m.insert(fields::EXPIRATION_DATE.into(), json!(expires.to_rfc3339()));
    m
}

#[tokio::test]
async fn source_url_match_updates_in_place() {
    let cms = Arc::new(InMemoryCms::new());
    let id = cms
        .seed(
            managed("Acme", "Architect", "https://gh/acme/1", now() + Duration::days(3)),
            false,
        )
        .await;

    let mut incoming = enriched("Acme", "Senior Architect", "https://gh/acme/1");
    incoming.listing.description = "New text".into();
    let report = reconciler(&cms)
        .reconcile_at(&[incoming], now())
        .await
        .unwrap();

    assert_eq!(report.created, 0);
    assert_eq!(report.updated, 1);
    assert_eq!(report.fingerprint_matches, 0);
    assert_eq!(cms.len().await, 1);
    let data = cms.field_data(&id).await.unwrap();
    assert_eq!(data[fields::TITLE], json!("Senior Architect"));
    assert_eq!(data[fields::DESCRIPTION], json!("New text"));
    // slug is stable across updates
    assert_eq!(data[fields::SLUG], json!("architect-at-acme-new-york-ny"));
}

#[tokio::test]
async fn fingerprint_match_catches_a_changed_url() {
    let cms = Arc::new(InMemoryCms::new());
    let id = cms
        .seed(
            managed("Acme Inc.", "Architect", "https://adzuna/old", now() + Duration::days(3)),
            false,
        )
        .await;

    let incoming = enriched("ACME inc", "architect", "https://gh/acme/1");
    let report = reconciler(&cms)
        .reconcile_at(&[incoming], now())
        .await
        .unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 0);
    assert_eq!(report.fingerprint_matches, 1);
    let item = cms.item(&id).await.unwrap();
    assert_eq!(item.source_url.as_deref(), Some("https://gh/acme/1"));
}

#[tokio::test]
async fn each_remote_item_is_claimed_by_one_listing() {
    let cms = Arc::new(InMemoryCms::new());
    cms.seed(
        managed("Acme", "Architect", "https://gh/acme/1", now() + Duration::days(3)),
        false,
    )
    .await;

    let incoming = vec![
        enriched("Acme", "Architect", "https://gh/acme/2"),
        enriched("Acme", "Architect", "https://gh/acme/1"),
        enriched("Acme", "Architect", "https://gh/acme/3"),
    ];
    let report = reconciler(&cms)
        .reconcile_at(&incoming, now())
        .await
        .unwrap();

    // /1 matches its own item by URL; /2 and /3 must not steal it
    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 2);
    assert_eq!(report.fingerprint_matches, 0);
    assert_eq!(cms.len().await, 3);
}

#[tokio::test]
async fn a_fingerprint_twin_is_created_once_the_item_is_claimed() {
    let cms = Arc::new(InMemoryCms::new());
    let id = cms
        .seed(
            managed("Acme", "Architect", "https://adzuna/old", now() + Duration::days(3)),
            false,
        )
        .await;

    let incoming = vec![
        enriched("Acme", "Architect", "https://lever/1"),
        enriched("Acme", "Architect", "https://lever/2"),
    ];
    let report = reconciler(&cms)
        .reconcile_at(&incoming, now())
        .await
        .unwrap();

    assert_eq!(report.fingerprint_matches, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 1);
    let item = cms.item(&id).await.unwrap();
    assert_eq!(item.source_url.as_deref(), Some("https://lever/1"));
}

#[tokio::test]
async fn hand_made_items_are_never_matched() {
    let cms = Arc::new(InMemoryCms::new());
    let mut curated = managed("Acme", "Architect", "https://gh/acme/1", now() + Duration::days(3));
    curated.insert(fields::NAME.into(), json!("Hand-curated feature"));
    curated.insert(fields::PIPELINE_MANAGED.into(), json!(false));
    let id = cms.seed(curated.clone(), false).await;

    let incoming = vec![
        // same source URL
        enriched("Acme", "Architect", "https://gh/acme/1"),
        // same fingerprint
        enriched("Acme", "Architect", "https://lever/acme/9"),
    ];
    let report = reconciler(&cms)
        .reconcile_at(&incoming, now())
        .await
        .unwrap();

    assert_eq!(report.updated, 0);
    assert_eq!(report.created, 2);
    assert_eq!(report.fingerprint_matches, 0);
    assert_eq!(cms.field_data(&id).await.unwrap(), curated);
    assert!(!cms.item(&id).await.unwrap().pipeline_managed);
    // its slug stays reserved
    let mut slugs: Vec<String> = cms.items().await.into_iter().map(|i| i.slug).collect();
    slugs.sort();
    assert_eq!(
        slugs,
        vec![
            "architect-at-acme-new-york-ny",
            "architect-at-acme-new-york-ny-2",
            "architect-at-acme-new-york-ny-3",
        ]
    );
}

#[tokio::test]
async fn expiration_is_a_week_out_capped_at_sixty_days_from_posting() {
    let cms = Arc::new(InMemoryCms::new());
    let fresh = EnrichedListing::bare(posted(
        listing(Source::Lever, "Acme", "Fresh", "https://lever/fresh"),
        now() - Duration::days(10),
    ));
    let old = EnrichedListing::bare(posted(
        listing(Source::Lever, "Acme", "Old", "https://lever/old"),
        now() - Duration::days(58),
    ));
    reconciler(&cms)
        .reconcile_at(&[fresh, old], now())
        .await
        .unwrap();

    let items = cms.items().await;
    let exp = |url: &str| {
        items
            .iter()
            .find(|i| i.source_url.as_deref() == Some(url))
            .and_then(|i| i.expiration_date)
            .unwrap()
    };
    assert_eq!(exp("https://lever/fresh"), now() + Duration::days(7));
    assert_eq!(exp("https://lever/old"), now() + Duration::days(2));
    assert!(items.iter().all(|i| i.pipeline_managed && !i.is_draft));
}

#[tokio::test]
async fn items_past_expiration_go_to_draft() {
    let cms = Arc::new(InMemoryCms::new());
    let lapsed = cms
        .seed(
            managed("Acme", "A", "https://gh/a", now() - Duration::seconds(1)),
            false,
        )
        .await;
    let live = cms
        .seed(
            managed("Acme", "B", "https://gh/b", now() + Duration::seconds(1)),
            false,
        )
        .await;
    let hand_made = cms
        .seed(manual("Featured", now() - Duration::days(5)), false)
        .await;

    let report = reconciler(&cms).reconcile_at(&[], now()).await.unwrap();

    assert_eq!(report.expired, 1);
    assert!(cms.item(&lapsed).await.unwrap().is_draft);
    assert!(!cms.item(&live).await.unwrap().is_draft);
    assert!(!cms.item(&hand_made).await.unwrap().is_draft);
}

#[tokio::test]
async fn drafts_are_not_expired_again() {
    let cms = Arc::new(InMemoryCms::new());
    cms.seed(
        managed("Acme", "A", "https://gh/a", now() - Duration::days(3)),
        true,
    )
    .await;

    let report = reconciler(&cms).reconcile_at(&[], now()).await.unwrap();
    assert_eq!(report.expired, 0);
    assert!(!cms
        .calls()
        .await
        .iter()
        .any(|c| matches!(c, Call::SetDraft { .. })));
}

#[tokio::test]
async fn managed_items_are_deleted_after_the_grace_period() {
    let cms = Arc::new(InMemoryCms::new());
    let day31 = cms
        .seed(managed("Acme", "A", "https://gh/a", now() - Duration::days(31)), true)
        .await;
    let day29 = cms
        .seed(managed("Acme", "B", "https://gh/b", now() - Duration::days(29)), true)
        .await;
    let day100 = cms
        .seed(managed("Acme", "C", "https://gh/c", now() - Duration::days(100)), true)
        .await;
    let hand_made = cms
        .seed(manual("Evergreen", now() - Duration::days(100)), false)
        .await;

    let report = reconciler(&cms).reconcile_at(&[], now()).await.unwrap();

    assert_eq!(report.deleted, 2);
    assert!(cms.item(&day31).await.is_none());
    assert!(cms.item(&day100).await.is_none());
    assert!(cms.item(&day29).await.is_some());
    assert!(cms.item(&hand_made).await.is_some());
}

#[tokio::test]
async fn delete_sweep_reaches_items_on_every_page() {
    let cms = Arc::new(InMemoryCms::new());
    let hand_made = cms
        .seed(manual("Evergreen", now() - Duration::days(100)), false)
        .await;
    for n in 0..6 {
        cms.seed(
            managed(
                "Acme",
                &format!("Role {n}"),
                &format!("https://gh/{n}"),
                now() - Duration::days(40),
            ),
            true,
        )
        .await;
    }

    let report = reconciler(&cms)
        .with_page_size(2)
        .reconcile_at(&[], now())
        .await
        .unwrap();

    assert_eq!(report.deleted, 6);
    assert_eq!(report.errors, 0);
    assert_eq!(cms.len().await, 1);
    assert!(cms.item(&hand_made).await.is_some());
}

#[tokio::test]
async fn a_failed_delete_does_not_stop_the_sweep() {
    let cms = Arc::new(InMemoryCms::new());
    let stuck = cms
        .seed(managed("Acme", "A", "https://gh/a", now() - Duration::days(40)), true)
        .await;
    cms.seed(managed("Acme", "B", "https://gh/b", now() - Duration::days(40)), true)
        .await;
    cms.fail_writes_for_id(stuck.clone()).await;

    let report = reconciler(&cms).reconcile_at(&[], now()).await.unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(report.errors, 1);
    assert!(cms.item(&stuck).await.is_some());
    assert_eq!(cms.len().await, 1);
}

#[tokio::test]
async fn a_reappearing_listing_is_reactivated() {
    let cms = Arc::new(InMemoryCms::new());
    let id = cms
        .seed(
            managed("Acme", "Architect", "https://gh/acme/1", now() - Duration::days(2)),
            true,
        )
        .await;

    let report = reconciler(&cms)
        .reconcile_at(&[enriched("Acme", "Architect", "https://gh/acme/1")], now())
        .await
        .unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(report.expired, 0);
    let item = cms.item(&id).await.unwrap();
    assert!(!item.is_draft);
    assert_eq!(item.expiration_date, Some(now() + Duration::days(7)));
}

#[tokio::test]
async fn failed_snapshot_aborts_before_any_write() {
    let cms = Arc::new(InMemoryCms::new());
    cms.fail_listing(true);

    let result = reconciler(&cms)
        .reconcile_at(&[enriched("Acme", "Architect", "https://gh/1")], now())
        .await;

    assert!(result.is_err());
    assert!(cms.write_calls().await.is_empty());
}

#[tokio::test]
async fn one_failed_write_does_not_stop_the_rest() {
    let cms = Arc::new(InMemoryCms::new());
    cms.fail_writes_for_url("https://gh/2").await;

    let incoming = vec![
        enriched("Acme", "One", "https://gh/1"),
        enriched("Acme", "Two", "https://gh/2"),
        enriched("Acme", "Three", "https://gh/3"),
    ];
    let report = reconciler(&cms)
        .reconcile_at(&incoming, now())
        .await
        .unwrap();

    assert_eq!(report.created, 2);
    assert_eq!(report.errors, 1);
    assert!(report.published);
    assert_eq!(cms.len().await, 2);
}

#[tokio::test]
async fn failed_publish_is_reported_not_fatal() {
    let cms = Arc::new(InMemoryCms::new());
    cms.fail_publish(true);

    let report = reconciler(&cms)
        .reconcile_at(&[enriched("Acme", "One", "https://gh/1")], now())
        .await
        .unwrap();

    assert_eq!(report.created, 1);
    assert!(!report.published);
    assert_eq!(report.errors, 0);
}

#[tokio::test]
async fn second_run_with_the_same_input_creates_nothing() {
    let cms = Arc::new(InMemoryCms::new());
    let incoming = vec![
        enriched("Acme", "One", "https://gh/1"),
        enriched("Acme", "Two", "https://gh/2"),
        enriched("Beta", "One", "https://lever/1"),
    ];

    let first = reconciler(&cms)
        .reconcile_at(&incoming, now())
        .await
        .unwrap();
    let second = reconciler(&cms)
        .reconcile_at(&incoming, now() + Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(first.created, 3);
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 3);
    assert_eq!(cms.len().await, 3);
}

#[tokio::test]
async fn colliding_slugs_get_numbered() {
    let cms = Arc::new(InMemoryCms::new());
    // same slug as the incoming listings but no identity fields to match on
    let mut taken = Map::new();
    taken.insert(fields::NAME.into(), json!("Old page"));
    taken.insert(
        fields::SLUG.into(),
        json!(slugify("Architect", "Acme", "New York, NY")),
    );
    cms.seed(taken, false).await;

    let incoming = vec![
        enriched("Acme", "Architect", "https://gh/acme/1"),
        enriched("Acme", "Architect", "https://gh/acme/2"),
    ];
    reconciler(&cms)
        .reconcile_at(&incoming, now())
        .await
        .unwrap();

    let mut slugs: Vec<String> = cms.items().await.into_iter().map(|i| i.slug).collect();
    slugs.sort();
    assert_eq!(
        slugs,
        vec![
            "architect-at-acme-new-york-ny",
            "architect-at-acme-new-york-ny-2",
            "architect-at-acme-new-york-ny-3",
        ]
    );
}

#[tokio::test]
async fn snapshot_reads_every_page() {
    let cms = Arc::new(InMemoryCms::new());
    for n in 0..5 {
        cms.seed(
            managed(
                "Acme",
                &format!("Role {n}"),
                &format!("https://gh/{n}"),
                now() + Duration::days(3),
            ),
            false,
        )
        .await;
    }

    let report = reconciler(&cms)
        .with_page_size(2)
        .reconcile_at(&[enriched("Acme", "Role 4", "https://gh/4")], now())
        .await
        .unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 0);
    let calls = cms.calls().await;
    assert!(calls.contains(&Call::List { offset: 4, limit: 2 }));
}
