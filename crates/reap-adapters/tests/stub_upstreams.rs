use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use reap_adapters::{ClassifiedsAdapter, CountyRegistry, RegistryAdapter, SourceAdapter};
use reap_core::SearchCriteria;
use reap_fetch::{HttpClientConfig, HttpFetcher, RetryPolicy};
use serde_json::{json, Value as JsonValue};
use tokio::net::TcpListener;

const SALE_PAGE: &str = r#"
    <table class="sales">
      <tr><td class="address">4410 Duval Rd</td><td class="bid">$41,250</td></tr>
      <tr><td class="address">77 Burnet Rd</td><td class="bid">$18,000</td></tr>
    </table>"#;

fn fetcher() -> Arc<HttpFetcher> {
    let config = HttpClientConfig {
        retry: RetryPolicy::immediate(1),
        ..Default::default()
    };
    Arc::new(HttpFetcher::new(config).unwrap())
}

async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn sale_page() -> Html<&'static str> {
    Html(SALE_PAGE)
}

async fn feed() -> Json<JsonValue> {
    Json(json!([
        {"situs_address": "900 E 7th St", "minimum_bid": "22000"},
        {"situs_address": "12 Pleasant Valley Rd", "minimum_bid": 9500},
        {"minimum_bid": "1"}
    ]))
}

/// One county served by the stub; unrouted paths answer 404.
fn registry(base: &str, listing_path: &str, feed_path: &str) -> CountyRegistry {
    let yaml = format!(
        r#"
counties:
  - id: stub-tx
    name: Stub County
    state: TX
    cities: [Austin]
    base_url: {base}
    listing_path: {listing_path}
    selectors:
      row: "table.sales tr"
      address: ".address"
      price: ".bid"
    open_data:
      url: {base}{feed_path}
      city_field: situs_city
      fields:
        address: situs_address
        price: minimum_bid
"#
    );
    CountyRegistry::from_yaml(&yaml).unwrap()
}

async fn registry_upstream() -> String {
    spawn(
        Router::new()
            .route("/sales", get(sale_page))
            .route("/feed.json", get(feed)),
    )
    .await
}

fn austin() -> SearchCriteria {
    SearchCriteria::for_city("Austin", "TX")
}

#[tokio::test]
async fn registry_merges_listing_page_and_open_data() {
    let base = registry_upstream().await;
    let adapter = RegistryAdapter::new(fetcher(), registry(&base, "/sales", "/feed.json"));

    let props = adapter.fetch(&austin()).await.unwrap();

    let addresses: Vec<_> = props.iter().map(|p| p.address.as_str()).collect();
    assert_eq!(
        addresses,
        vec!["4410 Duval Rd", "77 Burnet Rd", "900 E 7th St", "12 Pleasant Valley Rd"]
    );
    assert_eq!(props[0].price, Some(41_250.0));
    assert_eq!(props[3].price, Some(9_500.0));
}

#[tokio::test]
async fn registry_keeps_open_data_when_listing_page_fails() {
    let base = registry_upstream().await;
    let adapter = RegistryAdapter::new(fetcher(), registry(&base, "/gone", "/feed.json"));

    let props = adapter.fetch(&austin()).await.unwrap();

    assert_eq!(props.len(), 2);
    assert_eq!(props[0].address, "900 E 7th St");
    assert_eq!(props[0].price, Some(22_000.0));
}

#[tokio::test]
async fn registry_keeps_listing_page_when_open_data_fails() {
    let base = registry_upstream().await;
    let adapter = RegistryAdapter::new(fetcher(), registry(&base, "/sales", "/gone.json"));

    let props = adapter.fetch(&austin()).await.unwrap();

    assert_eq!(props.len(), 2);
    assert!(props.iter().all(|p| p.state == "TX" && p.city == "Austin"));
}

#[tokio::test]
async fn registry_fails_only_when_both_channels_fail() {
    let base = registry_upstream().await;
    let adapter = RegistryAdapter::new(fetcher(), registry(&base, "/gone", "/gone.json"));

    assert!(adapter.fetch(&austin()).await.is_err());
    assert!(adapter.search(&austin()).await.is_empty());
}

#[derive(Clone, Default)]
struct Classifieds {
    hits: Arc<AtomicUsize>,
}

/// Every term returns one shared listing plus one listing of its own.
async fn search_results(
    State(upstream): State<Classifieds>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<String> {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    let term = params.get("query").cloned().unwrap_or_default();
    let slug = term.replace(' ', "-");
    Html(format!(
        r#"<ol>
          <li class="cl-static-search-result">
            <a href="https://austin.example/reb/d/shared.html"><div class="title">3br owner finance bungalow</div>
            <div class="price">$150,000</div></a>
          </li>
          <li class="cl-static-search-result">
            <a href="https://austin.example/reb/d/{slug}.html"><div class="title">House {term}</div>
            <div class="price">$99,000</div></a>
          </li>
        </ol>"#
    ))
}

#[tokio::test]
async fn classifieds_fans_out_every_term_and_dedupes_across_terms() {
    let upstream = Classifieds::default();
    let base = spawn(
        Router::new()
            .route("/austin/search/rea", get(search_results))
            .with_state(upstream.clone()),
    )
    .await;
    let adapter = ClassifiedsAdapter::new(fetcher()).with_url_template(format!("{base}/{{subdomain}}/search/rea"));

    let props = adapter.fetch(&austin()).await.unwrap();

    assert_eq!(upstream.hits.load(Ordering::SeqCst), 4);
    assert_eq!(props.len(), 5);
    let shared = props
        .iter()
        .filter(|p| p.source_url.as_deref() == Some("https://austin.example/reb/d/shared.html"))
        .count();
    assert_eq!(shared, 1);
    assert_eq!(props[0].metadata.mentions_owner_financing, Some(true));
    assert!(props.iter().any(|p| p.address == "House rent to own"));
}
