//! Catalog fixtures and mock endpoint helpers

use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Primary record for item `id`
pub fn product_json(id: u64) -> Value {
    json!({
        "id": id,
        "displayName": format!("Test Product {id}"),
        "brandName": "Now Foods",
        "brandCode": "NOW",
        "partNumber": format!("NOW-{id}"),
        "url": format!("https://www.iherb.com/pr/test-product/{id}"),
        "listPrice": "$19.99",
        "isAvailableToPurchase": true,
        "upcCode": "from-primary",
        "imageIndices": [1],
    })
}

/// Related-items fragment naming the origin product
pub fn related_json(id: u64) -> Value {
    json!({
        "originProduct": {"name": format!("Test Product {id}"), "listPrice": "$19.99"},
        "recommendedProducts": [{"name": "Companion", "listPrice": "$5.00"}],
    })
}

/// Sitemap document listing `links`
pub fn sitemap_xml(links: &[String]) -> String {
    let mut doc = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
"#,
    );
    for link in links {
        doc.push_str(&format!("  <url><loc>{link}</loc></url>\n"));
    }
    doc.push_str("</urlset>\n");
    doc
}

/// Serve `links` as the default sitemap
pub async fn mount_sitemap(server: &MockServer, links: &[String]) {
    Mock::given(method("GET"))
        .and(path("/sitemaps/products.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sitemap_xml(links)))
        .expect(1)
        .mount(server)
        .await;
}

/// Serve all three calls for item `id` successfully, each exactly once
pub async fn mount_item(server: &MockServer, id: u64) {
    mount_primary(server, id, ResponseTemplate::new(200).set_body_json(product_json(id)), 1).await;
    mount_related(server, id, ResponseTemplate::new(200).set_body_json(related_json(id)), 1).await;
    mount_code_lookup(
        server,
        id,
        ResponseTemplate::new(200).set_body_json(json!({"upcCode": format!("0000{id}")})),
        1,
    )
    .await;
}

/// Primary record endpoint for `id`, expected `calls` times
pub async fn mount_primary(server: &MockServer, id: u64, response: ResponseTemplate, calls: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/product/{id}")))
        .respond_with(response)
        .expect(calls)
        .mount(server)
        .await;
}

/// Related-items endpoint for `id`, expected `calls` times
pub async fn mount_related(server: &MockServer, id: u64, response: ResponseTemplate, calls: u64) {
    Mock::given(method("GET"))
        .and(path("/recommendations/freqpurchasedtogether"))
        .and(query_param("productId", id.to_string()))
        .respond_with(response)
        .expect(calls)
        .mount(server)
        .await;
}

/// Code lookup endpoint for `id`, expected `calls` times
pub async fn mount_code_lookup(server: &MockServer, id: u64, response: ResponseTemplate, calls: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/ugc/api/product/{id}")))
        .respond_with(response)
        .expect(calls)
        .mount(server)
        .await;
}

/// Item link as it appears in a sitemap on `server`
pub fn item_link(server: &MockServer, id: &str) -> String {
    format!("{}/pr/test-product/{id}", server.uri())
}
