//! Integration tests for the documents API.

mod common;

use judini::Error;
use serde_json::json;
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::setup;

#[tokio::test]
async fn test_list_documents() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/document"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "d1", "name": "guide.pdf", "tokens": 1200},
            {"id": "d2", "name": "faq.md"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let docs = client.documents().list().await.unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].metadata_str("name"), Some("guide.pdf"));
    assert_eq!(docs[0].metadata["tokens"], json!(1200));
    assert_eq!(docs[1].id, "d2");
}

#[tokio::test]
async fn test_get_document() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/document/d1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "d1", "content": "text"})),
        )
        .mount(&server)
        .await;

    let doc = client.documents().get("d1").await.unwrap();
    assert_eq!(doc.id, "d1");
    assert_eq!(doc.metadata_str("content"), Some("text"));
}

#[tokio::test]
async fn test_delete_document() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/api/v1/document/d1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "Document deleted"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let message = client.documents().delete("d1").await.unwrap();
    assert_eq!(message, "Document deleted");
}

#[tokio::test]
async fn test_delete_document_404() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/api/v1/document/nope"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "missing"})))
        .mount(&server)
        .await;

    let err = client.documents().delete("nope").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(err, Error::Api { status: 404, .. }));
}

#[tokio::test]
async fn test_get_document_404() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/document/nope"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client.documents().get("nope").await.unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_blank_ids_make_no_requests() {
    let (server, client) = setup().await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    assert!(client.documents().get("").await.unwrap_err().is_validation());
    assert!(client.documents().delete("\t").await.unwrap_err().is_validation());

    server.verify().await;
}

#[tokio::test]
async fn test_document_id_with_reserved_characters_is_encoded() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/document/reports%2F2024%3Fdraft%231"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "reports/2024?draft#1",
            "name": "report.pdf"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let document = client.documents().get("reports/2024?draft#1").await.unwrap();
    assert_eq!(document.id, "reports/2024?draft#1");
}
