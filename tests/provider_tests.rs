//! HTTP client behavior against a local mock upstream.

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use finreports::error::FetchError;
use finreports::models::{PeriodType, StatementFields, StatementKind};
use finreports::provider::{FinancialDataProvider, VciClient};
use finreports::scraper::{CafefReportSource, ReportSource};

use common::test_config;

fn client_for(server: &MockServer) -> VciClient {
    let mut config = test_config(":memory:");
    config.provider_base_url = server.uri();
    VciClient::new(&config).expect("client")
}

#[tokio::test]
async fn statement_rows_map_into_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/finance/balance-sheet"))
        .and(query_param("symbol", "VNM"))
        .and(query_param("period", "year"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "yearReport": 2024, "totalAssets": 1500.0, "totalLiabilities": 600.0 },
                { "yearReport": 2023, "totalAssets": 1400.0 }
            ]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let records = client
        .fetch_statements("VNM", StatementKind::BalanceSheet, PeriodType::Annual, "vi")
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].key.label(), "2024");
    match &records[0].fields {
        StatementFields::Balance(fields) => {
            assert_eq!(fields.total_assets, Some(1500.0));
            assert_eq!(fields.total_liabilities, Some(600.0));
        }
        other => panic!("unexpected fields: {other:?}"),
    }
}

#[tokio::test]
async fn http_429_is_a_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .fetch_statements("VNM", StatementKind::IncomeStatement, PeriodType::Annual, "vi")
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
}

#[tokio::test]
async fn throttle_phrase_in_error_body_is_a_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("Quá nhiều request, vui lòng thử lại sau"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .fetch_statements("VNM", StatementKind::CashFlow, PeriodType::Annual, "vi")
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
}

#[tokio::test]
async fn http_404_means_invalid_symbol() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .fetch_statements("NOPE", StatementKind::BalanceSheet, PeriodType::Annual, "vi")
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::InvalidSymbol(symbol) if symbol == "NOPE"));
}

#[tokio::test]
async fn symbol_listing_is_uppercased() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/listing/all-symbols"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "symbol": "vnm", "organ_name": "Vinamilk", "exchange": "HOSE" }
            ]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let listing = client.all_symbols().await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].symbol, "VNM");
    assert_eq!(listing[0].name.as_deref(), Some("Vinamilk"));
}

#[tokio::test]
async fn report_listing_parses_and_downloads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/FileBCTC.ashx"))
        .and(query_param("Symbol", "VNM"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Data": [
                {
                    "Name": "Báo cáo tài chính hợp nhất năm 2024",
                    "Link": format!("{}/files/vnm-2024.pdf", server.uri()),
                    "Year": 2024,
                    "Quarter": 0
                },
                {
                    "Name": "Báo cáo tài chính riêng lẻ năm 2024",
                    "Link": format!("{}/files/vnm-2024-rl.pdf", server.uri()),
                    "Year": 2024,
                    "Quarter": 0
                }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/vnm-2024.pdf"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes("TỔNG CỘNG TÀI SẢN 1.000".as_bytes()),
        )
        .mount(&server)
        .await;

    let mut config = test_config(":memory:");
    config.report_api_url = format!("{}/FileBCTC.ashx", server.uri());
    let source = CafefReportSource::new(&config).unwrap();

    let links = source.list_reports("VNM").await.unwrap();
    assert_eq!(links.len(), 2);
    let consolidated: Vec<_> = links.iter().filter(|link| link.consolidated).collect();
    assert_eq!(consolidated.len(), 1);
    assert!(consolidated[0].is_annual());

    let bytes = source.download(&consolidated[0].url).await.unwrap();
    assert!(!bytes.is_empty());
}
