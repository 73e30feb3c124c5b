use std::sync::Arc;

use ferrometric_core::parser::{self, Anomaly, ParseError};
use ferrometric_core::{FetchWindow, RawPayload, Resolution, Series, UtcDateTime};

const DAY: i64 = 86_400_000;
/// 2024-03-01T00:00:00Z
const MARCH_1: i64 = 1_709_251_200_000;

fn window(resolution: Resolution, start_ms: i64, end_ms: i64) -> FetchWindow {
    let series = Series::new(
        "cryptoquant",
        "btc",
        "exchange-netflow",
        Some("all_exchange"),
        resolution,
        "61a5fb1f45de34521f1dcb6d",
    )
    .expect("valid series");
    FetchWindow::new(
        Arc::new(series),
        UtcDateTime::from_unix_millis(start_ms).expect("start"),
        UtcDateTime::from_unix_millis(end_ms).expect("end"),
    )
    .expect("valid window")
}

fn parse(body: &str, window: &FetchWindow) -> Result<parser::ParsedBatch, ParseError> {
    parser::parse(&RawPayload::new(body), window)
}

#[test]
fn test_chart_envelope_with_multiple_fields() {
    let window = window(Resolution::Day, MARCH_1, MARCH_1 + 3 * DAY);
    let body = format!(
        r#"{{
            "status": {{"code": 200, "message": "success"}},
            "result": {{
                "window": "DAY",
                "data": [
                    [{d0}, 1204.5, -310.25, 894.25],
                    [{d1}, 998.0, null, 998.0],
                    [{d2}, "1500.75", "-12", "1488.75"]
                ]
            }}
        }}"#,
        d0 = MARCH_1,
        d1 = MARCH_1 + DAY,
        d2 = MARCH_1 + 2 * DAY,
    );

    let batch = parse(&body, &window).expect("parse");

    assert!(batch.anomalies.is_empty(), "{:?}", batch.anomalies);
    assert_eq!(batch.records.len(), 3);
    assert_eq!(
        batch.records[0].fields,
        vec![Some(1204.5), Some(-310.25), Some(894.25)]
    );
    assert_eq!(batch.records[1].fields, vec![Some(998.0), None, Some(998.0)]);
    assert_eq!(
        batch.records[2].fields,
        vec![Some(1500.75), Some(-12.0), Some(1488.75)]
    );
    for record in &batch.records {
        assert_eq!(record.series_id, *window.series().id());
    }
}

#[test]
fn test_keyed_rows_keep_document_field_order() {
    let window = window(Resolution::Day, MARCH_1, MARCH_1 + 2 * DAY);
    let body = r#"{"data": [
        {"date": "2024-03-01", "reserve": 2.5, "reserve_usd": 1.0, "exchange": "binance"},
        {"datetime": "2024-03-02T00:00:00Z", "reserve": 3.5, "reserve_usd": null}
    ]}"#;

    let batch = parse(body, &window).expect("parse");

    assert!(batch.anomalies.is_empty());
    assert_eq!(batch.fields, vec!["reserve", "reserve_usd"]);
    assert_eq!(batch.records[0].fields, vec![Some(2.5), Some(1.0)]);
    assert_eq!(batch.records[1].fields, vec![Some(3.5), None]);
    assert_eq!(batch.records[1].timestamp.unix_millis(), MARCH_1 + DAY);
}

#[test]
fn test_sparse_keyed_rows_do_not_shift_values() {
    let window = window(Resolution::Day, MARCH_1, MARCH_1 + 3 * DAY);
    let body = r#"{"result": {"data": [
        {"date": "2024-03-01", "inflow": 1, "outflow": 2},
        {"date": "2024-03-02", "outflow": 5},
        {"date": "2024-03-03", "inflow": "n/a", "outflow": 7}
    ]}}"#;

    let batch = parse(body, &window).expect("parse");

    assert_eq!(batch.fields, vec!["inflow", "outflow"]);
    assert_eq!(batch.records.len(), 2);
    assert_eq!(batch.records[0].fields, vec![Some(1.0), Some(2.0)]);
    assert_eq!(batch.records[1].fields, vec![None, Some(5.0)]);
    assert_eq!(
        batch.anomalies,
        vec![Anomaly::NonNumericValue {
            row: 2,
            timestamp_ms: MARCH_1 + 2 * DAY
        }]
    );
}

#[test]
fn test_hourly_rows_are_matched_against_the_window() {
    let hour = 3_600_000;
    let window = window(Resolution::Hour, MARCH_1, MARCH_1 + 2 * hour);
    let body = format!(
        "[[{}, 1], [{}, 2], [{}, 3], [{}, 4]]",
        MARCH_1 - hour,
        MARCH_1,
        MARCH_1 + hour,
        MARCH_1 + 2 * hour
    );

    let batch = parse(&body, &window).expect("parse");

    let stamps: Vec<i64> = batch
        .records
        .iter()
        .map(|record| record.timestamp.unix_millis())
        .collect();
    assert_eq!(stamps, vec![MARCH_1, MARCH_1 + hour]);
    assert_eq!(
        batch.anomalies,
        vec![
            Anomaly::OutOfWindow {
                timestamp_ms: MARCH_1 - hour
            },
            Anomaly::OutOfWindow {
                timestamp_ms: MARCH_1 + 2 * hour
            },
        ]
    );
}

#[test]
fn test_mixed_bad_rows_do_not_poison_the_batch() {
    let window = window(Resolution::Day, MARCH_1, MARCH_1 + 5 * DAY);
    let body = format!(
        r#"{{"result": {{"data": [
            [{d0}, 10.0],
            [{d1}, "n/a"],
            ["yesterday", 4.0],
            [{d2}, null],
            42,
            [],
            [{d3}, 13.0]
        ]}}}}"#,
        d0 = MARCH_1,
        d1 = MARCH_1 + DAY,
        d2 = MARCH_1 + 2 * DAY,
        d3 = MARCH_1 + 3 * DAY,
    );

    let batch = parse(&body, &window).expect("parse");

    assert_eq!(batch.records.len(), 2);
    assert_eq!(batch.anomalies.len(), 5);
    assert!(batch
        .anomalies
        .iter()
        .any(|anomaly| matches!(anomaly, Anomaly::NonNumericValue { row: 1, .. })));
    assert!(batch
        .anomalies
        .iter()
        .any(|anomaly| matches!(anomaly, Anomaly::InvalidTimestamp { row: 2, .. })));
    assert!(batch
        .anomalies
        .iter()
        .any(|anomaly| matches!(anomaly, Anomaly::EmptyValues { row: 3, .. })));
    assert!(batch
        .anomalies
        .iter()
        .any(|anomaly| matches!(anomaly, Anomaly::MalformedRow { row: 4, .. })));
    assert!(batch
        .anomalies
        .iter()
        .any(|anomaly| matches!(anomaly, Anomaly::MalformedRow { row: 5, .. })));
}

#[test]
fn test_unrecognized_payloads_are_rejected() {
    let window = window(Resolution::Day, MARCH_1, MARCH_1 + DAY);

    assert!(matches!(
        parse("<html>Bad Gateway</html>", &window),
        Err(ParseError::InvalidJson(_))
    ));
    assert!(matches!(
        parse(r#"{"status": {"code": 200}}"#, &window),
        Err(ParseError::MissingData)
    ));
    assert!(matches!(
        parse(r#"{"result": {"data": "none"}}"#, &window),
        Err(ParseError::DataNotArray { .. })
    ));
    assert!(matches!(parse("\"ok\"", &window), Err(ParseError::MissingData)));
}

#[test]
fn test_anomaly_messages_name_the_row() {
    let anomaly = Anomaly::NonNumericValue {
        row: 7,
        timestamp_ms: MARCH_1,
    };
    assert_eq!(
        anomaly.to_string(),
        format!("row 7 at {MARCH_1}ms has a non-numeric value")
    );
}
