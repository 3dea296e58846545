//! HTTP store tests against a canned single-request server.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::NaiveDate;

use exercise_tree::client::{ActivityRecord, AuthContext, ExerciseStore, RemoteStore};
use exercise_tree::error::StoreError;

/// Serve exactly one request with the given status line, extra headers and
/// body. The join handle yields the raw request (head and body).
fn serve_once(status: &str, headers: &[(&str, &str)], body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let status = status.to_string();
    let headers: String = headers.iter().map(|(k, v)| format!("{k}: {v}\r\n")).collect();
    let body = body.to_string();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut request = String::new();
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
            request.push_str(&line);
            if line == "\r\n" || line.is_empty() {
                break;
            }
        }
        let mut payload = vec![0u8; content_length];
        reader.read_exact(&mut payload).unwrap();
        request.push_str(&String::from_utf8(payload).unwrap());

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{headers}\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).unwrap();
        stream.flush().unwrap();
        request
    });
    (base, handle)
}

fn store(base: &str) -> RemoteStore {
    RemoteStore::new(base, Some(AuthContext::bearer("s3cret")), Duration::from_secs(5))
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

#[test]
fn fetch_day_sends_date_and_bearer_token() {
    let (base, server) = serve_once(
        "200 OK",
        &[],
        r#"{"success":true,"data":[
            {"id":1,"parent_id":null,"date":"2024-06-01","name":"Strength","completed":false,"position":1,"metrics":[]},
            {"id":2,"parent_id":1,"date":"2024-06-01T00:00:00.000000Z","name":"Squat","completed":true,"position":1,"metrics":{"reps":5,"weight":"100kg"}}
        ]}"#,
    );

    let records = store(&base).fetch_day(day()).unwrap();
    let request = server.join().unwrap();

    assert!(request.starts_with("GET /api/activities?date=2024-06-01 "), "{request}");
    assert!(request.to_ascii_lowercase().contains("authorization: bearer s3cret"));

    assert_eq!(records.len(), 2);
    assert!(records[0].metrics.is_empty());
    assert_eq!(records[1].metrics.get("reps").map(String::as_str), Some("5"));
    let squat = records[1].clone().into_exercise().unwrap();
    assert_eq!(squat.date, day());
    assert!(squat.completed);
}

#[test]
fn upsert_posts_batch_envelope() {
    let (base, server) = serve_once(
        "200 OK",
        &[],
        r#"{"success":true,"data":[{"id":42,"parent_id":null,"date":"2024-06-01","name":"Run","description":"","notes":"","metrics":{},"completed":false,"position":1}]}"#,
    );

    let batch = [ActivityRecord {
        id: None,
        parent_id: None,
        date: "2024-06-01".into(),
        name: "Run".into(),
        description: Some(String::new()),
        notes: Some(String::new()),
        metrics: Default::default(),
        completed: false,
        position: 1,
    }];
    let stored = store(&base).upsert_batch(&batch).unwrap();
    let request = server.join().unwrap();

    assert!(request.starts_with("POST /api/activities/batch "), "{request}");
    let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["activities"][0]["name"], "Run");
    assert!(json["activities"][0]["id"].is_null());

    assert_eq!(stored[0].id, Some(42));
}

#[test]
fn delete_accepts_empty_body() {
    let (base, server) = serve_once("204 No Content", &[], "");

    store(&base).delete_one(7).unwrap();
    let request = server.join().unwrap();
    assert!(request.starts_with("DELETE /api/activities/7 "), "{request}");
}

#[test]
fn throttling_maps_to_rate_limited_with_header_hint() {
    let (base, server) = serve_once(
        "429 Too Many Requests",
        &[("Retry-After", "17")],
        r#"{"message":"Too Many Attempts."}"#,
    );

    let err = store(&base).delete_one(7).unwrap_err();
    server.join().unwrap();

    assert!(matches!(
        err,
        StoreError::RateLimited { retry_after_secs: 17, ref message } if message == "Too Many Attempts."
    ));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(17)));
}

#[test]
fn unauthorized_and_rejected_statuses() {
    let (base, server) = serve_once("401 Unauthorized", &[], r#"{"message":"Unauthenticated."}"#);
    let err = store(&base).fetch_day(day()).unwrap_err();
    server.join().unwrap();
    assert!(matches!(err, StoreError::Unauthorized { .. }));

    let (base, server) = serve_once(
        "422 Unprocessable Content",
        &[],
        r#"{"message":"The selected parent id is invalid."}"#,
    );
    let err = store(&base).upsert_batch(&[]).unwrap_err();
    server.join().unwrap();
    assert_eq!(err.status(), Some(422));
    assert!(err.to_string().contains("parent id is invalid"));
}

#[test]
fn unsuccessful_envelope_is_rejected() {
    let (base, server) = serve_once(
        "200 OK",
        &[],
        r#"{"success":false,"message":"Could not save activities."}"#,
    );
    let err = store(&base).upsert_batch(&[]).unwrap_err();
    server.join().unwrap();
    assert!(matches!(err, StoreError::Rejected { status: 200, .. }));
}
