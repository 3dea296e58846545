//! Remote store boundary for exercise trees.
//!
//! [`ExerciseStore`] is what the synchronizer talks to. Two stores ship with
//! the crate: [`RemoteStore`], an HTTP client for the activities API, and
//! [`MemoryStore`], an in-process store with the same contract.
//!
//! Records cross the boundary flat ([`ActivityRecord`]) with ISO calendar
//! dates as strings; conversion to and from [`Exercise`] happens here.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::exercise::{Exercise, ExerciseId};

/// Date format used on the wire.
pub const WIRE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Retry hint used when a throttled response does not carry one.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// Flat, serializable form of one exercise. `id: None` asks the store to
/// create the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Option<u64>,
    pub parent_id: Option<u64>,
    pub date: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "metrics_from_json")]
    pub metrics: BTreeMap<String, String>,
    #[serde(default)]
    pub completed: bool,
    pub position: u32,
}

/// Metrics arrive as an object, but an empty map may be encoded as `[]` or
/// `null`. Non-string values are kept in their JSON text form.
fn metrics_from_json<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let serde_json::Value::Object(map) = value else {
        return Ok(BTreeMap::new());
    };
    Ok(map
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

impl ActivityRecord {
    /// Wire form of a single exercise (children are not included).
    pub fn from_exercise(ex: &Exercise) -> StoreResult<Self> {
        let parent_id = match ex.parent_id {
            None => None,
            Some(ExerciseId::Saved(id)) => Some(id),
            Some(pending @ ExerciseId::Temp(_)) => {
                return Err(StoreError::unexpected(format!(
                    "exercise {} refers to parent {pending} which has not been saved",
                    ex.id
                )));
            }
        };
        Ok(Self {
            id: ex.id.saved(),
            parent_id,
            date: format_wire_date(ex.date),
            name: ex.name.clone(),
            description: Some(ex.description.clone()),
            notes: Some(ex.notes.clone()),
            metrics: ex.metrics.clone(),
            completed: ex.completed,
            position: ex.position,
        })
    }

    /// Domain form of a record returned by the store.
    pub fn into_exercise(self) -> StoreResult<Exercise> {
        let id = self.id.ok_or_else(|| {
            StoreError::unexpected(format!("store returned \"{}\" without an id", self.name))
        })?;
        Ok(Exercise {
            id: ExerciseId::Saved(id),
            parent_id: self.parent_id.map(ExerciseId::Saved),
            date: parse_wire_date(&self.date)?,
            name: self.name,
            description: self.description.unwrap_or_default(),
            notes: self.notes.unwrap_or_default(),
            metrics: self.metrics,
            completed: self.completed,
            position: self.position,
            children: Vec::new(),
        })
    }
}

pub fn format_wire_date(date: NaiveDate) -> String {
    date.format(WIRE_DATE_FORMAT).to_string()
}

/// Parse a wire date. Timestamps are accepted and truncated to their date.
pub fn parse_wire_date(raw: &str) -> StoreResult<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, WIRE_DATE_FORMAT) {
        return Ok(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.date_naive());
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(ts.date());
    }
    Err(StoreError::unexpected(format!("invalid date \"{raw}\"")))
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// Persistence operations the synchronizer consumes.
pub trait ExerciseStore {
    /// Create (`id: None`) or update every record in `batch`, returning the
    /// stored records with ids populated.
    fn upsert_batch(&mut self, batch: &[ActivityRecord]) -> StoreResult<Vec<ActivityRecord>>;

    /// Remove one record and everything below it.
    fn delete_one(&mut self, id: u64) -> StoreResult<()>;

    /// All records scheduled on `date`.
    fn fetch_day(&mut self, date: NaiveDate) -> StoreResult<Vec<ActivityRecord>>;
}

impl<S: ExerciseStore + ?Sized> ExerciseStore for &mut S {
    fn upsert_batch(&mut self, batch: &[ActivityRecord]) -> StoreResult<Vec<ActivityRecord>> {
        (**self).upsert_batch(batch)
    }

    fn delete_one(&mut self, id: u64) -> StoreResult<()> {
        (**self).delete_one(id)
    }

    fn fetch_day(&mut self, date: NaiveDate) -> StoreResult<Vec<ActivityRecord>> {
        (**self).fetch_day(date)
    }
}

impl<S: ExerciseStore + ?Sized> ExerciseStore for Box<S> {
    fn upsert_batch(&mut self, batch: &[ActivityRecord]) -> StoreResult<Vec<ActivityRecord>> {
        (**self).upsert_batch(batch)
    }

    fn delete_one(&mut self, id: u64) -> StoreResult<()> {
        (**self).delete_one(id)
    }

    fn fetch_day(&mut self, date: NaiveDate) -> StoreResult<Vec<ActivityRecord>> {
        (**self).fetch_day(date)
    }
}

// ---------------------------------------------------------------------------
// Authentication context
// ---------------------------------------------------------------------------

/// Bearer credentials attached to every remote request.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthContext {
    token: String,
}

impl AuthContext {
    pub fn bearer(token: &str) -> Self {
        Self {
            token: token.trim().to_string(),
        }
    }

    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext").field("token", &"<redacted>").finish()
    }
}

// ---------------------------------------------------------------------------
// HTTP store
// ---------------------------------------------------------------------------

/// Response envelope used by every activities endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "default_success")]
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    retry_after: Option<u64>,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    activities: &'a [ActivityRecord],
}

/// Map a non-success HTTP status and its body onto a [`StoreError`].
pub fn status_error(status: u16, body: Option<&str>, retry_after_header: Option<u64>) -> StoreError {
    let parsed: Option<ErrorBody> = body.and_then(|b| serde_json::from_str(b).ok());
    let (message, retry_after) = match parsed {
        Some(b) => (b.message, b.retry_after),
        None => (None, None),
    };
    match status {
        429 => StoreError::RateLimited {
            retry_after_secs: retry_after
                .or(retry_after_header)
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            message: message.unwrap_or_else(|| "Too many requests. Try again later.".into()),
        },
        401 => StoreError::Unauthorized {
            message: message.unwrap_or_else(|| "Unauthenticated.".into()),
        },
        _ => StoreError::Rejected {
            status,
            message: message.unwrap_or_else(|| format!("request failed with status {status}")),
        },
    }
}

/// HTTP client for the activities API.
pub struct RemoteStore {
    base_url: String,
    auth: Option<AuthContext>,
    http: ureq::Agent,
}

impl RemoteStore {
    pub fn new(base_url: &str, auth: Option<AuthContext>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            http: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{path}", self.base_url)
    }

    fn prepare(&self, request: ureq::Request) -> ureq::Request {
        let request = request.set("Accept", "application/json");
        match &self.auth {
            Some(auth) => request.set("Authorization", &auth.header_value()),
            None => request,
        }
    }

    fn read<T: DeserializeOwned>(
        result: Result<ureq::Response, ureq::Error>,
    ) -> StoreResult<Option<T>> {
        match result {
            Ok(resp) => {
                let status = resp.status();
                let text = resp.into_string().map_err(|e| {
                    StoreError::unexpected(format!("failed to read response body: {e}"))
                })?;
                if text.trim().is_empty() {
                    return Ok(None);
                }
                let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|e| {
                    StoreError::unexpected(format!("failed to parse JSON: {e}"))
                })?;
                if !envelope.success {
                    return Err(StoreError::Rejected {
                        status,
                        message: envelope
                            .message
                            .unwrap_or_else(|| "request was not successful".into()),
                    });
                }
                Ok(envelope.data)
            }
            Err(ureq::Error::Status(status, resp)) => {
                let retry_after = resp
                    .header("Retry-After")
                    .and_then(|v| v.trim().parse::<u64>().ok());
                let body = resp.into_string().ok();
                let err = status_error(status, body.as_deref(), retry_after);
                if let StoreError::RateLimited {
                    retry_after_secs, ..
                } = &err
                {
                    tracing::warn!(retry_after_secs, "store is throttling requests");
                }
                Err(err)
            }
            Err(other) => Err(StoreError::unexpected(other.to_string())),
        }
    }
}

impl fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStore")
            .field("base_url", &self.base_url)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl ExerciseStore for RemoteStore {
    fn upsert_batch(&mut self, batch: &[ActivityRecord]) -> StoreResult<Vec<ActivityRecord>> {
        let url = self.url("/activities/batch");
        tracing::debug!(%url, records = batch.len(), "upserting batch");
        let result = self
            .prepare(self.http.post(&url))
            .send_json(BatchRequest { activities: batch });
        Self::read::<Vec<ActivityRecord>>(result)?
            .ok_or_else(|| StoreError::unexpected("batch response carried no data"))
    }

    fn delete_one(&mut self, id: u64) -> StoreResult<()> {
        let url = self.url(&format!("/activities/{id}"));
        tracing::debug!(%url, "deleting activity");
        let result = self.prepare(self.http.delete(&url)).call();
        Self::read::<serde_json::Value>(result).map(|_| ())
    }

    fn fetch_day(&mut self, date: NaiveDate) -> StoreResult<Vec<ActivityRecord>> {
        let url = self.url("/activities");
        let day = format_wire_date(date);
        tracing::debug!(%url, %day, "fetching day");
        let result = self
            .prepare(self.http.get(&url))
            .query("date", &day)
            .call();
        Ok(Self::read::<Vec<ActivityRecord>>(result)?.unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Store kept entirely in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: BTreeMap<u64, ActivityRecord>,
    last_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store. Records without an id are assigned one after every
    /// explicit id has been placed.
    pub fn with_records(records: impl IntoIterator<Item = ActivityRecord>) -> Self {
        let mut store = Self::new();
        let mut unassigned = Vec::new();
        for record in records {
            match record.id {
                Some(id) => {
                    store.last_id = store.last_id.max(id);
                    store.records.insert(id, record);
                }
                None => unassigned.push(record),
            }
        }
        for mut record in unassigned {
            store.last_id += 1;
            record.id = Some(store.last_id);
            store.records.insert(store.last_id, record);
        }
        store
    }

    pub fn get(&self, id: u64) -> Option<&ActivityRecord> {
        self.records.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &ActivityRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn not_found(id: u64) -> StoreError {
        StoreError::Rejected {
            status: 404,
            message: format!("Activity {id} not found."),
        }
    }
}

impl ExerciseStore for MemoryStore {
    fn upsert_batch(&mut self, batch: &[ActivityRecord]) -> StoreResult<Vec<ActivityRecord>> {
        // Validate everything first so a bad record leaves the store untouched.
        for record in batch {
            if let Some(id) = record.id {
                if !self.records.contains_key(&id) {
                    return Err(Self::not_found(id));
                }
            }
            if let Some(parent) = record.parent_id {
                if !self.records.contains_key(&parent) {
                    return Err(StoreError::Rejected {
                        status: 422,
                        message: format!("Parent activity {parent} does not exist."),
                    });
                }
            }
            parse_wire_date(&record.date).map_err(|_| StoreError::Rejected {
                status: 422,
                message: format!("The date \"{}\" is not a valid date.", record.date),
            })?;
        }

        let mut stored = Vec::with_capacity(batch.len());
        for record in batch {
            let mut record = record.clone();
            let id = match record.id {
                Some(id) => id,
                None => {
                    self.last_id += 1;
                    self.last_id
                }
            };
            record.id = Some(id);
            self.records.insert(id, record.clone());
            stored.push(record);
        }
        Ok(stored)
    }

    fn delete_one(&mut self, id: u64) -> StoreResult<()> {
        if !self.records.contains_key(&id) {
            return Err(Self::not_found(id));
        }
        let mut doomed = BTreeSet::from([id]);
        loop {
            let before = doomed.len();
            for (child, record) in &self.records {
                if record.parent_id.is_some_and(|p| doomed.contains(&p)) {
                    doomed.insert(*child);
                }
            }
            if doomed.len() == before {
                break;
            }
        }
        for id in doomed {
            self.records.remove(&id);
        }
        Ok(())
    }

    fn fetch_day(&mut self, date: NaiveDate) -> StoreResult<Vec<ActivityRecord>> {
        Ok(self
            .records
            .values()
            .filter(|r| parse_wire_date(&r.date).is_ok_and(|d| d == date))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn record(id: Option<u64>, parent_id: Option<u64>, name: &str, position: u32) -> ActivityRecord {
        ActivityRecord {
            id,
            parent_id,
            date: "2024-06-01".into(),
            name: name.into(),
            description: None,
            notes: None,
            metrics: BTreeMap::new(),
            completed: false,
            position,
        }
    }

    #[test]
    fn wire_dates_accept_timestamps() {
        assert_eq!(parse_wire_date("2024-06-01").unwrap(), day());
        assert_eq!(parse_wire_date("2024-06-01T00:00:00.000000Z").unwrap(), day());
        assert_eq!(parse_wire_date("2024-06-01 00:00:00").unwrap(), day());
        assert!(parse_wire_date("June 1st").is_err());
        assert_eq!(format_wire_date(day()), "2024-06-01");
    }

    #[test]
    fn record_json_tolerates_empty_metrics() {
        let json = r#"{"id": 3, "parent_id": null, "date": "2024-06-01", "name": "Run",
                       "description": null, "metrics": [], "completed": true, "position": 1}"#;
        let rec: ActivityRecord = serde_json::from_str(json).unwrap();
        assert!(rec.metrics.is_empty());
        assert!(rec.completed);

        let json = r#"{"id": 4, "date": "2024-06-01", "name": "Bench",
                       "metrics": {"reps": "5", "sets": 3}, "position": 2}"#;
        let rec: ActivityRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.metrics["reps"], "5");
        assert_eq!(rec.metrics["sets"], "3");
        assert_eq!(rec.parent_id, None);
    }

    #[test]
    fn exercise_conversion_keeps_fields() {
        let mut ex = Exercise::new(ExerciseId::Saved(7), Some(ExerciseId::Saved(2)), day(), "Row");
        ex.notes = "rate 24".into();
        ex.set_metric("meters", "2000");
        ex.position = 3;

        let rec = ActivityRecord::from_exercise(&ex).unwrap();
        assert_eq!(rec.id, Some(7));
        assert_eq!(rec.parent_id, Some(2));
        assert_eq!(rec.date, "2024-06-01");

        let back = rec.into_exercise().unwrap();
        assert_eq!(back, ex);
    }

    #[test]
    fn temp_ids_map_to_null_and_temp_parents_are_refused() {
        let ex = Exercise::new(ExerciseId::Temp(1), None, day(), "Run");
        assert_eq!(ActivityRecord::from_exercise(&ex).unwrap().id, None);

        let child = Exercise::new(ExerciseId::Temp(2), Some(ExerciseId::Temp(1)), day(), "Lap");
        assert!(ActivityRecord::from_exercise(&child).is_err());

        assert!(record(None, None, "Run", 1).into_exercise().is_err());
    }

    #[test]
    fn status_mapping() {
        let err = status_error(429, Some(r#"{"message": "Slow down", "retry_after": 12}"#), None);
        assert!(matches!(
            err,
            StoreError::RateLimited { retry_after_secs: 12, ref message } if message == "Slow down"
        ));

        let err = status_error(429, None, Some(30));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));

        let err = status_error(429, Some("<html>"), None);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(DEFAULT_RETRY_AFTER_SECS)));

        assert!(matches!(status_error(401, None, None), StoreError::Unauthorized { .. }));

        let err = status_error(422, Some(r#"{"message": "The name field is required."}"#), None);
        assert!(matches!(
            err,
            StoreError::Rejected { status: 422, ref message } if message == "The name field is required."
        ));
    }

    #[test]
    fn auth_debug_redacts_token() {
        let auth = AuthContext::bearer(" secret-token ");
        assert_eq!(auth.header_value(), "Bearer secret-token");
        assert!(!format!("{auth:?}").contains("secret"));
    }

    #[test]
    fn memory_store_assigns_ids_and_updates() {
        let mut store = MemoryStore::new();
        let created = store
            .upsert_batch(&[record(None, None, "Run", 1), record(None, None, "Swim", 2)])
            .unwrap();
        assert_eq!(created[0].id, Some(1));
        assert_eq!(created[1].id, Some(2));

        let mut renamed = created[0].clone();
        renamed.name = "Long run".into();
        let updated = store.upsert_batch(&[renamed]).unwrap();
        assert_eq!(updated[0].id, Some(1));
        assert_eq!(store.get(1).unwrap().name, "Long run");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn memory_store_seeds_explicit_ids_first() {
        let store = MemoryStore::with_records([
            record(None, None, "Swim", 1),
            record(Some(1), None, "Run", 2),
        ]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1).unwrap().name, "Run");
        assert_eq!(store.get(2).unwrap().name, "Swim");
    }

    #[test]
    fn memory_store_rejects_unknown_ids_atomically() {
        let mut store = MemoryStore::with_records([record(Some(5), None, "Run", 1)]);
        let err = store
            .upsert_batch(&[record(None, None, "Swim", 2), record(Some(9), None, "Bike", 3)])
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(store.len(), 1);

        let err = store.upsert_batch(&[record(None, Some(77), "Lap", 1)]).unwrap_err();
        assert_eq!(err.status(), Some(422));
    }

    #[test]
    fn memory_store_cascades_deletes() {
        let mut store = MemoryStore::with_records([
            record(Some(1), None, "Run", 1),
            record(Some(2), Some(1), "Warmup", 1),
            record(Some(3), Some(2), "Jog", 1),
            record(Some(4), None, "Swim", 2),
        ]);
        store.delete_one(1).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(4).is_some());
        assert_eq!(store.delete_one(1).unwrap_err().status(), Some(404));
    }

    #[test]
    fn memory_store_fetches_by_day() {
        let mut other = record(Some(2), None, "Swim", 1);
        other.date = "2024-06-02".into();
        let mut store = MemoryStore::with_records([record(Some(1), None, "Run", 1), other]);
        let day_one = store.fetch_day(day()).unwrap();
        assert_eq!(day_one.len(), 1);
        assert_eq!(day_one[0].name, "Run");
    }
}
