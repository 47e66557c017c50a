use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

/// Record collection held by the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
  Donation,
  Expense,
}

impl RecordType {
  pub fn as_str(&self) -> &'static str {
    match self {
      RecordType::Donation => "donation",
      RecordType::Expense => "expense",
    }
  }

  /// REST collection path segment
  pub fn collection(&self) -> &'static str {
    match self {
      RecordType::Donation => "donations",
      RecordType::Expense => "expenses",
    }
  }
}

impl fmt::Display for RecordType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for RecordType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "donation" | "donations" => Ok(RecordType::Donation),
      "expense" | "expenses" => Ok(RecordType::Expense),
      other => Err(format!("unknown record type: {}", other)),
    }
  }
}

/// Kind of an additive write that can wait in the mutation queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
  AddDonation,
  AddExpense,
}

impl MutationKind {
  pub fn record_type(&self) -> RecordType {
    match self {
      MutationKind::AddDonation => RecordType::Donation,
      MutationKind::AddExpense => RecordType::Expense,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      MutationKind::AddDonation => "AddDonation",
      MutationKind::AddExpense => "AddExpense",
    }
  }
}

impl FromStr for MutationKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "AddDonation" => Ok(MutationKind::AddDonation),
      "AddExpense" => Ok(MutationKind::AddExpense),
      other => Err(format!("unknown mutation kind: {}", other)),
    }
  }
}

/// A whole record as exchanged with the remote store: a JSON object.
///
/// The sync core only needs `id`, `year` and `date` out of it; everything else
/// is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
  pub fn from_value(value: Value) -> Result<Self, SyncError> {
    match value {
      Value::Object(map) => Ok(Self(map)),
      other => Err(SyncError::InvalidRecord(format!(
        "expected a JSON object, got {}",
        other
      ))),
    }
  }

  /// Convert a typed record into its JSON payload
  pub fn encode<T: Serialize>(typed: &T) -> Result<Self, SyncError> {
    let value =
      serde_json::to_value(typed).map_err(|e| SyncError::InvalidRecord(e.to_string()))?;
    Self::from_value(value)
  }

  /// Convert the JSON payload back into a typed record
  pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SyncError> {
    serde_json::from_value(Value::Object(self.0.clone()))
      .map_err(|e| SyncError::InvalidRecord(e.to_string()))
  }

  pub fn id(&self) -> Option<&str> {
    self
      .0
      .get("id")
      .and_then(Value::as_str)
      .filter(|id| !id.is_empty())
  }

  pub fn set_id(&mut self, id: &str) {
    self.0.insert("id".to_string(), Value::String(id.to_string()));
  }

  /// Ensure the record carries an id, generating one if needed.
  /// The same id is kept before and after the remote store confirms it.
  pub fn ensure_id(&mut self) -> String {
    if let Some(id) = self.id() {
      return id.to_string();
    }
    let id = uuid::Uuid::new_v4().to_string();
    self.set_id(&id);
    id
  }

  /// Partition (year) the record belongs to: `year`, else the year of `date`.
  pub fn partition(&self) -> Result<i32, SyncError> {
    if let Some(year) = self.0.get("year").and_then(Value::as_i64) {
      return i32::try_from(year)
        .map_err(|_| SyncError::InvalidRecord(format!("year out of range: {}", year)));
    }

    self
      .0
      .get("date")
      .and_then(Value::as_str)
      .and_then(|date| date.get(..4))
      .and_then(|prefix| prefix.parse::<i32>().ok())
      .ok_or_else(|| SyncError::InvalidRecord("record has neither a year nor a date".to_string()))
  }

  pub fn get(&self, field: &str) -> Option<&Value> {
    self.0.get(field)
  }

  pub fn insert(&mut self, field: &str, value: Value) {
    self.0.insert(field.to_string(), value);
  }

  pub fn into_value(self) -> Value {
    Value::Object(self.0)
  }
}

/// A pledged donation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Donation {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  pub donor_name: String,
  pub pledged_amount: f64,
  #[serde(default)]
  pub paid_amount: f64,
  pub date: NaiveDate,
  pub year: i32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

impl Donation {
  pub fn outstanding(&self) -> f64 {
    (self.pledged_amount - self.paid_amount).max(0.0)
  }
}

/// A recorded expense
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  pub description: String,
  pub amount: f64,
  #[serde(default)]
  pub category: String,
  pub date: NaiveDate,
  pub year: i32,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn donation() -> Donation {
    Donation {
      id: None,
      donor_name: "Ali".to_string(),
      pledged_amount: 100.0,
      paid_amount: 0.0,
      date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
      year: 2026,
      notes: None,
    }
  }

  #[test]
  fn test_donation_payload_uses_camel_case() {
    let record = Record::encode(&donation()).unwrap();
    assert_eq!(
      record.into_value(),
      json!({
        "donorName": "Ali",
        "pledgedAmount": 100.0,
        "paidAmount": 0.0,
        "date": "2026-03-01",
        "year": 2026
      })
    );
  }

  #[test]
  fn test_ensure_id_keeps_existing_id() {
    let mut record = Record::from_value(json!({"id": "a1", "year": 2026})).unwrap();
    assert_eq!(record.ensure_id(), "a1");

    let mut fresh = Record::encode(&donation()).unwrap();
    let id = fresh.ensure_id();
    assert!(!id.is_empty());
    assert_eq!(fresh.id(), Some(id.as_str()));

    let decoded: Donation = fresh.decode().unwrap();
    assert_eq!(decoded.id.as_deref(), Some(id.as_str()));
  }

  #[test]
  fn test_partition_falls_back_to_date() {
    let with_year = Record::from_value(json!({"year": 2025, "date": "2026-01-01"})).unwrap();
    assert_eq!(with_year.partition().unwrap(), 2025);

    let date_only = Record::from_value(json!({"date": "2024-07-04"})).unwrap();
    assert_eq!(date_only.partition().unwrap(), 2024);

    let neither = Record::from_value(json!({"amount": 3})).unwrap();
    assert!(matches!(neither.partition(), Err(SyncError::InvalidRecord(_))));
  }

  #[test]
  fn test_non_object_is_rejected() {
    assert!(Record::from_value(json!([1, 2])).is_err());
  }

  #[test]
  fn test_kind_and_type_names() {
    assert_eq!("donations".parse::<RecordType>().unwrap(), RecordType::Donation);
    assert_eq!(
      "AddExpense".parse::<MutationKind>().unwrap().record_type(),
      RecordType::Expense
    );
    assert!("AddRefund".parse::<MutationKind>().is_err());
  }

  #[test]
  fn test_outstanding_never_negative() {
    let mut d = donation();
    d.paid_amount = 150.0;
    assert_eq!(d.outstanding(), 0.0);
  }
}
