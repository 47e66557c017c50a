//! Command-line commands and their argument parsing.

use chrono::{Datelike, NaiveDate};
use clap::{Args, Subcommand};

use crate::error::SyncError;
use crate::finance::{Donation, Expense, MutationKind, Record, RecordType};

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
  /// Show donations or expenses for a year
  #[command(visible_alias = "ls")]
  List {
    /// donation(s) or expense(s)
    record_type: RecordType,
  },

  /// Record a new donation or expense (queued while offline)
  #[command(subcommand)]
  Add(AddCommand),

  /// Replace a record on the server (online only)
  Update {
    record_type: RecordType,
    /// Full record as a JSON object, including its id
    #[arg(long)]
    json: String,
  },

  /// Delete a record on the server (online only)
  #[command(visible_alias = "rm")]
  Delete { record_type: RecordType, id: String },

  /// List writes waiting for the connection to come back
  Pending,

  /// Replay pending writes and refresh cached lists
  Sync,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum AddCommand {
  Donation(DonationArgs),
  Expense(ExpenseArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct DonationArgs {
  #[arg(long)]
  pub donor: String,
  #[arg(long)]
  pub pledged: f64,
  #[arg(long, default_value_t = 0.0)]
  pub paid: f64,
  /// Defaults to today
  #[arg(long)]
  pub date: Option<NaiveDate>,
  #[arg(long)]
  pub notes: Option<String>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ExpenseArgs {
  #[arg(long)]
  pub description: String,
  #[arg(long)]
  pub amount: f64,
  #[arg(long, default_value = "general")]
  pub category: String,
  /// Defaults to today
  #[arg(long)]
  pub date: Option<NaiveDate>,
}

impl AddCommand {
  /// Build the payload for the additive write. The partition comes from
  /// `year` when given, otherwise from the record's date.
  pub fn into_mutation(
    self,
    today: NaiveDate,
    year: Option<i32>,
  ) -> Result<(MutationKind, Record), SyncError> {
    match self {
      AddCommand::Donation(args) => {
        let date = args.date.unwrap_or(today);
        let donation = Donation {
          id: None,
          donor_name: args.donor,
          pledged_amount: args.pledged,
          paid_amount: args.paid,
          date,
          year: year.unwrap_or_else(|| date.year()),
          notes: args.notes,
        };
        Ok((MutationKind::AddDonation, Record::encode(&donation)?))
      }
      AddCommand::Expense(args) => {
        let date = args.date.unwrap_or(today);
        let expense = Expense {
          id: None,
          description: args.description,
          amount: args.amount,
          category: args.category,
          date,
          year: year.unwrap_or_else(|| date.year()),
        };
        Ok((MutationKind::AddExpense, Record::encode(&expense)?))
      }
    }
  }
}

/// Parse the `--json` argument of `update`.
pub fn parse_record(json: &str) -> Result<Record, SyncError> {
  let value: serde_json::Value =
    serde_json::from_str(json).map_err(|e| SyncError::InvalidRecord(e.to_string()))?;
  let record = Record::from_value(value)?;
  if record.id().is_none() {
    return Err(SyncError::InvalidRecord("record needs an id".to_string()));
  }
  Ok(record)
}
