//! Human-readable document codes (`PAY-20250114-3F9A1C`).
//!
//! Every ledger record carries a code alongside its UUID so that receipts,
//! invoices and approval screens can reference it without exposing ids.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record families that receive generated codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodePrefix {
    /// Patient stay contract.
    Contract,
    /// Monthly billing period (dated by month only).
    Period,
    /// Charge line.
    Charge,
    /// Patient expense.
    PatientExpense,
    /// Patient payment.
    Payment,
    /// Organization ledger transaction.
    Transaction,
    /// Operational expense.
    OperationalExpense,
    /// Procurement request.
    Procurement,
}

impl CodePrefix {
    /// Returns the code prefix.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Contract => "CTR",
            Self::Period => "PER",
            Self::Charge => "CHG",
            Self::PatientExpense => "PEX",
            Self::Payment => "PAY",
            Self::Transaction => "TRX",
            Self::OperationalExpense => "OEX",
            Self::Procurement => "PRC",
        }
    }
}

/// Generator for document codes.
pub struct DocumentCode;

impl DocumentCode {
    /// Length of the random suffix.
    pub const SUFFIX_LEN: usize = 6;

    /// Generates a code for a record dated `date`.
    ///
    /// Periods are stamped `YYYYMM`, every other family `YYYYMMDD`.
    #[must_use]
    pub fn generate(prefix: CodePrefix, date: NaiveDate) -> String {
        let stamp = match prefix {
            CodePrefix::Period => format!("{:04}{:02}", date.year(), date.month()),
            _ => date.format("%Y%m%d").to_string(),
        };
        let suffix = Uuid::new_v4().simple().to_string()[..Self::SUFFIX_LEN].to_uppercase();
        format!("{}-{stamp}-{suffix}", prefix.as_str())
    }

    /// Returns the prefix part of a code, if it is a known family.
    #[must_use]
    pub fn prefix_of(code: &str) -> Option<CodePrefix> {
        let head = code.split('-').next()?;
        [
            CodePrefix::Contract,
            CodePrefix::Period,
            CodePrefix::Charge,
            CodePrefix::PatientExpense,
            CodePrefix::Payment,
            CodePrefix::Transaction,
            CodePrefix::OperationalExpense,
            CodePrefix::Procurement,
        ]
        .into_iter()
        .find(|p| p.as_str() == head)
    }
}
