//! Entity types and their metric vocabularies.
//!
//! Each entity type is a distinct statement shape with its own set of base
//! metric codes and its own formula registry. Adding an entity type means
//! adding a vocabulary and registry entry, not a new code path.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Statement shape of a listed entity.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Non-financial listed company
    #[display("company")]
    Company,
    /// Commercial bank
    #[display("bank")]
    Bank,
    /// Insurance company
    #[display("insurance")]
    Insurance,
    /// Securities firm / broker
    #[display("security")]
    Security,
}

impl EntityType {
    /// All entity types, in canonical processing order.
    pub const ALL: [Self; 4] = [Self::Company, Self::Bank, Self::Insurance, Self::Security];

    /// Stable identifier used in file names and the `entity_type` fact column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Bank => "bank",
            Self::Insurance => "insurance",
            Self::Security => "security",
        }
    }

    /// Base metric codes valid for this statement shape.
    ///
    /// The pivot stage emits exactly one column per code; codes absent from
    /// the fact store become all-null columns (schema drift), never errors.
    pub const fn vocabulary(self) -> &'static [&'static str] {
        match self {
            Self::Company => &[
                "revenue",
                "gross_profit",
                "operating_profit",
                "net_profit",
                "ebitda",
                "total_assets",
                "total_equity",
                "total_debt",
                "cash_and_equivalents",
            ],
            Self::Bank => &[
                "operating_income",
                "net_interest_income",
                "fee_income",
                "net_profit",
                "total_assets",
                "total_equity",
                "customer_loans",
                "customer_deposits",
            ],
            Self::Insurance => &[
                "premium_income",
                "investment_income",
                "net_profit",
                "total_assets",
                "total_equity",
                "insurance_liabilities",
            ],
            Self::Security => &[
                "operating_income",
                "brokerage_income",
                "investment_income",
                "net_profit",
                "total_assets",
                "total_equity",
            ],
        }
    }

    /// Flow-type (additive) metrics eligible for TTM aggregation.
    pub const fn flow_metrics(self) -> &'static [&'static str] {
        match self {
            Self::Company => &["revenue", "gross_profit", "operating_profit", "net_profit", "ebitda"],
            Self::Bank => &["operating_income", "net_interest_income", "fee_income", "net_profit"],
            Self::Insurance => &["premium_income", "investment_income", "net_profit"],
            Self::Security => &["operating_income", "brokerage_income", "net_profit"],
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "company" => Ok(Self::Company),
            "bank" => Ok(Self::Bank),
            "insurance" => Ok(Self::Insurance),
            "security" => Ok(Self::Security),
            other => Err(format!("unknown entity type '{other}'")),
        }
    }
}
