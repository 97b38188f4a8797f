//! Donation domain types.
//!
//! A `Donation` is owned by the donation subsystem. The receipt pipeline only
//! reads it and, once, writes its receipt fields. The receipt fields are held
//! as a single `Option<IssuedReceipt>` so they are always set together or not
//! at all.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Field names reported by validation errors.
///
/// These match the field names the excluded HTTP layer exposes, so a caller
/// can highlight the offending input directly.
pub mod fields {
    pub const DONOR_NAME: &str = "donante_nombre";
    pub const DONOR_TAX_ID: &str = "donante_nit";
    pub const DONOR_ADDRESS: &str = "donante_direccion";
    pub const AMOUNT: &str = "monto";
    pub const ESTIMATED_VALUE: &str = "valor_estimado";
    pub const KIND: &str = "tipo";
    pub const DESCRIPTION: &str = "descripcion";
    pub const VOID_REASON: &str = "motivo";
    pub const DOCUMENT_UUID: &str = "documento_uuid";
}

/// Missing or invalid donation data. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid field '{field}': {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn missing(field: &'static str) -> Self {
        Self {
            field,
            reason: "required".to_string(),
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// What was donated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationKind {
    Monetary,
    InKind,
    Service,
}

impl DonationKind {
    /// Stored and displayed label.
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationKind::Monetary => "monetaria",
            DonationKind::InKind => "especie",
            DonationKind::Service => "servicio",
        }
    }
}

impl fmt::Display for DonationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DonationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monetaria" | "monetary" => Ok(DonationKind::Monetary),
            "especie" | "in_kind" => Ok(DonationKind::InKind),
            "servicio" | "service" => Ok(DonationKind::Service),
            other => Err(ValidationError::invalid(
                fields::KIND,
                format!("unsupported donation kind '{}'", other),
            )),
        }
    }
}

/// The person or organisation that made the donation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donor {
    pub name: String,
    pub tax_id: Option<String>,
    pub address: Option<String>,
}

/// Receipt identifiers assigned by the certification authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedReceipt {
    pub series: String,
    pub number: String,
    pub document_uuid: String,
    pub document_url: String,
    pub issued_at: DateTime<Utc>,
}

/// A donation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub id: Uuid,
    pub kind: DonationKind,
    pub donor: Donor,
    /// Monetary amount, for `Monetary` donations.
    pub amount: Option<Decimal>,
    /// Estimated value, for `InKind` and `Service` donations.
    pub estimated_value: Option<Decimal>,
    pub description: Option<String>,
    pub notes: Option<String>,
    /// Set once, by the issuance pipeline. Immutable afterwards.
    pub receipt: Option<IssuedReceipt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Donation {
    /// Create a donation with no receipt.
    pub fn new(kind: DonationKind, donor: Donor) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            donor,
            amount: None,
            estimated_value: None,
            description: None,
            notes: None,
            receipt: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_estimated_value(mut self, value: Decimal) -> Self {
        self.estimated_value = Some(value);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn receipt_issued(&self) -> bool {
        self.receipt.is_some()
    }

    /// The value the receipt is issued for: the amount for monetary
    /// donations, the estimated value otherwise.
    pub fn receipt_value(&self) -> Option<Decimal> {
        match self.kind {
            DonationKind::Monetary => self.amount,
            DonationKind::InKind | DonationKind::Service => self.estimated_value,
        }
    }

    /// Field name of `receipt_value`, for error reporting.
    pub fn receipt_value_field(&self) -> &'static str {
        match self.kind {
            DonationKind::Monetary => fields::AMOUNT,
            DonationKind::InKind | DonationKind::Service => fields::ESTIMATED_VALUE,
        }
    }
}

/// Partial update of a donation's details. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DonationUpdate {
    pub kind: Option<DonationKind>,
    pub donor_name: Option<String>,
    pub donor_tax_id: Option<String>,
    pub donor_address: Option<String>,
    pub amount: Option<Decimal>,
    pub estimated_value: Option<Decimal>,
    pub description: Option<String>,
    pub notes: Option<String>,
}

impl DonationUpdate {
    /// Fields set by this update that appear on the certified document.
    ///
    /// Once a receipt is issued none of these may change.
    pub fn receipt_bound_fields(&self) -> Vec<&'static str> {
        let mut touched = Vec::new();
        if self.kind.is_some() {
            touched.push(fields::KIND);
        }
        if self.donor_name.is_some() {
            touched.push(fields::DONOR_NAME);
        }
        if self.donor_tax_id.is_some() {
            touched.push(fields::DONOR_TAX_ID);
        }
        if self.donor_address.is_some() {
            touched.push(fields::DONOR_ADDRESS);
        }
        if self.amount.is_some() {
            touched.push(fields::AMOUNT);
        }
        if self.estimated_value.is_some() {
            touched.push(fields::ESTIMATED_VALUE);
        }
        if self.description.is_some() {
            touched.push(fields::DESCRIPTION);
        }
        touched
    }

    pub fn is_empty(&self) -> bool {
        self.receipt_bound_fields().is_empty() && self.notes.is_none()
    }

    /// Apply this update to `donation` in memory.
    pub fn apply_to(&self, donation: &mut Donation) {
        if let Some(kind) = self.kind {
            donation.kind = kind;
        }
        if let Some(name) = &self.donor_name {
            donation.donor.name = name.clone();
        }
        if let Some(tax_id) = &self.donor_tax_id {
            donation.donor.tax_id = Some(tax_id.clone());
        }
        if let Some(address) = &self.donor_address {
            donation.donor.address = Some(address.clone());
        }
        if let Some(amount) = self.amount {
            donation.amount = Some(amount);
        }
        if let Some(value) = self.estimated_value {
            donation.estimated_value = Some(value);
        }
        if let Some(description) = &self.description {
            donation.description = Some(description.clone());
        }
        if let Some(notes) = &self.notes {
            donation.notes = Some(notes.clone());
        }
        donation.updated_at = Utc::now();
    }
}
