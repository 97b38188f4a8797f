//! Canonical receipt document and its builder.
//!
//! The canonical document is the structured form the certification authority
//! signs. It is built fresh for every issuance attempt and never stored; only
//! the identifiers the authority returns are persisted on the donation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::IssuerConfig;
use crate::domain::{fields, Donation, DonationKind, ValidationError};

/// Document type code for a donation receipt.
pub const DONATION_RECEIPT_TYPE: &str = "RDON";
/// Tax id of the anonymous "final consumer" recipient.
pub const FINAL_CONSUMER_TAX_ID: &str = "CF";
/// Address used when the donor has none on record.
pub const DEFAULT_RECIPIENT_ADDRESS: &str = "Ciudad";
/// Unit of measure for the single line item.
pub const UNIT_OF_MEASURE: &str = "UNI";

/// Issuer block. Identical on every document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerBlock {
    pub tax_id: String,
    pub legal_name: String,
    pub trade_name: String,
    pub establishment_code: String,
    pub email: String,
    pub address: AddressBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBlock {
    pub street: String,
    pub postal_code: String,
    pub municipality: String,
    pub department: String,
    pub country: String,
}

/// Recipient block, taken from the donor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientBlock {
    pub tax_id: String,
    pub name: String,
    pub address: String,
}

impl RecipientBlock {
    pub fn is_final_consumer(&self) -> bool {
        self.tax_id == FINAL_CONSUMER_TAX_ID
    }
}

/// Whether the line item is a good (`B`) or a service (`S`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemClass {
    #[serde(rename = "B")]
    Good,
    #[serde(rename = "S")]
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub line_number: u32,
    pub class: ItemClass,
    pub quantity: Decimal,
    pub unit_of_measure: String,
    pub description: String,
    pub unit_price: Decimal,
    pub total: Decimal,
}

/// The document submitted for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    /// Request metadata, not the authority-assigned receipt uuid.
    pub request_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub document_type: String,
    pub currency: String,
    pub issuer: IssuerBlock,
    pub recipient: RecipientBlock,
    pub items: Vec<LineItem>,
    pub total: Decimal,
    pub annotations: Vec<String>,
}

/// Converts donations into canonical documents.
#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    issuer: IssuerBlock,
    currency: String,
}

impl DocumentBuilder {
    pub fn new(config: &IssuerConfig) -> Self {
        Self {
            issuer: IssuerBlock {
                tax_id: config.tax_id.clone(),
                legal_name: config.legal_name.clone(),
                trade_name: config.trade_name.clone(),
                establishment_code: config.establishment_code.clone(),
                email: config.email.clone(),
                address: AddressBlock {
                    street: config.address.street.clone(),
                    postal_code: config.address.postal_code.clone(),
                    municipality: config.address.municipality.clone(),
                    department: config.address.department.clone(),
                    country: config.address.country.clone(),
                },
            },
            currency: config.currency.clone(),
        }
    }

    /// Build the document for `donation`.
    ///
    /// Quantity is always 1, so the total equals the unit price. Each call
    /// produces a new request id and timestamp.
    pub fn build(&self, donation: &Donation) -> Result<CanonicalDocument, ValidationError> {
        let name = donation.donor.name.trim();
        if name.is_empty() {
            return Err(ValidationError::missing(fields::DONOR_NAME));
        }

        let value_field = donation.receipt_value_field();
        let unit_price = donation
            .receipt_value()
            .ok_or_else(|| ValidationError::missing(value_field))?;
        if unit_price <= Decimal::ZERO {
            return Err(ValidationError::invalid(
                value_field,
                format!("must be greater than zero, got {}", unit_price),
            ));
        }

        let quantity = Decimal::ONE;
        let total = unit_price * quantity;

        let item = LineItem {
            line_number: 1,
            class: match donation.kind {
                DonationKind::Service => ItemClass::Service,
                DonationKind::Monetary | DonationKind::InKind => ItemClass::Good,
            },
            quantity,
            unit_of_measure: UNIT_OF_MEASURE.to_string(),
            description: line_description(donation),
            unit_price,
            total,
        };

        let mut annotations = vec![format!("Donación {}", donation.id)];
        if let Some(notes) = donation.notes.as_deref().map(str::trim) {
            if !notes.is_empty() {
                annotations.push(notes.to_string());
            }
        }

        Ok(CanonicalDocument {
            request_id: Uuid::new_v4(),
            issued_at: Utc::now(),
            document_type: DONATION_RECEIPT_TYPE.to_string(),
            currency: self.currency.clone(),
            issuer: self.issuer.clone(),
            recipient: RecipientBlock {
                tax_id: normalize_tax_id(donation.donor.tax_id.as_deref()),
                name: name.to_string(),
                address: donation
                    .donor
                    .address
                    .as_deref()
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .unwrap_or(DEFAULT_RECIPIENT_ADDRESS)
                    .to_string(),
            },
            items: vec![item],
            total,
            annotations,
        })
    }
}

/// Explicit description if present, otherwise "Donación <kind>".
fn line_description(donation: &Donation) -> String {
    donation
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Donación {}", donation.kind))
}

/// Uppercase, strip hyphens and spaces. Absent ids map to the final
/// consumer sentinel.
pub fn normalize_tax_id(tax_id: Option<&str>) -> String {
    let normalized: String = tax_id
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect();
    if normalized.is_empty() {
        FINAL_CONSUMER_TAX_ID.to_string()
    } else {
        normalized
    }
}
