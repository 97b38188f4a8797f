//! Issuer identity configuration.

use serde::Deserialize;

/// Organisational identity printed as issuer on every receipt.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    pub tax_id: String,
    pub legal_name: String,
    pub trade_name: String,
    pub establishment_code: String,
    pub email: String,
    pub address: IssuerAddress,
    /// ISO 4217 currency of receipt amounts.
    pub currency: String,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            tax_id: String::new(),
            legal_name: String::new(),
            trade_name: String::new(),
            establishment_code: "1".to_string(),
            email: String::new(),
            address: IssuerAddress::default(),
            currency: "GTQ".to_string(),
        }
    }
}

/// Fiscal address of the issuer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IssuerAddress {
    pub street: String,
    pub postal_code: String,
    pub municipality: String,
    pub department: String,
    pub country: String,
}

impl Default for IssuerAddress {
    fn default() -> Self {
        Self {
            street: String::new(),
            postal_code: "01001".to_string(),
            municipality: "Guatemala".to_string(),
            department: "Guatemala".to_string(),
            country: "GT".to_string(),
        }
    }
}
