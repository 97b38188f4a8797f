//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Donations table schema.
#[derive(Iden)]
pub enum Donations {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "kind"]
    Kind,
    #[iden = "donor_name"]
    DonorName,
    #[iden = "donor_tax_id"]
    DonorTaxId,
    #[iden = "donor_address"]
    DonorAddress,
    #[iden = "amount"]
    Amount,
    #[iden = "estimated_value"]
    EstimatedValue,
    #[iden = "description"]
    Description,
    #[iden = "notes"]
    Notes,
    #[iden = "receipt_issued"]
    ReceiptIssued,
    #[iden = "series"]
    Series,
    #[iden = "number"]
    Number,
    #[iden = "document_uuid"]
    DocumentUuid,
    #[iden = "document_url"]
    DocumentUrl,
    #[iden = "issued_at"]
    IssuedAt,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Pending receipts table schema.
#[derive(Iden)]
pub enum PendingReceipts {
    Table,
    #[iden = "donation_id"]
    DonationId,
    #[iden = "series"]
    Series,
    #[iden = "number"]
    Number,
    #[iden = "document_uuid"]
    DocumentUuid,
    #[iden = "document_url"]
    DocumentUrl,
    #[iden = "issued_at"]
    IssuedAt,
    #[iden = "recorded_at"]
    RecordedAt,
    #[iden = "attempts"]
    Attempts,
}

/// SQL for creating the donations table.
///
/// The CHECK keeps the receipt fields all-or-nothing.
pub const CREATE_DONATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS donations (
    id TEXT PRIMARY KEY NOT NULL,
    kind TEXT NOT NULL,
    donor_name TEXT NOT NULL,
    donor_tax_id TEXT,
    donor_address TEXT,
    amount TEXT,
    estimated_value TEXT,
    description TEXT,
    notes TEXT,
    receipt_issued INTEGER NOT NULL DEFAULT 0,
    series TEXT,
    number TEXT,
    document_uuid TEXT,
    document_url TEXT,
    issued_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (
        (receipt_issued = 0 AND series IS NULL AND number IS NULL
            AND document_uuid IS NULL AND document_url IS NULL AND issued_at IS NULL)
        OR
        (receipt_issued = 1 AND series IS NOT NULL AND number IS NOT NULL
            AND document_uuid IS NOT NULL AND document_url IS NOT NULL AND issued_at IS NOT NULL)
    )
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_donations_document_uuid ON donations(document_uuid);
"#;

/// SQL for creating the pending receipts table.
pub const CREATE_PENDING_RECEIPTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS pending_receipts (
    donation_id TEXT PRIMARY KEY NOT NULL,
    series TEXT NOT NULL,
    number TEXT NOT NULL,
    document_uuid TEXT NOT NULL,
    document_url TEXT NOT NULL,
    issued_at TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pending_receipts_recorded_at ON pending_receipts(recorded_at);
"#;
