//! SQLite persistence for documents and their line items.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{info, instrument};

use crate::config::StoreConfig;
use crate::core::*;

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Persistence {
            kind: classify(&err),
            message: err.to_string(),
        }
    }
}

/// Map a store error onto the user-facing categories.
pub fn classify(err: &sqlx::Error) -> PersistenceErrorKind {
    use sqlx::error::ErrorKind;

    match err {
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation => PersistenceErrorKind::UniqueViolation,
            ErrorKind::ForeignKeyViolation => PersistenceErrorKind::Referential,
            ErrorKind::NotNullViolation => PersistenceErrorKind::MissingRequiredField,
            ErrorKind::CheckViolation => PersistenceErrorKind::Constraint,
            _ => PersistenceErrorKind::Other,
        },
        _ => PersistenceErrorKind::Other,
    }
}

const CREATE_DOCUMENTS: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY NOT NULL,
    access_key TEXT,
    number INTEGER,
    series TEXT,
    issue_date TEXT,
    counterparty_name TEXT NOT NULL,
    counterparty_tax_id TEXT NOT NULL,
    declared_net_total TEXT NOT NULL,
    declared_products_total TEXT NOT NULL,
    declared_discount_total TEXT NOT NULL,
    declared_freight_total TEXT NOT NULL,
    declared_line_count INTEGER NOT NULL,
    entry_tax_rate TEXT NOT NULL,
    retail_markup TEXT NOT NULL,
    wholesale_markup TEXT NOT NULL,
    rounding_policy TEXT NOT NULL,
    freight TEXT NOT NULL,
    hidden_items TEXT NOT NULL DEFAULT '[]',
    show_only_hidden INTEGER NOT NULL DEFAULT 0,
    write_seq INTEGER NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

const CREATE_ACCESS_KEY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_documents_access_key ON documents(access_key)";

const CREATE_LINE_ITEMS: &str = r#"
CREATE TABLE IF NOT EXISTS line_items (
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    item_number INTEGER NOT NULL,
    code TEXT NOT NULL,
    description TEXT NOT NULL,
    ncm TEXT NOT NULL,
    cfop TEXT NOT NULL,
    cest TEXT NOT NULL,
    unit TEXT NOT NULL,
    quantity TEXT NOT NULL CHECK (CAST(quantity AS REAL) >= 0),
    unit_price TEXT NOT NULL CHECK (CAST(unit_price AS REAL) >= 0),
    total TEXT NOT NULL CHECK (CAST(total AS REAL) >= 0),
    discount TEXT NOT NULL,
    allocated_discount TEXT NOT NULL,
    icms_regime TEXT NOT NULL,
    icms_group TEXT NOT NULL,
    icms_origin TEXT NOT NULL,
    icms_code TEXT NOT NULL,
    icms_base TEXT NOT NULL,
    icms_rate TEXT NOT NULL,
    icms_value TEXT NOT NULL,
    ipi_cst TEXT NOT NULL,
    ipi_base TEXT NOT NULL,
    ipi_rate TEXT NOT NULL,
    ipi_value TEXT NOT NULL,
    barcode TEXT,
    supplier_reference TEXT,
    brand TEXT,
    image_ref TEXT,
    additional_info TEXT,
    extra_cost TEXT NOT NULL,
    freight_share TEXT NOT NULL,
    PRIMARY KEY (document_id, item_number)
)
"#;

const UPSERT_DOCUMENT: &str = r#"
INSERT INTO documents (
    id, access_key, number, series, issue_date,
    counterparty_name, counterparty_tax_id,
    declared_net_total, declared_products_total, declared_discount_total,
    declared_freight_total, declared_line_count,
    entry_tax_rate, retail_markup, wholesale_markup, rounding_policy, freight,
    hidden_items, show_only_hidden, write_seq
)
VALUES (
    ?, ?, ?, ?, ?,
    ?, ?,
    ?, ?, ?,
    ?, ?,
    ?, ?, ?, ?, ?,
    ?, ?, (SELECT COALESCE(MAX(write_seq), 0) + 1 FROM documents)
)
ON CONFLICT(id) DO UPDATE SET
    access_key = COALESCE(documents.access_key, excluded.access_key),
    number = excluded.number,
    series = excluded.series,
    issue_date = excluded.issue_date,
    counterparty_name = excluded.counterparty_name,
    counterparty_tax_id = excluded.counterparty_tax_id,
    declared_net_total = excluded.declared_net_total,
    declared_products_total = excluded.declared_products_total,
    declared_discount_total = excluded.declared_discount_total,
    declared_freight_total = excluded.declared_freight_total,
    declared_line_count = excluded.declared_line_count,
    entry_tax_rate = excluded.entry_tax_rate,
    retail_markup = excluded.retail_markup,
    wholesale_markup = excluded.wholesale_markup,
    rounding_policy = excluded.rounding_policy,
    freight = excluded.freight,
    hidden_items = excluded.hidden_items,
    show_only_hidden = excluded.show_only_hidden,
    write_seq = excluded.write_seq,
    updated_at = CURRENT_TIMESTAMP
"#;

const INSERT_LINE_ITEM: &str = r#"
INSERT INTO line_items (
    document_id, item_number, code, description, ncm, cfop, cest, unit,
    quantity, unit_price, total, discount, allocated_discount,
    icms_regime, icms_group, icms_origin, icms_code, icms_base, icms_rate, icms_value,
    ipi_cst, ipi_base, ipi_rate, ipi_value,
    barcode, supplier_reference, brand, image_ref, additional_info,
    extra_cost, freight_share
)
VALUES (
    ?, ?, ?, ?, ?, ?, ?, ?,
    ?, ?, ?, ?, ?,
    ?, ?, ?, ?, ?, ?, ?,
    ?, ?, ?, ?,
    ?, ?, ?, ?, ?,
    ?, ?
)
"#;

const SUMMARY_COLUMNS: &str = "id, access_key, number, counterparty_name, declared_net_total";

/// Handle to the document store. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    /// Open (creating if needed) the database named in `config` and ensure
    /// the schema exists.
    #[instrument(skip(config), fields(url = %config.database_url))]
    pub async fn connect(config: &StoreConfig) -> Result<Self, IngestError> {
        let in_memory = config.database_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // every in-memory connection is its own database
        let max_connections = if in_memory { 1 } else { config.max_connections.max(1) };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        info!(max_connections, "document store opened");
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// A private in-memory store, mainly for tests and demos.
    pub async fn in_memory() -> Result<Self, IngestError> {
        Self::connect(&StoreConfig {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await
    }

    /// Wrap an existing pool. Foreign keys must be enabled on its
    /// connections for cascading deletes to work.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, IngestError> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes (idempotent).
    pub async fn migrate(&self) -> Result<(), IngestError> {
        for ddl in [CREATE_DOCUMENTS, CREATE_ACCESS_KEY_INDEX, CREATE_LINE_ITEMS] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Summary of the document stored under `id`.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<DocumentSummary>, IngestError> {
        let sql = format!("SELECT {SUMMARY_COLUMNS} FROM documents WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(summary_from_row).transpose()
    }

    /// Summary of the most recently written document carrying `access_key`.
    pub async fn find_by_access_key(
        &self,
        access_key: &str,
    ) -> Result<Option<DocumentSummary>, IngestError> {
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM documents WHERE access_key = ? \
             ORDER BY write_seq DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(access_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(summary_from_row).transpose()
    }

    /// Summaries of every stored document, most recent first.
    pub async fn list_summaries(&self) -> Result<Vec<DocumentSummary>, IngestError> {
        let sql = format!("SELECT {SUMMARY_COLUMNS} FROM documents ORDER BY write_seq DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(summary_from_row).collect()
    }

    /// Load a full document with its line items.
    pub async fn load_document(&self, id: &str) -> Result<Option<Document>, IngestError> {
        let Some(row) = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let line_rows =
            sqlx::query("SELECT * FROM line_items WHERE document_id = ? ORDER BY item_number")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;
        let lines = line_rows
            .iter()
            .map(line_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        document_from_row(&row, lines).map(Some)
    }

    /// Number of line items stored for `id`.
    pub async fn count_line_items(&self, id: &str) -> Result<i64, IngestError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM line_items WHERE document_id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// User-maintained settings of the document stored under `id`.
    pub async fn load_settings(&self, id: &str) -> Result<Option<DocumentSettings>, IngestError> {
        let row = sqlx::query(
            "SELECT entry_tax_rate, retail_markup, wholesale_markup, rounding_policy, freight, \
             hidden_items, show_only_hidden FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(settings_from_row).transpose()
    }

    /// Overwrite the user-maintained settings of a stored document without
    /// touching its lines. Returns whether the document exists.
    #[instrument(skip(self, settings))]
    pub async fn update_settings(
        &self,
        id: &str,
        settings: &DocumentSettings,
    ) -> Result<bool, IngestError> {
        let result = sqlx::query(
            "UPDATE documents SET entry_tax_rate = ?, retail_markup = ?, wholesale_markup = ?, \
             rounding_policy = ?, freight = ?, hidden_items = ?, show_only_hidden = ?, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(settings.pricing.entry_tax_rate.to_string())
        .bind(settings.pricing.retail_markup.to_string())
        .bind(settings.pricing.wholesale_markup.to_string())
        .bind(settings.pricing.rounding.code())
        .bind(settings.pricing.freight.to_string())
        .bind(hidden_items_json(&settings.hidden_items)?)
        .bind(settings.show_only_hidden)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically replace a document: delete its line items, upsert the
    /// header, insert the new line items. Any failure rolls the whole unit
    /// back. Returns the summary as stored, read before the commit.
    ///
    /// A stored access key is never overwritten.
    #[instrument(skip(self, document), fields(id = %document.id, lines = document.lines.len()))]
    pub async fn replace_document(
        &self,
        document: &Document,
    ) -> Result<DocumentSummary, IngestError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM line_items WHERE document_id = ?")
            .bind(&document.id)
            .execute(&mut *tx)
            .await?;

        upsert_header(&mut tx, document).await?;

        for line in &document.lines {
            insert_line(&mut tx, &document.id, line).await?;
        }

        let sql = format!("SELECT {SUMMARY_COLUMNS} FROM documents WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(&document.id)
            .fetch_one(&mut *tx)
            .await?;
        let stored = summary_from_row(&row)?;

        tx.commit().await?;
        info!(id = %document.id, lines = document.lines.len(), "document committed");
        Ok(stored)
    }

    /// Delete a document; its line items go with it. Returns whether a row
    /// was removed.
    #[instrument(skip(self))]
    pub async fn delete_document(&self, id: &str) -> Result<bool, IngestError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(id, "document deleted");
        }
        Ok(deleted)
    }
}

async fn upsert_header(
    tx: &mut Transaction<'_, Sqlite>,
    doc: &Document,
) -> Result<(), IngestError> {
    let hidden = hidden_items_json(&doc.hidden_items)?;
    let number = match doc.number {
        Some(n) => Some(i64::try_from(n).map_err(|_| IngestError::Persistence {
            kind: PersistenceErrorKind::Constraint,
            message: format!("document number {n} does not fit the number column"),
        })?),
        None => None,
    };

    sqlx::query(UPSERT_DOCUMENT)
        .bind(&doc.id)
        .bind(&doc.access_key)
        .bind(number)
        .bind(&doc.series)
        .bind(doc.issue_date)
        .bind(&doc.counterparty_name)
        .bind(&doc.counterparty_tax_id)
        .bind(doc.declared_net_total.to_string())
        .bind(doc.declared_products_total.to_string())
        .bind(doc.declared_discount_total.to_string())
        .bind(doc.declared_freight_total.to_string())
        .bind(i64::from(doc.declared_line_count))
        .bind(doc.pricing.entry_tax_rate.to_string())
        .bind(doc.pricing.retail_markup.to_string())
        .bind(doc.pricing.wholesale_markup.to_string())
        .bind(doc.pricing.rounding.code())
        .bind(doc.pricing.freight.to_string())
        .bind(hidden)
        .bind(doc.show_only_hidden)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_line(
    tx: &mut Transaction<'_, Sqlite>,
    document_id: &str,
    line: &LineItem,
) -> Result<(), IngestError> {
    let (regime, group, origin, code, icms) = match &line.icms {
        IcmsTax::Standard {
            group,
            origin,
            cst,
            amounts,
        } => ("standard", group.as_str(), origin.as_str(), cst.as_str(), *amounts),
        IcmsTax::Simplified {
            group,
            origin,
            csosn,
            amounts,
        } => ("simplified", group.as_str(), origin.as_str(), csosn.as_str(), *amounts),
        IcmsTax::None => ("none", "", "", "", TaxAmounts::default()),
    };

    sqlx::query(INSERT_LINE_ITEM)
        .bind(document_id)
        .bind(i64::from(line.item_number))
        .bind(&line.code)
        .bind(&line.description)
        .bind(&line.ncm)
        .bind(&line.cfop)
        .bind(&line.cest)
        .bind(&line.unit)
        .bind(line.quantity.to_string())
        .bind(line.unit_price.to_string())
        .bind(line.total.to_string())
        .bind(line.discount.to_string())
        .bind(line.allocated_discount.to_string())
        .bind(regime)
        .bind(group)
        .bind(origin)
        .bind(code)
        .bind(icms.base.to_string())
        .bind(icms.rate.to_string())
        .bind(icms.value.to_string())
        .bind(&line.ipi.cst)
        .bind(line.ipi.amounts.base.to_string())
        .bind(line.ipi.amounts.rate.to_string())
        .bind(line.ipi.amounts.value.to_string())
        .bind(&line.barcode)
        .bind(&line.supplier_reference)
        .bind(&line.brand)
        .bind(&line.image_ref)
        .bind(&line.additional_info)
        .bind(line.extra_cost.to_string())
        .bind(line.freight_share.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn hidden_items_json(items: &BTreeSet<u32>) -> Result<String, IngestError> {
    serde_json::to_string(items).map_err(|e| IngestError::CorruptRecord(format!("hidden items: {e}")))
}

fn decimal_col(row: &SqliteRow, col: &str) -> Result<Decimal, IngestError> {
    let raw: String = row.try_get(col)?;
    Decimal::from_str(&raw).map_err(|e| IngestError::CorruptRecord(format!("{col} = '{raw}': {e}")))
}

fn u32_col(row: &SqliteRow, col: &str) -> Result<u32, IngestError> {
    let raw: i64 = row.try_get(col)?;
    u32::try_from(raw).map_err(|_| IngestError::CorruptRecord(format!("{col} = {raw} out of range")))
}

fn summary_from_row(row: &SqliteRow) -> Result<DocumentSummary, IngestError> {
    let number: Option<i64> = row.try_get("number")?;
    Ok(DocumentSummary {
        id: row.try_get("id")?,
        access_key: row.try_get("access_key")?,
        number: number.and_then(|n| u64::try_from(n).ok()),
        counterparty: row.try_get("counterparty_name")?,
        value: decimal_col(row, "declared_net_total")?,
    })
}

fn settings_from_row(row: &SqliteRow) -> Result<DocumentSettings, IngestError> {
    let rounding: String = row.try_get("rounding_policy")?;
    let hidden: String = row.try_get("hidden_items")?;
    let hidden_items: BTreeSet<u32> = serde_json::from_str(&hidden)
        .map_err(|e| IngestError::CorruptRecord(format!("hidden_items = '{hidden}': {e}")))?;

    Ok(DocumentSettings {
        pricing: PricingConfig {
            entry_tax_rate: decimal_col(row, "entry_tax_rate")?,
            retail_markup: decimal_col(row, "retail_markup")?,
            wholesale_markup: decimal_col(row, "wholesale_markup")?,
            rounding: RoundingPolicy::from_code(&rounding).ok_or_else(|| {
                IngestError::CorruptRecord(format!("rounding_policy = '{rounding}'"))
            })?,
            freight: decimal_col(row, "freight")?,
        },
        hidden_items,
        show_only_hidden: row.try_get("show_only_hidden")?,
    })
}

fn document_from_row(row: &SqliteRow, lines: Vec<LineItem>) -> Result<Document, IngestError> {
    let number: Option<i64> = row.try_get("number")?;
    let issue_date: Option<NaiveDate> = row.try_get("issue_date")?;
    let settings = settings_from_row(row)?;

    Ok(Document {
        id: row.try_get("id")?,
        access_key: row.try_get("access_key")?,
        number: number.and_then(|n| u64::try_from(n).ok()),
        series: row.try_get("series")?,
        issue_date,
        counterparty_name: row.try_get("counterparty_name")?,
        counterparty_tax_id: row.try_get("counterparty_tax_id")?,
        declared_net_total: decimal_col(row, "declared_net_total")?,
        declared_products_total: decimal_col(row, "declared_products_total")?,
        declared_discount_total: decimal_col(row, "declared_discount_total")?,
        declared_freight_total: decimal_col(row, "declared_freight_total")?,
        declared_line_count: u32_col(row, "declared_line_count")?,
        pricing: settings.pricing,
        hidden_items: settings.hidden_items,
        show_only_hidden: settings.show_only_hidden,
        lines,
    })
}

fn line_from_row(row: &SqliteRow) -> Result<LineItem, IngestError> {
    let regime: String = row.try_get("icms_regime")?;
    let amounts = TaxAmounts {
        base: decimal_col(row, "icms_base")?,
        rate: decimal_col(row, "icms_rate")?,
        value: decimal_col(row, "icms_value")?,
    };
    let icms = match regime.as_str() {
        "standard" => IcmsTax::Standard {
            group: row.try_get("icms_group")?,
            origin: row.try_get("icms_origin")?,
            cst: row.try_get("icms_code")?,
            amounts,
        },
        "simplified" => IcmsTax::Simplified {
            group: row.try_get("icms_group")?,
            origin: row.try_get("icms_origin")?,
            csosn: row.try_get("icms_code")?,
            amounts,
        },
        "none" => IcmsTax::None,
        other => {
            return Err(IngestError::CorruptRecord(format!("icms_regime = '{other}'")));
        }
    };

    Ok(LineItem {
        item_number: u32_col(row, "item_number")?,
        code: row.try_get("code")?,
        description: row.try_get("description")?,
        ncm: row.try_get("ncm")?,
        cfop: row.try_get("cfop")?,
        cest: row.try_get("cest")?,
        unit: row.try_get("unit")?,
        quantity: decimal_col(row, "quantity")?,
        unit_price: decimal_col(row, "unit_price")?,
        total: decimal_col(row, "total")?,
        discount: decimal_col(row, "discount")?,
        allocated_discount: decimal_col(row, "allocated_discount")?,
        icms,
        ipi: IpiTax {
            cst: row.try_get("ipi_cst")?,
            amounts: TaxAmounts {
                base: decimal_col(row, "ipi_base")?,
                rate: decimal_col(row, "ipi_rate")?,
                value: decimal_col(row, "ipi_value")?,
            },
        },
        barcode: row.try_get("barcode")?,
        supplier_reference: row.try_get("supplier_reference")?,
        brand: row.try_get("brand")?,
        image_ref: row.try_get("image_ref")?,
        additional_info: row.try_get("additional_info")?,
        extra_cost: decimal_col(row, "extra_cost")?,
        freight_share: decimal_col(row, "freight_share")?,
    })
}
