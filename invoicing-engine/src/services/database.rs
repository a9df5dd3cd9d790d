//! PostgreSQL document store for invoicing-engine.

use crate::error::BillingError;
use crate::models::{
    Certification, CertificationRecord, CreditNote, CreditNoteDocument, CreditNoteStatus,
    Customer, FneStatus, Invoice, InvoiceDocument, InvoiceStatus, LineItem, LineItemView,
    ListCreditNotesFilter, ListInvoicesFilter, Product, User,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::numbering::DocumentKind;
use crate::services::store::DocumentStore;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "id, invoice_number, status, issue_date, due_date, subtotal, vat_amount, total, \
    notes, payment_terms, payment_method, template, customer_id, user_id, \
    fne_status, fne_reference, fne_token, fne_certified_at, balance_sticker, created_utc, updated_utc";

const CREDIT_NOTE_COLUMNS: &str = "id, credit_note_number, status, issue_date, amount, vat_amount, total, \
    reason, notes, customer_id, user_id, invoice_id, created_utc, updated_utc";

const ITEM_COLUMNS: &str =
    "id, product_id, quantity, unit_price, vat_rate, subtotal, vat_amount, total, description, position";

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> BillingError {
    move |e| BillingError::Database(anyhow::anyhow!("Failed to {}: {}", context, e))
}

/// Item table and parent column per document kind.
fn item_table(kind: DocumentKind) -> (&'static str, &'static str) {
    match kind {
        DocumentKind::Invoice => ("invoice_items", "invoice_id"),
        DocumentKind::CreditNote => ("credit_note_items", "credit_note_id"),
    }
}

/// Document table and number column per document kind.
fn number_column(kind: DocumentKind) -> (&'static str, &'static str) {
    match kind {
        DocumentKind::Invoice => ("invoices", "invoice_number"),
        DocumentKind::CreditNote => ("credit_notes", "credit_note_number"),
    }
}

/// Scalar subquery for the highest numeric suffix of `kind` numbers starting
/// with the text bound at `$param`, 0 when there are none.
fn max_sequence_sql(kind: DocumentKind, param: u8) -> String {
    let (table, column) = number_column(kind);
    format!(
        "SELECT COALESCE(MAX(CAST(substring({col} FROM char_length(${p}::text) + 1) AS INTEGER)), 0) \
         FROM {table} \
         WHERE left({col}, char_length(${p}::text)) = ${p}::text \
           AND substring({col} FROM char_length(${p}::text) + 1) ~ '^[0-9]+$'",
        col = column,
        table = table,
        p = param
    )
}

#[derive(Debug, FromRow)]
struct InvoiceRow {
    id: Uuid,
    invoice_number: String,
    status: String,
    issue_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    subtotal: Decimal,
    vat_amount: Decimal,
    total: Decimal,
    notes: Option<String>,
    payment_terms: Option<String>,
    payment_method: Option<String>,
    template: Option<String>,
    customer_id: Uuid,
    user_id: Uuid,
    fne_status: String,
    fne_reference: Option<String>,
    fne_token: Option<String>,
    fne_certified_at: Option<DateTime<Utc>>,
    balance_sticker: Option<i64>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = BillingError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let certification = match row.fne_status.parse::<FneStatus>()? {
            FneStatus::Draft => Certification::Draft,
            FneStatus::Failed => Certification::Failed,
            FneStatus::Certified => match (row.fne_reference, row.fne_token, row.fne_certified_at) {
                (Some(reference), Some(token), Some(certified_at)) => {
                    Certification::Certified(CertificationRecord {
                        reference,
                        token,
                        certified_at,
                        balance_sticker: row.balance_sticker,
                    })
                }
                _ => {
                    return Err(BillingError::Database(anyhow::anyhow!(
                        "Invoice {} is certified without certification data",
                        row.id
                    )))
                }
            },
        };

        Ok(Invoice {
            id: row.id,
            invoice_number: row.invoice_number,
            status: row.status.parse()?,
            issue_date: row.issue_date,
            due_date: row.due_date,
            subtotal: row.subtotal,
            vat_amount: row.vat_amount,
            total: row.total,
            notes: row.notes,
            payment_terms: row.payment_terms,
            payment_method: row.payment_method,
            template: row.template,
            customer_id: row.customer_id,
            user_id: row.user_id,
            certification,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct CreditNoteRow {
    id: Uuid,
    credit_note_number: String,
    status: String,
    issue_date: NaiveDate,
    amount: Decimal,
    vat_amount: Decimal,
    total: Decimal,
    reason: String,
    notes: Option<String>,
    customer_id: Uuid,
    user_id: Uuid,
    invoice_id: Option<Uuid>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<CreditNoteRow> for CreditNote {
    type Error = BillingError;

    fn try_from(row: CreditNoteRow) -> Result<Self, Self::Error> {
        Ok(CreditNote {
            id: row.id,
            credit_note_number: row.credit_note_number,
            status: row.status.parse()?,
            issue_date: row.issue_date,
            amount: row.amount,
            vat_amount: row.vat_amount,
            total: row.total,
            reason: row.reason,
            notes: row.notes,
            customer_id: row.customer_id,
            user_id: row.user_id,
            invoice_id: row.invoice_id,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

fn certification_columns(
    certification: &Certification,
) -> (
    &'static str,
    Option<&str>,
    Option<&str>,
    Option<DateTime<Utc>>,
    Option<i64>,
) {
    match certification.record() {
        Some(record) => (
            FneStatus::Certified.as_str(),
            Some(record.reference.as_str()),
            Some(record.token.as_str()),
            Some(record.certified_at),
            record.balance_sticker,
        ),
        None => (certification.status().as_str(), None, None, None, None),
    }
}

async fn insert_items(
    conn: &mut PgConnection,
    kind: DocumentKind,
    parent_id: Uuid,
    items: &[LineItem],
) -> Result<(), BillingError> {
    let (table, parent_column) = item_table(kind);
    let sql = format!(
        "INSERT INTO {} ({}, {}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        table, parent_column, ITEM_COLUMNS
    );

    for item in items {
        sqlx::query(&sql)
            .bind(parent_id)
            .bind(item.id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.vat_rate)
            .bind(item.subtotal)
            .bind(item.vat_amount)
            .bind(item.total)
            .bind(&item.description)
            .bind(item.position)
            .execute(&mut *conn)
            .await
            .map_err(db_err("insert line item"))?;
    }
    Ok(())
}

async fn replace_items(
    conn: &mut PgConnection,
    kind: DocumentKind,
    parent_id: Uuid,
    items: &[LineItem],
) -> Result<(), BillingError> {
    let (table, parent_column) = item_table(kind);
    sqlx::query(&format!("DELETE FROM {} WHERE {} = $1", table, parent_column))
        .bind(parent_id)
        .execute(&mut *conn)
        .await
        .map_err(db_err("delete line items"))?;

    insert_items(conn, kind, parent_id, items).await
}

async fn fetch_customer(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<Customer>, BillingError> {
    sqlx::query_as::<_, Customer>(
        r#"
        SELECT id, name, email, phone, address, city, postal_code, country, siret, vat_number,
            is_active, created_utc
        FROM customers
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err("get customer"))
}

async fn fetch_product(conn: &mut PgConnection, id: Uuid) -> Result<Option<Product>, BillingError> {
    sqlx::query_as::<_, Product>(
        r#"
        SELECT id, name, description, price, vat_rate, unit, is_active, created_utc
        FROM products
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err("get product"))
}

async fn fetch_user(conn: &mut PgConnection, id: Uuid) -> Result<Option<User>, BillingError> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, first_name, last_name, is_active, created_utc
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err("get user"))
}

async fn required_customer(conn: &mut PgConnection, id: Uuid) -> Result<Customer, BillingError> {
    fetch_customer(conn, id)
        .await?
        .ok_or_else(|| BillingError::not_found("Customer", id))
}

async fn items_for(
    conn: &mut PgConnection,
    kind: DocumentKind,
    parent_id: Uuid,
) -> Result<Vec<LineItemView>, BillingError> {
    let (table, parent_column) = item_table(kind);
    let items = sqlx::query_as::<_, LineItem>(&format!(
        "SELECT {} FROM {} WHERE {} = $1 ORDER BY position",
        ITEM_COLUMNS, table, parent_column
    ))
    .bind(parent_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err("load line items"))?;

    let product_ids: Vec<Uuid> = items.iter().filter_map(|i| i.product_id).collect();
    let mut products: HashMap<Uuid, Product> = HashMap::new();
    if !product_ids.is_empty() {
        let rows = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, name, description, price, vat_rate, unit, is_active, created_utc
            FROM products
            WHERE id = ANY($1)
            "#,
        )
        .bind(&product_ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err("load products"))?;
        products.extend(rows.into_iter().map(|p| (p.id, p)));
    }

    Ok(items
        .into_iter()
        .map(|item| LineItemView {
            product: item.product_id.and_then(|id| products.get(&id).cloned()),
            item,
        })
        .collect())
}

async fn invoice_header(conn: &mut PgConnection, id: Uuid) -> Result<Option<Invoice>, BillingError> {
    let row = sqlx::query_as::<_, InvoiceRow>(&format!(
        "SELECT {} FROM invoices WHERE id = $1",
        INVOICE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err("get invoice"))?;
    row.map(Invoice::try_from).transpose()
}

async fn hydrate_invoice(
    conn: &mut PgConnection,
    row: InvoiceRow,
) -> Result<InvoiceDocument, BillingError> {
    let invoice = Invoice::try_from(row)?;
    Ok(InvoiceDocument {
        customer: required_customer(&mut *conn, invoice.customer_id).await?,
        user: fetch_user(&mut *conn, invoice.user_id).await?,
        items: items_for(&mut *conn, DocumentKind::Invoice, invoice.id).await?,
        invoice,
    })
}

async fn hydrate_credit_note(
    conn: &mut PgConnection,
    row: CreditNoteRow,
) -> Result<CreditNoteDocument, BillingError> {
    let credit_note = CreditNote::try_from(row)?;
    let invoice = match credit_note.invoice_id {
        Some(invoice_id) => invoice_header(&mut *conn, invoice_id).await?,
        None => None,
    };
    Ok(CreditNoteDocument {
        customer: required_customer(&mut *conn, credit_note.customer_id).await?,
        user: fetch_user(&mut *conn, credit_note.user_id).await?,
        items: items_for(&mut *conn, DocumentKind::CreditNote, credit_note.id).await?,
        invoice,
        credit_note,
    })
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "invoicing-engine"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Catalog seeding
    // -------------------------------------------------------------------------

    pub async fn insert_customer(&self, customer: &Customer) -> Result<(), BillingError> {
        sqlx::query(
            r#"
            INSERT INTO customers (id, name, email, phone, address, city, postal_code, country,
                siret, vat_number, is_active, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(customer.id)
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(&customer.address)
        .bind(&customer.city)
        .bind(&customer.postal_code)
        .bind(&customer.country)
        .bind(&customer.siret)
        .bind(&customer.vat_number)
        .bind(customer.is_active)
        .bind(customer.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err("insert customer"))?;
        Ok(())
    }

    pub async fn insert_product(&self, product: &Product) -> Result<(), BillingError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price, vat_rate, unit, is_active, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.vat_rate)
        .bind(&product.unit)
        .bind(product.is_active)
        .bind(product.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err("insert product"))?;
        Ok(())
    }

    pub async fn insert_user(&self, user: &User) -> Result<(), BillingError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, first_name, last_name, is_active, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.is_active)
        .bind(user.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err("insert user"))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Snapshot reads
    // -------------------------------------------------------------------------

    /// Read-only transaction in which every statement sees the same snapshot,
    /// so a document and its line items are read from one committed state.
    async fn snapshot(&self) -> Result<Transaction<'static, Postgres>, BillingError> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin snapshot"))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(db_err("set snapshot isolation"))?;
        Ok(tx)
    }
}

#[async_trait]
impl DocumentStore for Database {
    #[instrument(skip(self), fields(customer_id = %id))]
    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, BillingError> {
        let mut conn = self.pool.acquire().await.map_err(db_err("acquire connection"))?;
        fetch_customer(&mut *conn, id).await
    }

    #[instrument(skip(self), fields(product_id = %id))]
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, BillingError> {
        let mut conn = self.pool.acquire().await.map_err(db_err("acquire connection"))?;
        fetch_product(&mut *conn, id).await
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, BillingError> {
        let mut conn = self.pool.acquire().await.map_err(db_err("acquire connection"))?;
        fetch_user(&mut *conn, id).await
    }

    #[instrument(skip(self), fields(kind = %kind, year = year))]
    async fn next_sequence(&self, kind: DocumentKind, year: i32) -> Result<u32, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["next_sequence"])
            .start_timer();

        // The first reservation of a year is seeded from the highest number
        // already used with that prefix; later ones increment under the row lock.
        let sql = format!(
            r#"
            INSERT INTO document_sequences (kind, year, last_value)
            VALUES ($1, $2, ({}) + 1)
            ON CONFLICT (kind, year)
            DO UPDATE SET last_value = document_sequences.last_value + 1
            RETURNING last_value
            "#,
            max_sequence_sql(kind, 3)
        );

        let value: i32 = sqlx::query_scalar(&sql)
            .bind(kind.as_str())
            .bind(year)
            .bind(kind.prefix(year))
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("reserve document number"))?;

        timer.observe_duration();

        u32::try_from(value).map_err(|_| {
            BillingError::Database(anyhow::anyhow!("Invalid sequence value {}", value))
        })
    }

    async fn max_sequence_with_prefix(
        &self,
        kind: DocumentKind,
        prefix: &str,
    ) -> Result<u32, BillingError> {
        let max: i32 = sqlx::query_scalar(&max_sequence_sql(kind, 1))
            .bind(prefix)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("read highest document number"))?;
        Ok(max.max(0) as u32)
    }

    #[instrument(skip(self, invoice, items), fields(invoice_number = %invoice.invoice_number))]
    async fn insert_invoice(
        &self,
        invoice: &Invoice,
        items: &[LineItem],
    ) -> Result<(), BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_err("begin transaction"))?;
        let (fne_status, reference, token, certified_at, sticker) =
            certification_columns(&invoice.certification);

        sqlx::query(&format!(
            "INSERT INTO invoices ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
             $13, $14, $15, $16, $17, $18, $19, $20, $21)",
            INVOICE_COLUMNS
        ))
        .bind(invoice.id)
        .bind(&invoice.invoice_number)
        .bind(invoice.status.as_str())
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.subtotal)
        .bind(invoice.vat_amount)
        .bind(invoice.total)
        .bind(&invoice.notes)
        .bind(&invoice.payment_terms)
        .bind(&invoice.payment_method)
        .bind(&invoice.template)
        .bind(invoice.customer_id)
        .bind(invoice.user_id)
        .bind(fne_status)
        .bind(reference)
        .bind(token)
        .bind(certified_at)
        .bind(sticker)
        .bind(invoice.created_utc)
        .bind(invoice.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(db_err("create invoice"))?;

        insert_items(&mut *tx, DocumentKind::Invoice, invoice.id, items).await?;
        tx.commit().await.map_err(db_err("commit invoice"))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, invoice, items), fields(invoice_id = %invoice.id))]
    async fn update_invoice(
        &self,
        invoice: &Invoice,
        items: Option<&[LineItem]>,
    ) -> Result<(), BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_err("begin transaction"))?;

        let updated = sqlx::query(
            r#"
            UPDATE invoices
            SET status = $2,
                issue_date = $3,
                due_date = $4,
                subtotal = $5,
                vat_amount = $6,
                total = $7,
                notes = $8,
                payment_terms = $9,
                payment_method = $10,
                template = $11,
                customer_id = $12,
                updated_utc = $13
            WHERE id = $1
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.status.as_str())
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.subtotal)
        .bind(invoice.vat_amount)
        .bind(invoice.total)
        .bind(&invoice.notes)
        .bind(&invoice.payment_terms)
        .bind(&invoice.payment_method)
        .bind(&invoice.template)
        .bind(invoice.customer_id)
        .bind(invoice.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(db_err("update invoice"))?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::not_found("Invoice", invoice.id));
        }

        if let Some(items) = items {
            replace_items(&mut *tx, DocumentKind::Invoice, invoice.id, items).await?;
        }
        tx.commit().await.map_err(db_err("commit invoice update"))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self), fields(invoice_id = %id))]
    async fn load_invoice(&self, id: Uuid) -> Result<Option<InvoiceDocument>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["load_invoice"])
            .start_timer();

        let mut tx = self.snapshot().await?;
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {} FROM invoices WHERE id = $1",
            INVOICE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("get invoice"))?;

        let document = match row {
            Some(row) => Some(hydrate_invoice(&mut *tx, row).await?),
            None => None,
        };
        tx.commit().await.map_err(db_err("end snapshot"))?;

        timer.observe_duration();
        Ok(document)
    }

    #[instrument(skip(self, filter))]
    async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<InvoiceDocument>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let mut tx = self.snapshot().await?;
        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            SELECT {}
            FROM invoices
            WHERE ($1::uuid IS NULL OR user_id = $1)
              AND ($2::uuid IS NULL OR customer_id = $2)
              AND ($3::varchar IS NULL OR status = $3)
            ORDER BY created_utc DESC, invoice_number DESC
            "#,
            INVOICE_COLUMNS
        ))
        .bind(filter.user_id)
        .bind(filter.customer_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err("list invoices"))?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            documents.push(hydrate_invoice(&mut *tx, row).await?);
        }
        tx.commit().await.map_err(db_err("end snapshot"))?;

        timer.observe_duration();
        Ok(documents)
    }

    #[instrument(skip(self), fields(invoice_id = %id, status = %status))]
    async fn set_invoice_status(
        &self,
        id: Uuid,
        status: InvoiceStatus,
    ) -> Result<bool, BillingError> {
        let result = sqlx::query(
            "UPDATE invoices SET status = $2, updated_utc = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err("update invoice status"))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, certification), fields(invoice_id = %id, fne_status = %certification.status().as_str()))]
    async fn set_certification(
        &self,
        id: Uuid,
        certification: &Certification,
    ) -> Result<bool, BillingError> {
        let (fne_status, reference, token, certified_at, sticker) =
            certification_columns(certification);

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET fne_status = $2,
                fne_reference = $3,
                fne_token = $4,
                fne_certified_at = $5,
                balance_sticker = $6,
                updated_utc = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(fne_status)
        .bind(reference)
        .bind(token)
        .bind(certified_at)
        .bind(sticker)
        .execute(&self.pool)
        .await
        .map_err(db_err("record certification"))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(invoice_id = %id))]
    async fn delete_invoice(&self, id: Uuid) -> Result<bool, BillingError> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("delete invoice"))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, credit_note, items), fields(credit_note_number = %credit_note.credit_note_number))]
    async fn insert_credit_note(
        &self,
        credit_note: &CreditNote,
        items: &[LineItem],
    ) -> Result<(), BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_credit_note"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_err("begin transaction"))?;

        sqlx::query(&format!(
            "INSERT INTO credit_notes ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, \
             $12, $13, $14)",
            CREDIT_NOTE_COLUMNS
        ))
        .bind(credit_note.id)
        .bind(&credit_note.credit_note_number)
        .bind(credit_note.status.as_str())
        .bind(credit_note.issue_date)
        .bind(credit_note.amount)
        .bind(credit_note.vat_amount)
        .bind(credit_note.total)
        .bind(&credit_note.reason)
        .bind(&credit_note.notes)
        .bind(credit_note.customer_id)
        .bind(credit_note.user_id)
        .bind(credit_note.invoice_id)
        .bind(credit_note.created_utc)
        .bind(credit_note.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(db_err("create credit note"))?;

        insert_items(&mut *tx, DocumentKind::CreditNote, credit_note.id, items).await?;
        tx.commit().await.map_err(db_err("commit credit note"))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, credit_note, items), fields(credit_note_id = %credit_note.id))]
    async fn update_credit_note(
        &self,
        credit_note: &CreditNote,
        items: Option<&[LineItem]>,
    ) -> Result<(), BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_credit_note"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_err("begin transaction"))?;

        let updated = sqlx::query(
            r#"
            UPDATE credit_notes
            SET status = $2,
                issue_date = $3,
                amount = $4,
                vat_amount = $5,
                total = $6,
                reason = $7,
                notes = $8,
                customer_id = $9,
                invoice_id = $10,
                updated_utc = $11
            WHERE id = $1
            "#,
        )
        .bind(credit_note.id)
        .bind(credit_note.status.as_str())
        .bind(credit_note.issue_date)
        .bind(credit_note.amount)
        .bind(credit_note.vat_amount)
        .bind(credit_note.total)
        .bind(&credit_note.reason)
        .bind(&credit_note.notes)
        .bind(credit_note.customer_id)
        .bind(credit_note.invoice_id)
        .bind(credit_note.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(db_err("update credit note"))?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::not_found("Credit note", credit_note.id));
        }

        if let Some(items) = items {
            replace_items(&mut *tx, DocumentKind::CreditNote, credit_note.id, items).await?;
        }
        tx.commit()
            .await
            .map_err(db_err("commit credit note update"))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self), fields(credit_note_id = %id))]
    async fn load_credit_note(
        &self,
        id: Uuid,
    ) -> Result<Option<CreditNoteDocument>, BillingError> {
        let mut tx = self.snapshot().await?;
        let row = sqlx::query_as::<_, CreditNoteRow>(&format!(
            "SELECT {} FROM credit_notes WHERE id = $1",
            CREDIT_NOTE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("get credit note"))?;

        let document = match row {
            Some(row) => Some(hydrate_credit_note(&mut *tx, row).await?),
            None => None,
        };
        tx.commit().await.map_err(db_err("end snapshot"))?;
        Ok(document)
    }

    #[instrument(skip(self, filter))]
    async fn list_credit_notes(
        &self,
        filter: &ListCreditNotesFilter,
    ) -> Result<Vec<CreditNoteDocument>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_credit_notes"])
            .start_timer();

        let mut tx = self.snapshot().await?;
        let rows = sqlx::query_as::<_, CreditNoteRow>(&format!(
            r#"
            SELECT {}
            FROM credit_notes
            WHERE ($1::uuid IS NULL OR user_id = $1)
              AND ($2::uuid IS NULL OR customer_id = $2)
              AND ($3::uuid IS NULL OR invoice_id = $3)
              AND ($4::varchar IS NULL OR status = $4)
            ORDER BY created_utc DESC, credit_note_number DESC
            "#,
            CREDIT_NOTE_COLUMNS
        ))
        .bind(filter.user_id)
        .bind(filter.customer_id)
        .bind(filter.invoice_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err("list credit notes"))?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            documents.push(hydrate_credit_note(&mut *tx, row).await?);
        }
        tx.commit().await.map_err(db_err("end snapshot"))?;

        timer.observe_duration();
        Ok(documents)
    }

    #[instrument(skip(self), fields(credit_note_id = %id, status = %status))]
    async fn set_credit_note_status(
        &self,
        id: Uuid,
        status: CreditNoteStatus,
    ) -> Result<bool, BillingError> {
        let result = sqlx::query(
            "UPDATE credit_notes SET status = $2, updated_utc = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err("update credit note status"))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(credit_note_id = %id))]
    async fn delete_credit_note(&self, id: Uuid) -> Result<bool, BillingError> {
        let result = sqlx::query("DELETE FROM credit_notes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("delete credit note"))?;
        Ok(result.rows_affected() > 0)
    }
}
