use async_trait::async_trait;
use chrono::{DateTime, Days, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

use super::utils::{Pagination, RecordId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Income,
    Expense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    MobilePayment,
    AutoDebit,
    Cash,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurringInterval {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurringInterval {
    /// The occurrence following `date`. Month arithmetic clamps to the last
    /// day of shorter months.
    pub fn next_occurrence(self, date: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Daily => date.checked_add_days(Days::new(1)),
            Self::Weekly => date.checked_add_days(Days::new(7)),
            Self::Monthly => date.checked_add_months(Months::new(1)),
            Self::Yearly => date.checked_add_months(Months::new(12)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: RecordId,
    pub user_id: RecordId,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: TransactionType,
    pub title: String,
    pub amount: Decimal,
    pub category: String,
    pub description: Option<String>,
    pub receipt_url: Option<String>,
    pub date: DateTime<Utc>,
    pub is_recurring: bool,
    pub recurring_interval: Option<RecurringInterval>,
    pub next_recurring_date: Option<DateTime<Utc>>,
    pub last_processed: Option<DateTime<Utc>>,
    pub status: TransactionStatus,
    pub payment_method: PaymentMethod,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Business fields of a transaction, before an id and owner are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub kind: TransactionType,
    pub title: String,
    pub amount: Decimal,
    pub category: String,
    pub description: Option<String>,
    pub receipt_url: Option<String>,
    pub date: DateTime<Utc>,
    pub is_recurring: bool,
    pub recurring_interval: Option<RecurringInterval>,
    pub status: TransactionStatus,
    pub payment_method: PaymentMethod,
}

impl NewTransaction {
    /// Assigns identity and derives the recurrence schedule.
    pub fn into_transaction(self, owner: &RecordId, now: DateTime<Utc>) -> Transaction {
        let mut transaction = Transaction {
            id: RecordId::generate(),
            user_id: owner.clone(),
            kind: self.kind,
            title: self.title,
            amount: self.amount,
            category: self.category,
            description: self.description,
            receipt_url: self.receipt_url,
            date: self.date,
            is_recurring: self.is_recurring,
            recurring_interval: self.recurring_interval,
            next_recurring_date: None,
            last_processed: None,
            status: self.status,
            payment_method: self.payment_method,
            created_at: now,
            updated_at: now,
        };
        transaction.reschedule();
        transaction
    }
}

impl Transaction {
    /// Recomputes `next_recurring_date` from the date and interval, clearing the
    /// schedule when the transaction is not recurring.
    pub fn reschedule(&mut self) {
        if !self.is_recurring {
            self.recurring_interval = None;
            self.next_recurring_date = None;
            return;
        }

        self.next_recurring_date = self
            .recurring_interval
            .and_then(|interval| interval.next_occurrence(self.date));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurringStatus {
    Recurring,
    NonRecurring,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    pub keyword: Option<String>,
    pub kind: Option<TransactionType>,
    pub recurring_status: Option<RecurringStatus>,
}

impl TransactionFilter {
    pub fn matches(&self, transaction: &Transaction) -> bool {
        if let Some(kind) = self.kind {
            if transaction.kind != kind {
                return false;
            }
        }

        match self.recurring_status {
            Some(RecurringStatus::Recurring) if !transaction.is_recurring => return false,
            Some(RecurringStatus::NonRecurring) if transaction.is_recurring => return false,
            _ => {}
        }

        match &self.keyword {
            Some(keyword) => {
                let keyword = keyword.to_lowercase();
                [
                    Some(transaction.title.as_str()),
                    Some(transaction.category.as_str()),
                    transaction.description.as_deref(),
                ]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&keyword))
            }
            None => true,
        }
    }
}

/// Income/expense sums over a date window.
#[derive(Debug, Clone, Copy, Default, PartialEq, FromRow)]
pub struct Totals {
    pub income: Decimal,
    pub expenses: Decimal,
    pub count: i64,
}

/// Transaction storage. Every operation is scoped to the owning user, so there
/// is no way to read or modify another user's records through it.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, owner: &RecordId, transaction: NewTransaction) -> Result<Transaction, sqlx::Error>;

    /// Inserts every transaction or none of them.
    async fn insert_many(
        &self,
        owner: &RecordId,
        transactions: Vec<NewTransaction>,
    ) -> Result<Vec<Transaction>, sqlx::Error>;

    async fn find(&self, owner: &RecordId, id: &RecordId) -> Result<Option<Transaction>, sqlx::Error>;

    /// Returns the requested page (most recent first) and the total match count.
    async fn list(
        &self,
        owner: &RecordId,
        filter: &TransactionFilter,
        page: Pagination,
    ) -> Result<(Vec<Transaction>, i64), sqlx::Error>;

    /// Writes back the mutable fields of `transaction`; false when it no longer exists.
    async fn save(&self, owner: &RecordId, transaction: &Transaction) -> Result<bool, sqlx::Error>;

    async fn delete(&self, owner: &RecordId, id: &RecordId) -> Result<bool, sqlx::Error>;

    /// Returns how many of `ids` were deleted.
    async fn delete_many(&self, owner: &RecordId, ids: &[RecordId]) -> Result<u64, sqlx::Error>;

    /// Completed transactions dated within `[from, to)`; open bounds are unbounded.
    async fn totals(
        &self,
        owner: &RecordId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Totals, sqlx::Error>;
}

pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TRANSACTION_COLUMNS: &str = "id, user_id, type, title, amount, category, description, receipt_url, date, \
     is_recurring, recurring_interval, next_recurring_date, last_processed, status, payment_method, \
     created_at, updated_at";

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, owner: &RecordId, filter: &TransactionFilter) {
    builder.push(" WHERE user_id = ").push_bind(owner.clone());

    if let Some(kind) = filter.kind {
        builder.push(" AND type = ").push_bind(kind);
    }

    match filter.recurring_status {
        Some(RecurringStatus::Recurring) => {
            builder.push(" AND is_recurring = TRUE");
        }
        Some(RecurringStatus::NonRecurring) => {
            builder.push(" AND is_recurring = FALSE");
        }
        None => {}
    }

    if let Some(keyword) = &filter.keyword {
        let pattern = format!("%{}%", escape_like(keyword));
        builder
            .push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR category ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_insert_values<'a>(builder: &mut QueryBuilder<'a, Postgres>, rows: &'a [Transaction]) {
    builder.push_values(rows, |mut row, tx| {
        row.push_bind(&tx.id)
            .push_bind(&tx.user_id)
            .push_bind(tx.kind)
            .push_bind(&tx.title)
            .push_bind(tx.amount)
            .push_bind(&tx.category)
            .push_bind(&tx.description)
            .push_bind(&tx.receipt_url)
            .push_bind(tx.date)
            .push_bind(tx.is_recurring)
            .push_bind(tx.recurring_interval)
            .push_bind(tx.next_recurring_date)
            .push_bind(tx.last_processed)
            .push_bind(tx.status)
            .push_bind(tx.payment_method)
            .push_bind(tx.created_at)
            .push_bind(tx.updated_at);
    });
}

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn insert(&self, owner: &RecordId, transaction: NewTransaction) -> Result<Transaction, sqlx::Error> {
        let rows = [transaction.into_transaction(owner, Utc::now())];

        let mut builder = QueryBuilder::new(format!("INSERT INTO transactions ({TRANSACTION_COLUMNS}) "));
        push_insert_values(&mut builder, &rows);
        builder.push(format!(" RETURNING {TRANSACTION_COLUMNS}"));

        builder
            .build_query_as::<Transaction>()
            .fetch_one(&self.pool)
            .await
    }

    async fn insert_many(
        &self,
        owner: &RecordId,
        transactions: Vec<NewTransaction>,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        let now = Utc::now();
        let rows: Vec<Transaction> = transactions
            .into_iter()
            .map(|transaction| transaction.into_transaction(owner, now))
            .collect();
        if rows.is_empty() {
            return Ok(rows);
        }

        let mut tx = self.pool.begin().await?;

        // Postgres caps bind parameters per statement at 65535.
        for chunk in rows.chunks(1000) {
            let mut builder = QueryBuilder::new(format!("INSERT INTO transactions ({TRANSACTION_COLUMNS}) "));
            push_insert_values(&mut builder, chunk);
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(rows)
    }

    async fn find(&self, owner: &RecordId, id: &RecordId) -> Result<Option<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list(
        &self,
        owner: &RecordId,
        filter: &TransactionFilter,
        page: Pagination,
    ) -> Result<(Vec<Transaction>, i64), sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM transactions");
        push_filter(&mut count, owner, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {TRANSACTION_COLUMNS} FROM transactions"));
        push_filter(&mut select, owner, filter);
        select
            .push(" ORDER BY date DESC, created_at DESC LIMIT ")
            .push_bind(page.page_size)
            .push(" OFFSET ")
            .push_bind(page.offset());

        let transactions = select
            .build_query_as::<Transaction>()
            .fetch_all(&self.pool)
            .await?;

        Ok((transactions, total))
    }

    async fn save(&self, owner: &RecordId, transaction: &Transaction) -> Result<bool, sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET type = $1, title = $2, amount = $3, category = $4, description = $5, receipt_url = $6,
                date = $7, is_recurring = $8, recurring_interval = $9, next_recurring_date = $10,
                status = $11, payment_method = $12, updated_at = $13
            WHERE id = $14 AND user_id = $15
            "#,
        )
        .bind(transaction.kind)
        .bind(&transaction.title)
        .bind(transaction.amount)
        .bind(&transaction.category)
        .bind(&transaction.description)
        .bind(&transaction.receipt_url)
        .bind(transaction.date)
        .bind(transaction.is_recurring)
        .bind(transaction.recurring_interval)
        .bind(transaction.next_recurring_date)
        .bind(transaction.status)
        .bind(transaction.payment_method)
        .bind(transaction.updated_at)
        .bind(&transaction.id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map(|result| result.rows_affected() > 0)
    }

    async fn delete(&self, owner: &RecordId, id: &RecordId) -> Result<bool, sqlx::Error> {
        sqlx::query("DELETE FROM transactions WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map(|result| result.rows_affected() > 0)
    }

    async fn delete_many(&self, owner: &RecordId, ids: &[RecordId]) -> Result<u64, sqlx::Error> {
        let ids: Vec<&str> = ids.iter().map(RecordId::as_str).collect();
        sqlx::query("DELETE FROM transactions WHERE user_id = $1 AND id = ANY($2)")
            .bind(owner)
            .bind(&ids)
            .execute(&self.pool)
            .await
            .map(|result| result.rows_affected())
    }

    async fn totals(
        &self,
        owner: &RecordId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Totals, sqlx::Error> {
        sqlx::query_as::<_, Totals>(
            r#"
            SELECT
                COALESCE(SUM(amount) FILTER (WHERE type = 'INCOME'), 0) AS income,
                COALESCE(SUM(amount) FILTER (WHERE type = 'EXPENSE'), 0) AS expenses,
                COUNT(*) AS count
            FROM transactions
            WHERE user_id = $1
              AND status = 'COMPLETED'
              AND ($2::timestamptz IS NULL OR date >= $2)
              AND ($3::timestamptz IS NULL OR date < $3)
            "#,
        )
        .bind(owner)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
    }
}
