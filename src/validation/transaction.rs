use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use reqwest::Url;
use rust_decimal::Decimal;
use serde_json::Value;

use super::Fields;
use crate::{
    db::{
        tx::{
            NewTransaction, PaymentMethod, RecurringInterval, RecurringStatus, Transaction, TransactionFilter,
            TransactionStatus, TransactionType,
        },
        utils::{RecordId, RECORD_ID_LEN},
    },
    error::FieldError,
};

pub const MIN_AMOUNT: f64 = 1.0;
pub const MAX_AMOUNT: f64 = 1_000_000_000.0;
pub const MAX_BULK_TRANSACTIONS: usize = 300;

/// Every field of the transaction schema, each optional. Create fills in
/// defaults and enforces the required ones; update applies what is present.
#[derive(Debug, Default)]
struct TransactionFields {
    title: Option<String>,
    kind: Option<TransactionType>,
    amount: Option<Decimal>,
    category: Option<String>,
    description: Option<String>,
    receipt_url: Option<String>,
    date: Option<DateTime<Utc>>,
    is_recurring: Option<bool>,
    // Outer None: absent. Inner None: explicitly null.
    recurring_interval: Option<Option<RecurringInterval>>,
    payment_method: Option<PaymentMethod>,
}

/// Positive, at least [MIN_AMOUNT] and at most [MAX_AMOUNT], kept to cents.
pub fn check_amount(value: f64) -> Result<Decimal, &'static str> {
    if !value.is_finite() {
        return Err("Transaction amount must be a finite number");
    }
    if value <= 0.0 {
        return Err("Transaction amount must be positive");
    }
    if value < MIN_AMOUNT {
        return Err("Transaction amount must be at least 1");
    }
    if value > MAX_AMOUNT {
        return Err("Transaction amount must not exceed 1,000,000,000");
    }
    Decimal::try_from(value)
        .map(|amount| amount.round_dp(2))
        .map_err(|_| "Transaction amount must be a finite number")
}

/// Years a stored timestamp may fall in.
const DATE_YEARS: std::ops::RangeInclusive<i32> = 1..=9999;

/// Accepts an RFC 3339 datetime or a bare `YYYY-MM-DD` date (midnight UTC),
/// within years 1 to 9999.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let parsed = match DateTime::parse_from_rfc3339(raw) {
        Ok(datetime) => Some(datetime.with_timezone(&Utc)),
        Err(_) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc()),
    };
    parsed.filter(|date| DATE_YEARS.contains(&date.year()))
}

fn non_empty(fields: &mut Fields<'_>, field: &str, message: &str, required: bool) -> Option<String> {
    let value = fields.str(field, required.then_some(message))?.trim();
    if value.is_empty() {
        fields.error(field, message);
        return None;
    }
    Some(value.to_string())
}

fn read_transaction(fields: &mut Fields<'_>, partial: bool) -> TransactionFields {
    let required = !partial;

    let title = non_empty(fields, "title", "Transaction title is required", required);
    let kind = fields.choice("type", "Transaction type is required", required);
    let amount = fields
        .number("amount", required.then_some("Transaction amount is required"))
        .and_then(|value| match check_amount(value) {
            Ok(amount) => Some(amount),
            Err(message) => {
                fields.error("amount", message);
                None
            }
        });
    let category = non_empty(fields, "category", "Transaction category is required", required);
    let description = fields.str("description", None).map(|value| value.trim().to_string());

    let receipt_url = fields.str("receiptUrl", None).and_then(|raw| {
        match Url::parse(raw.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Some(raw.trim().to_string()),
            _ => {
                fields.error("receiptUrl", "Invalid URL");
                None
            }
        }
    });

    let date = fields
        .str("date", required.then_some("Transaction date is required"))
        .and_then(|raw| match parse_date(raw) {
            Some(date) => Some(date),
            None => {
                fields.error("date", "Invalid date string");
                None
            }
        });

    let is_recurring = fields.boolean("isRecurring");
    let recurring_interval = if fields.is_null("recurringInterval") {
        Some(None)
    } else {
        fields
            .choice::<RecurringInterval>("recurringInterval", "Invalid recurring interval", false)
            .map(Some)
    };
    let payment_method = fields.choice("paymentMethod", "Invalid payment method", false);

    TransactionFields {
        title,
        kind,
        amount,
        category,
        description,
        receipt_url,
        date,
        is_recurring,
        recurring_interval,
        payment_method,
    }
}

fn parse_new(fields: &mut Fields<'_>) -> Option<NewTransaction> {
    let parsed = read_transaction(fields, false);
    if fields.has_errors() {
        return None;
    }

    Some(NewTransaction {
        kind: parsed.kind?,
        title: parsed.title?,
        amount: parsed.amount?,
        category: parsed.category?,
        description: parsed.description,
        receipt_url: parsed.receipt_url,
        date: parsed.date?,
        is_recurring: parsed.is_recurring.unwrap_or(false),
        recurring_interval: parsed.recurring_interval.flatten(),
        status: TransactionStatus::Completed,
        payment_method: parsed.payment_method.unwrap_or(PaymentMethod::Cash),
    })
}

pub fn parse_create(body: &Value) -> Result<NewTransaction, Vec<FieldError>> {
    let mut fields = Fields::new(body);
    let transaction = parse_new(&mut fields);
    fields.finish(|| transaction)
}

/// Fields to change on an existing transaction; absent fields stay untouched.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TransactionPatch {
    pub kind: Option<TransactionType>,
    pub title: Option<String>,
    pub amount: Option<Decimal>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub receipt_url: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub is_recurring: Option<bool>,
    pub recurring_interval: Option<Option<RecurringInterval>>,
    pub payment_method: Option<PaymentMethod>,
}

impl TransactionPatch {
    /// Applies the patch; ownership, status and identity are never touched.
    pub fn apply(self, transaction: &mut Transaction) {
        let schedule_changed =
            self.date.is_some() || self.is_recurring.is_some() || self.recurring_interval.is_some();

        if let Some(kind) = self.kind {
            transaction.kind = kind;
        }
        if let Some(title) = self.title {
            transaction.title = title;
        }
        if let Some(amount) = self.amount {
            transaction.amount = amount;
        }
        if let Some(category) = self.category {
            transaction.category = category;
        }
        if let Some(description) = self.description {
            transaction.description = Some(description);
        }
        if let Some(receipt_url) = self.receipt_url {
            transaction.receipt_url = Some(receipt_url);
        }
        if let Some(date) = self.date {
            transaction.date = date;
        }
        if let Some(is_recurring) = self.is_recurring {
            transaction.is_recurring = is_recurring;
        }
        if let Some(interval) = self.recurring_interval {
            transaction.recurring_interval = interval;
        }
        if let Some(payment_method) = self.payment_method {
            transaction.payment_method = payment_method;
        }

        if schedule_changed {
            transaction.reschedule();
        }
    }
}

pub fn parse_update(body: &Value) -> Result<TransactionPatch, Vec<FieldError>> {
    let mut fields = Fields::new(body);
    let parsed = read_transaction(&mut fields, true);

    fields.finish(|| {
        Some(TransactionPatch {
            kind: parsed.kind,
            title: parsed.title,
            amount: parsed.amount,
            category: parsed.category,
            description: parsed.description,
            receipt_url: parsed.receipt_url,
            date: parsed.date,
            is_recurring: parsed.is_recurring,
            recurring_interval: parsed.recurring_interval,
            payment_method: parsed.payment_method,
        })
    })
}

/// `{transactions: [...]}` with 1..=300 items. A single bad item fails the
/// whole batch.
pub fn parse_bulk_create(body: &Value) -> Result<Vec<NewTransaction>, Vec<FieldError>> {
    let mut fields = Fields::new(body);
    let mut transactions = Vec::new();

    if let Some(items) = fields.array("transactions", "Transactions are required") {
        if items.is_empty() {
            fields.error("transactions", "At least one transaction is required");
        } else if items.len() > MAX_BULK_TRANSACTIONS {
            fields.error(
                "transactions",
                format!("Must not exceed {MAX_BULK_TRANSACTIONS} transactions"),
            );
        } else {
            for (index, item) in items.iter().enumerate() {
                let mut item_fields = Fields::nested(item, fields.path(&format!("transactions.{index}")));
                if let Some(transaction) = parse_new(&mut item_fields) {
                    transactions.push(transaction);
                }
                fields.absorb(item_fields.into_errors());
            }
        }
    }

    fields.finish(|| Some(transactions))
}

/// `{transactionIds: [...]}`: non-empty, every id exactly 24 characters.
/// Repeated ids are collapsed.
pub fn parse_bulk_delete(body: &Value) -> Result<Vec<RecordId>, Vec<FieldError>> {
    let mut fields = Fields::new(body);
    let mut ids = BTreeSet::new();

    if let Some(items) = fields.array("transactionIds", "Transaction ids are required") {
        if items.is_empty() {
            fields.error("transactionIds", "At least one transaction id is required");
        }
        for (index, item) in items.iter().enumerate() {
            match item.as_str() {
                Some(id) if id.chars().count() == RECORD_ID_LEN => {
                    ids.insert(id.to_string());
                }
                _ => fields.error(&format!("transactionIds.{index}"), "Invalid transaction id format"),
            }
        }
    }

    fields.finish(|| Some(ids.into_iter().map(RecordId::from).collect()))
}

pub fn parse_transaction_id(raw: &str) -> Result<RecordId, Vec<FieldError>> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(vec![FieldError::new("id", "Transaction id is required")]);
    }
    Ok(RecordId::from(id))
}

/// Query string of `GET /transaction/all`.
pub fn parse_filter(
    keyword: Option<&str>,
    kind: Option<&str>,
    recurring_status: Option<&str>,
) -> Result<TransactionFilter, Vec<FieldError>> {
    fn choice<T: serde::de::DeserializeOwned>(
        errors: &mut Vec<FieldError>,
        field: &str,
        raw: Option<&str>,
        message: &str,
    ) -> Option<T> {
        let raw = raw.map(str::trim).filter(|raw| !raw.is_empty())?;
        match serde_json::from_value(Value::String(raw.to_string())) {
            Ok(value) => Some(value),
            Err(_) => {
                errors.push(FieldError::new(field, message));
                None
            }
        }
    }

    let mut errors = Vec::new();
    let kind: Option<TransactionType> = choice(&mut errors, "type", kind, "Invalid transaction type");
    let recurring_status: Option<RecurringStatus> =
        choice(&mut errors, "recurringStatus", recurring_status, "Invalid recurring status");

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(TransactionFilter {
        keyword: keyword
            .map(str::trim)
            .filter(|keyword| !keyword.is_empty())
            .map(str::to_string),
        kind,
        recurring_status,
    })
}
