//! Receipt scanning.
//!
//! The uploaded image is forwarded to an external text-generation service that
//! answers with the transaction it read from the receipt. Its answer is
//! untrusted and goes through the same checks as a user-submitted transaction.

use async_trait::async_trait;
use axum::{body::Bytes, extract::Multipart, http::StatusCode};
use base64::Engine;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    db::tx::{PaymentMethod, TransactionType},
    error::{AppError, UploadError},
    validation::transaction::{check_amount, parse_date},
};

pub const RECEIPT_FIELD: &str = "receipt";
pub const MAX_RECEIPT_BYTES: usize = 2 * 1024 * 1024;
const ALLOWED_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];

#[derive(Debug, Clone)]
pub struct ReceiptImage {
    pub mime_type: String,
    pub bytes: Bytes,
}

#[async_trait]
pub trait ReceiptScanner: Send + Sync {
    /// Returns the raw JSON answer of the scanning service.
    async fn scan(&self, image: &ReceiptImage) -> Result<Value, AppError>;
}

/// Scanner backed by an HTTP text-generation endpoint.
pub struct HttpReceiptScanner {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpReceiptScanner {
    pub fn new(url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
        }
    }
}

#[async_trait]
impl ReceiptScanner for HttpReceiptScanner {
    async fn scan(&self, image: &ReceiptImage) -> Result<Value, AppError> {
        let payload = json!({
            "mimeType": image.mime_type,
            "data": base64::engine::general_purpose::STANDARD.encode(&image.bytes),
        });

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| AppError::internal(format!("receipt scanner request failed: {err}")))?;

        response
            .json::<Value>()
            .await
            .map_err(|err| AppError::internal(format!("receipt scanner returned invalid JSON: {err}")))
    }
}

/// Reads the single `receipt` image out of a multipart body.
pub async fn read_upload(mut multipart: Multipart) -> Result<ReceiptImage, AppError> {
    let mut image = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => return Err(UploadError::FileTooLarge.into()),
            Err(err) => return Err(AppError::bad_request(err.body_text())),
        };

        if field.name() != Some(RECEIPT_FIELD) {
            return Err(UploadError::UnexpectedField.into());
        }
        if image.is_some() {
            return Err(UploadError::TooManyFiles.into());
        }

        let mime_type = field.content_type().unwrap_or_default().to_ascii_lowercase();
        if !ALLOWED_TYPES.contains(&mime_type.as_str()) {
            return Err(UploadError::InvalidFileType.into());
        }

        let bytes = field.bytes().await.map_err(|err| {
            if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
                AppError::from(UploadError::FileTooLarge)
            } else {
                AppError::bad_request(err.body_text())
            }
        })?;
        if bytes.len() > MAX_RECEIPT_BYTES {
            return Err(UploadError::FileTooLarge.into());
        }

        image = Some(ReceiptImage { mime_type, bytes });
    }

    image.ok_or_else(|| UploadError::MissingFile.into())
}

/// A transaction prefilled from a receipt, for the user to confirm.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptDraft {
    pub title: String,
    pub amount: Decimal,
    pub date: DateTime<Utc>,
    pub description: Option<String>,
    pub category: String,
    pub payment_method: PaymentMethod,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub receipt_url: Option<String>,
}

/// Unwraps answers that arrive as text (optionally fenced as ```json).
fn answer_object(answer: Value) -> Option<serde_json::Map<String, Value>> {
    match answer {
        Value::Object(object) => match object.get("text") {
            Some(Value::String(text)) if object.len() == 1 => answer_object(Value::String(text.clone())),
            _ => Some(object),
        },
        Value::String(text) => {
            let trimmed = text
                .trim()
                .trim_start_matches("```json")
                .trim_start_matches("```")
                .trim_end_matches("```")
                .trim();
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Object(object)) => Some(object),
                _ => None,
            }
        }
        _ => None,
    }
}

pub fn draft_from_answer(answer: Value, now: DateTime<Utc>) -> Result<ReceiptDraft, AppError> {
    let unreadable = || AppError::bad_request("Receipt could not be read");

    let object = answer_object(answer).filter(|object| !object.is_empty()).ok_or_else(unreadable)?;
    let text = |field: &str| {
        object
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let title = text("title").ok_or_else(unreadable)?;
    let amount = object
        .get("amount")
        .and_then(Value::as_f64)
        .map(|amount| amount.abs())
        .ok_or_else(unreadable)
        .and_then(|amount| check_amount(amount).map_err(AppError::bad_request))?;

    let date = text("date").and_then(|raw| parse_date(&raw)).unwrap_or(now);
    let payment_method = object
        .get("paymentMethod")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or(PaymentMethod::Cash);

    Ok(ReceiptDraft {
        title,
        amount,
        date,
        description: text("description"),
        category: text("category").unwrap_or_else(|| "Other".to_string()),
        payment_method,
        kind: TransactionType::Expense,
        receipt_url: None,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn drafts_are_always_expenses() {
        let draft = draft_from_answer(
            json!({
                "title": "Coopmart",
                "amount": 584300,
                "date": "2025-05-08",
                "description": "Milk, eggs, bread",
                "category": "Groceries",
                "paymentMethod": "CARD",
                "type": "INCOME",
            }),
            now(),
        )
        .unwrap();

        assert_eq!(draft.kind, TransactionType::Expense);
        assert_eq!(draft.payment_method, PaymentMethod::Card);
        assert_eq!(draft.amount, Decimal::new(584300, 0));
        assert_eq!(draft.date, Utc.with_ymd_and_hms(2025, 5, 8, 0, 0, 0).unwrap());
    }

    #[test]
    fn fenced_text_answers_are_unwrapped() {
        let answer = json!({ "text": "```json\n{\"title\":\"Cafe\",\"amount\":45000}\n```" });
        let draft = draft_from_answer(answer, now()).unwrap();
        assert_eq!(draft.title, "Cafe");
        assert_eq!(draft.date, now());
        assert_eq!(draft.payment_method, PaymentMethod::Cash);
        assert_eq!(draft.category, "Other");
    }

    #[test]
    fn empty_answers_mean_not_a_receipt() {
        assert!(matches!(draft_from_answer(json!({}), now()), Err(AppError::BadRequest(_))));
        assert!(matches!(
            draft_from_answer(json!({ "title": "x", "amount": 5_000_000_000u64 }), now()),
            Err(AppError::BadRequest(_))
        ));
    }
}
