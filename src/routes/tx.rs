use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use super::utils::{AppJson, AuthUser};
use crate::{
    db::{
        tx::{NewTransaction, Transaction, TransactionFilter, TransactionRepository, TransactionStatus},
        utils::{Page, Pagination, RecordId},
    },
    error::AppError,
    receipt::{self, ReceiptDraft, ReceiptScanner, MAX_RECEIPT_BYTES},
    validation::transaction::{
        parse_bulk_create, parse_bulk_delete, parse_create, parse_filter, parse_transaction_id, parse_update,
        TransactionPatch,
    },
};

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteResult {
    pub deleted_count: u64,
    pub skipped_count: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BulkCreateResult {
    pub inserted_count: usize,
    pub transaction_ids: Vec<RecordId>,
}

/// Owner-scoped transaction operations.
pub struct TransactionService {
    repo: Arc<dyn TransactionRepository>,
}

impl TransactionService {
    pub fn new(repo: Arc<dyn TransactionRepository>) -> Self {
        Self { repo }
    }

    pub async fn create(&self, owner: &RecordId, transaction: NewTransaction) -> Result<Transaction, AppError> {
        let created = self.repo.insert(owner, transaction).await?;
        tracing::info!("transaction {} created for user {}", created.id, owner);
        Ok(created)
    }

    pub async fn list(
        &self,
        owner: &RecordId,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<Page<Transaction>, AppError> {
        let (items, total) = self.repo.list(owner, filter, pagination).await?;
        Ok(Page::new(items, total, pagination))
    }

    pub async fn get(&self, owner: &RecordId, id: &RecordId) -> Result<Transaction, AppError> {
        self.repo
            .find(owner, id)
            .await?
            .ok_or_else(|| AppError::not_found("Transaction not found"))
    }

    /// Copies the business fields into a new pending, non-recurring transaction.
    pub async fn duplicate(&self, owner: &RecordId, id: &RecordId) -> Result<Transaction, AppError> {
        let source = self.get(owner, id).await?;

        let copy = NewTransaction {
            kind: source.kind,
            title: format!("Duplicate - {}", source.title),
            amount: source.amount,
            category: source.category,
            description: Some(match source.description {
                Some(description) => format!("{description} (Duplicate)"),
                None => "Duplicated transaction".to_string(),
            }),
            receipt_url: source.receipt_url,
            date: source.date,
            is_recurring: false,
            recurring_interval: None,
            status: TransactionStatus::Pending,
            payment_method: source.payment_method,
        };

        let created = self.repo.insert(owner, copy).await?;
        tracing::info!("transaction {} duplicated as {}", id, created.id);
        Ok(created)
    }

    pub async fn update(&self, owner: &RecordId, id: &RecordId, patch: TransactionPatch) -> Result<Transaction, AppError> {
        let mut transaction = self.get(owner, id).await?;
        patch.apply(&mut transaction);
        transaction.updated_at = Utc::now();

        if !self.repo.save(owner, &transaction).await? {
            return Err(AppError::not_found("Transaction not found"));
        }
        Ok(transaction)
    }

    pub async fn delete(&self, owner: &RecordId, id: &RecordId) -> Result<(), AppError> {
        if !self.repo.delete(owner, id).await? {
            return Err(AppError::not_found("Transaction not found"));
        }
        tracing::info!("transaction {} deleted by user {}", id, owner);
        Ok(())
    }

    /// Ids that are missing or belong to someone else are skipped, not failed.
    pub async fn bulk_delete(&self, owner: &RecordId, ids: &[RecordId]) -> Result<BulkDeleteResult, AppError> {
        let deleted_count = self.repo.delete_many(owner, ids).await?;
        let result = BulkDeleteResult {
            deleted_count,
            skipped_count: (ids.len() as u64).saturating_sub(deleted_count),
        };
        tracing::info!(
            "bulk delete for user {}: {} deleted, {} skipped",
            owner,
            result.deleted_count,
            result.skipped_count
        );
        Ok(result)
    }

    pub async fn bulk_create(
        &self,
        owner: &RecordId,
        transactions: Vec<NewTransaction>,
    ) -> Result<BulkCreateResult, AppError> {
        let created = self.repo.insert_many(owner, transactions).await?;
        tracing::info!("bulk insert for user {}: {} transactions", owner, created.len());

        Ok(BulkCreateResult {
            inserted_count: created.len(),
            transaction_ids: created.into_iter().map(|transaction| transaction.id).collect(),
        })
    }

    pub async fn scan_receipt(
        &self,
        scanner: &dyn ReceiptScanner,
        image: &receipt::ReceiptImage,
    ) -> Result<ReceiptDraft, AppError> {
        let answer = scanner.scan(image).await?;
        receipt::draft_from_answer(answer, Utc::now())
    }
}

pub type TxState = (Arc<TransactionService>, Option<Arc<dyn ReceiptScanner>>);

async fn create_transaction(
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    State((service, _)): State<TxState>,
    AppJson(body): AppJson<Value>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = parse_create(&body).map_err(AppError::Validation)?;
    let transaction = service.create(&user_id, transaction).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Transaction created successfully", "transaction": transaction })),
    ))
}

async fn bulk_create_transactions(
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    State((service, _)): State<TxState>,
    AppJson(body): AppJson<Value>,
) -> Result<impl IntoResponse, AppError> {
    let transactions = parse_bulk_create(&body).map_err(AppError::Validation)?;
    let result = service.bulk_create(&user_id, transactions).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "Bulk transactions inserted successfully",
            "insertedCount": result.inserted_count,
            "transactionIds": result.transaction_ids,
        })),
    ))
}

async fn duplicate_transaction(
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    State((service, _)): State<TxState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_transaction_id(&id).map_err(AppError::Validation)?;
    let transaction = service.duplicate(&user_id, &id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Transaction duplicated successfully", "data": transaction })),
    ))
}

async fn update_transaction(
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    State((service, _)): State<TxState>,
    Path(id): Path<String>,
    AppJson(body): AppJson<Value>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_transaction_id(&id).map_err(AppError::Validation)?;
    let patch = parse_update(&body).map_err(AppError::Validation)?;
    service.update(&user_id, &id, patch).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Transaction updated successfully" })),
    ))
}

async fn list_transactions(
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    State((service, _)): State<TxState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let param = |name: &str| query.get(name).map(String::as_str);

    let filter = parse_filter(param("keyword"), param("type"), param("recurringStatus"))
        .map_err(AppError::Validation)?;
    let pagination = Pagination::from_query(param("pageSize"), param("pageNumber"));
    let page = service.list(&user_id, &filter, pagination).await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Transactions retrieved successfully", "transactions": page })),
    ))
}

async fn get_transaction(
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    State((service, _)): State<TxState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_transaction_id(&id).map_err(AppError::Validation)?;
    let transaction = service.get(&user_id, &id).await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Transaction retrieved successfully", "transaction": transaction })),
    ))
}

async fn delete_transaction(
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    State((service, _)): State<TxState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_transaction_id(&id).map_err(AppError::Validation)?;
    service.delete(&user_id, &id).await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Transaction deleted successfully" })),
    ))
}

async fn bulk_delete_transactions(
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    State((service, _)): State<TxState>,
    AppJson(body): AppJson<Value>,
) -> Result<impl IntoResponse, AppError> {
    let ids = parse_bulk_delete(&body).map_err(AppError::Validation)?;
    let result = service.bulk_delete(&user_id, &ids).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "Transactions deleted successfully",
            "deletedCount": result.deleted_count,
            "skippedCount": result.skipped_count,
        })),
    ))
}

async fn scan_receipt(
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    State((service, scanner)): State<TxState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let image = receipt::read_upload(multipart).await?;
    let scanner = scanner.ok_or_else(|| AppError::bad_request("Receipt scanning is not configured"))?;

    tracing::info!("scanning {} byte receipt for user {}", image.bytes.len(), user_id);
    let draft = service.scan_receipt(scanner.as_ref(), &image).await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Receipt scanned successfully", "data": draft })),
    ))
}

pub fn tx_routes(service: Arc<TransactionService>, scanner: Option<Arc<dyn ReceiptScanner>>) -> Router {
    Router::new()
        .route("/transaction/create", post(create_transaction))
        .route("/transaction/bulk-transaction", post(bulk_create_transactions))
        .route(
            "/transaction/scan-receipt",
            // leave room for the multipart framing around the image
            post(scan_receipt).layer(DefaultBodyLimit::max(MAX_RECEIPT_BYTES + 64 * 1024)),
        )
        .route("/transaction/duplicate/:id", put(duplicate_transaction))
        .route("/transaction/update/:id", put(update_transaction))
        .route("/transaction/all", get(list_transactions))
        .route("/transaction/:id", get(get_transaction))
        .route("/transaction/delete/:id", delete(delete_transaction))
        .route("/transaction/bulk-delete", delete(bulk_delete_transactions))
        .with_state((service, scanner))
}
