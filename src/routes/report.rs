use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::utils::{AppJson, AuthUser};
use crate::{
    db::{
        report::{Report, ReportRepository, ReportSetting},
        utils::{Page, Pagination, RecordId},
    },
    error::AppError,
    validation::report::{parse_setting_update, ReportSettingUpdate},
};

pub struct ReportService {
    repo: Arc<dyn ReportRepository>,
}

impl ReportService {
    pub fn new(repo: Arc<dyn ReportRepository>) -> Self {
        Self { repo }
    }

    pub async fn list(&self, owner: &RecordId, pagination: Pagination) -> Result<Page<Report>, AppError> {
        let (items, total) = self.repo.list_reports(owner, pagination).await?;
        Ok(Page::new(items, total, pagination))
    }

    /// Disabling clears the schedule; enabling reschedules from `now`.
    pub async fn update_setting(
        &self,
        owner: &RecordId,
        update: ReportSettingUpdate,
        now: DateTime<Utc>,
    ) -> Result<ReportSetting, AppError> {
        let mut setting = self
            .repo
            .find_setting(owner)
            .await?
            .ok_or_else(|| AppError::not_found("Report setting not found"))?;

        if let Some(frequency) = update.frequency {
            setting.frequency = frequency;
        }
        setting.is_enabled = update.is_enabled;
        setting.next_report_date = update
            .is_enabled
            .then(|| setting.frequency.next_report_date(now));
        setting.updated_at = now;

        if !self.repo.save_setting(&setting).await? {
            return Err(AppError::not_found("Report setting not found"));
        }
        tracing::info!(
            "report setting for user {} is now {:?} (enabled: {})",
            owner,
            setting.frequency,
            setting.is_enabled
        );
        Ok(setting)
    }
}

async fn list_reports(
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    State(service): State<Arc<ReportService>>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let pagination = Pagination::from_query(
        query.get("pageSize").map(String::as_str),
        query.get("pageNumber").map(String::as_str),
    );
    let reports = service.list(&user_id, pagination).await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Reports history fetched successfully", "reports": reports })),
    ))
}

async fn update_report_setting(
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    State(service): State<Arc<ReportService>>,
    AppJson(body): AppJson<Value>,
) -> Result<impl IntoResponse, AppError> {
    let update = parse_setting_update(&body).map_err(AppError::Validation)?;
    let setting = service.update_setting(&user_id, update, Utc::now()).await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Reports setting updated successfully", "reportSetting": setting })),
    ))
}

pub fn report_routes(service: Arc<ReportService>) -> Router {
    Router::new()
        .route("/report/all", get(list_reports))
        .route("/report/update-setting", put(update_report_setting))
        .with_state(service)
}
