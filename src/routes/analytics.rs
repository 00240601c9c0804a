//! Dashboard summary: balance, income, expenses and savings rate over a date
//! range, compared against the period of equal length right before it.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::utils::AuthUser;
use crate::{
    db::{
        tx::{Totals, TransactionRepository},
        utils::RecordId,
    },
    error::{AppError, FieldError},
    validation::transaction::parse_date,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateRangePreset {
    #[serde(rename = "30days")]
    Last30Days,
    #[serde(rename = "7days")]
    Last7Days,
    #[serde(rename = "thisMonth")]
    ThisMonth,
    #[serde(rename = "lastMonth")]
    LastMonth,
    #[serde(rename = "last3Months")]
    Last3Months,
    #[serde(rename = "thisYear")]
    ThisYear,
    #[serde(rename = "lastYear")]
    LastYear,
    #[serde(rename = "allTime")]
    AllTime,
    #[serde(rename = "custom")]
    Custom,
}

/// Half-open window `[from, to)`; `None` bounds are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    #[serde(rename = "type")]
    pub preset: DateRangePreset,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
}

impl DateRange {
    pub fn resolve(preset: DateRangePreset, now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let month_start = today.with_day(1).unwrap_or(today);
        let year_start = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today);

        let (from, to) = match preset {
            DateRangePreset::Last30Days => (Some(now - Duration::days(30)), Some(now)),
            DateRangePreset::Last7Days => (Some(now - Duration::days(7)), Some(now)),
            DateRangePreset::ThisMonth => (midnight(month_start), Some(now)),
            DateRangePreset::LastMonth => (
                month_start.checked_sub_months(Months::new(1)).and_then(midnight),
                midnight(month_start),
            ),
            DateRangePreset::Last3Months => (
                month_start.checked_sub_months(Months::new(2)).and_then(midnight),
                Some(now),
            ),
            DateRangePreset::ThisYear => (midnight(year_start), Some(now)),
            DateRangePreset::LastYear => (
                year_start.checked_sub_months(Months::new(12)).and_then(midnight),
                midnight(year_start),
            ),
            DateRangePreset::AllTime | DateRangePreset::Custom => (None, None),
        };

        Self { preset, from, to }
    }

    /// `to` is inclusive of its whole day.
    pub fn custom(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            preset: DateRangePreset::Custom,
            from: Some(from),
            to: to.checked_add_days(Days::new(1)),
        }
    }

    /// The window of equal length ending where this one starts; `None` when
    /// unbounded or when it would start before year 1.
    pub fn previous(&self) -> Option<Self> {
        let (from, to) = (self.from?, self.to?);
        let start = from
            .checked_sub_signed(to.signed_duration_since(from))
            .filter(|start| start.year() >= 1)?;

        Some(Self {
            preset: self.preset,
            from: Some(start),
            to: Some(from),
        })
    }
}

/// Reads `preset`, `from` and `to` from the query string.
pub fn parse_range(
    preset: Option<&str>,
    from: Option<&str>,
    to: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DateRange, Vec<FieldError>> {
    let preset = match preset.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => DateRangePreset::Last30Days,
        Some(raw) => serde_json::from_value(serde_json::Value::String(raw.to_string()))
            .map_err(|_| vec![FieldError::new("preset", "Invalid date range preset")])?,
    };

    if preset != DateRangePreset::Custom {
        return Ok(DateRange::resolve(preset, now));
    }

    let mut errors = Vec::new();
    let mut bound = |field: &str, raw: Option<&str>| {
        let parsed = raw.and_then(parse_date);
        if parsed.is_none() {
            errors.push(FieldError::new(field, format!("{field} must be a valid date")));
        }
        parsed
    };
    let (from, to) = (bound("from", from), bound("to", to));

    match (from, to) {
        (Some(from), Some(to)) if from <= to => Ok(DateRange::custom(from, to)),
        (Some(_), Some(_)) => Err(vec![FieldError::new("to", "to must not be before from")]),
        _ => Err(errors),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingRate {
    pub percentage: Decimal,
    pub expense_ratio: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentageChange {
    pub income: Decimal,
    pub expenses: Decimal,
    pub balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub available_balance: Decimal,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub transaction_count: i64,
    pub saving_rate: SavingRate,
    pub percentage_change: PercentageChange,
    pub preset: DateRange,
}

fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    (part / whole * Decimal::ONE_HUNDRED).round_dp(2)
}

/// Growing from nothing counts as +100%.
fn percent_change(previous: Decimal, current: Decimal) -> Decimal {
    if previous.is_zero() {
        return if current.is_zero() {
            Decimal::ZERO
        } else {
            Decimal::ONE_HUNDRED
        };
    }
    ((current - previous) / previous.abs() * Decimal::ONE_HUNDRED).round_dp(2)
}

pub fn summarize(current: Totals, previous: Option<Totals>, range: DateRange) -> Summary {
    let balance = current.income - current.expenses;

    let percentage_change = match previous {
        Some(previous) => PercentageChange {
            income: percent_change(previous.income, current.income),
            expenses: percent_change(previous.expenses, current.expenses),
            balance: percent_change(previous.income - previous.expenses, balance),
        },
        None => PercentageChange {
            income: Decimal::ZERO,
            expenses: Decimal::ZERO,
            balance: Decimal::ZERO,
        },
    };

    Summary {
        available_balance: balance,
        total_income: current.income,
        total_expenses: current.expenses,
        transaction_count: current.count,
        saving_rate: SavingRate {
            percentage: percent_of(balance, current.income),
            expense_ratio: percent_of(current.expenses, current.income),
        },
        percentage_change,
        preset: range,
    }
}

pub struct AnalyticsService {
    repo: Arc<dyn TransactionRepository>,
}

impl AnalyticsService {
    pub fn new(repo: Arc<dyn TransactionRepository>) -> Self {
        Self { repo }
    }

    pub async fn summary(&self, owner: &RecordId, range: DateRange) -> Result<Summary, AppError> {
        let current = self.repo.totals(owner, range.from, range.to).await?;
        let previous = match range.previous() {
            Some(previous) => Some(self.repo.totals(owner, previous.from, previous.to).await?),
            None => None,
        };

        Ok(summarize(current, previous, range))
    }
}

async fn summary(
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    State(service): State<Arc<AnalyticsService>>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let param = |name: &str| query.get(name).map(String::as_str);
    let range = parse_range(param("preset"), param("from"), param("to"), Utc::now()).map_err(AppError::Validation)?;

    let summary = service.summary(&user_id, range).await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Summary fetched successfully", "data": summary })),
    ))
}

pub fn analytics_routes(service: Arc<AnalyticsService>) -> Router {
    Router::new()
        .route("/analytics/summary", get(summary))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::db::{
        memory::MemoryTransactionRepository,
        tx::{NewTransaction, PaymentMethod, TransactionStatus, TransactionType},
    };

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn calendar_presets_align_to_month_and_year_starts() {
        let now = Utc.with_ymd_and_hms(2025, 3, 15, 10, 0, 0).unwrap();

        let last_month = DateRange::resolve(DateRangePreset::LastMonth, now);
        assert_eq!(last_month.from, Some(at(2025, 2, 1)));
        assert_eq!(last_month.to, Some(at(2025, 3, 1)));

        let last_three = DateRange::resolve(DateRangePreset::Last3Months, now);
        assert_eq!(last_three.from, Some(at(2025, 1, 1)));

        let last_year = DateRange::resolve(DateRangePreset::LastYear, now);
        assert_eq!(last_year.from, Some(at(2024, 1, 1)));
        assert_eq!(last_year.to, Some(at(2025, 1, 1)));

        assert_eq!(DateRange::resolve(DateRangePreset::AllTime, now).previous(), None);
    }

    #[test]
    fn previous_window_has_the_same_length() {
        let range = DateRange::custom(at(2025, 5, 11), at(2025, 5, 20));
        let previous = range.previous().unwrap();
        assert_eq!(previous.from, Some(at(2025, 5, 1)));
        assert_eq!(previous.to, Some(at(2025, 5, 11)));
    }

    #[test]
    fn extreme_custom_bounds_are_rejected() {
        let errors = parse_range(Some("custom"), Some("-200000-01-01"), Some("+200000-01-01"), Utc::now()).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|error| error.field.as_str()).collect();
        assert_eq!(fields, vec!["from", "to"]);

        let widest = DateRange::custom(at(1, 1, 1), at(9999, 12, 31));
        assert_eq!(widest.previous(), None);
    }

    #[test]
    fn range_query_is_validated() {
        let now = Utc::now();
        assert_eq!(parse_range(None, None, None, now).unwrap().preset, DateRangePreset::Last30Days);
        assert_eq!(parse_range(Some("thisYear"), None, None, now).unwrap().preset, DateRangePreset::ThisYear);
        assert_eq!(parse_range(Some("forever"), None, None, now).unwrap_err()[0].field, "preset");

        let errors = parse_range(Some("custom"), Some("2025-01-01"), None, now).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "to");

        let errors = parse_range(Some("custom"), Some("2025-02-01"), Some("2025-01-01"), now).unwrap_err();
        assert_eq!(errors[0].field, "to");
    }

    #[test]
    fn rates_and_changes_round_to_two_places() {
        let current = Totals {
            income: Decimal::new(3000, 0),
            expenses: Decimal::new(1000, 0),
            count: 3,
        };
        let previous = Totals {
            income: Decimal::new(2000, 0),
            expenses: Decimal::ZERO,
            count: 1,
        };

        let summary = summarize(current, Some(previous), DateRange::resolve(DateRangePreset::AllTime, Utc::now()));
        assert_eq!(summary.available_balance, Decimal::new(2000, 0));
        assert_eq!(summary.saving_rate.percentage, Decimal::new(6667, 2));
        assert_eq!(summary.saving_rate.expense_ratio, Decimal::new(3333, 2));
        assert_eq!(summary.percentage_change.income, Decimal::new(50, 0));
        assert_eq!(summary.percentage_change.expenses, Decimal::ONE_HUNDRED);
        assert_eq!(summary.percentage_change.balance, Decimal::ZERO);
    }

    #[test]
    fn no_income_means_zero_rates() {
        let summary = summarize(
            Totals {
                income: Decimal::ZERO,
                expenses: Decimal::new(500, 0),
                count: 1,
            },
            None,
            DateRange::resolve(DateRangePreset::AllTime, Utc::now()),
        );
        assert_eq!(summary.available_balance, Decimal::new(-500, 0));
        assert_eq!(summary.saving_rate.percentage, Decimal::ZERO);
        assert_eq!(summary.saving_rate.expense_ratio, Decimal::ZERO);
    }

    #[tokio::test]
    async fn summary_counts_completed_transactions_in_range() {
        let repo = Arc::new(MemoryTransactionRepository::default());
        let owner = RecordId::generate();
        let entry = |kind, amount: i64, status, date| NewTransaction {
            kind,
            title: "entry".to_string(),
            amount: Decimal::new(amount, 0),
            category: "General".to_string(),
            description: None,
            receipt_url: None,
            date,
            is_recurring: false,
            recurring_interval: None,
            status,
            payment_method: PaymentMethod::Cash,
        };

        for transaction in [
            entry(TransactionType::Income, 1000, TransactionStatus::Completed, at(2025, 5, 12)),
            entry(TransactionType::Expense, 250, TransactionStatus::Completed, at(2025, 5, 13)),
            entry(TransactionType::Expense, 900, TransactionStatus::Pending, at(2025, 5, 14)),
            entry(TransactionType::Income, 500, TransactionStatus::Completed, at(2025, 5, 2)),
        ] {
            repo.insert(&owner, transaction).await.unwrap();
        }

        let service = AnalyticsService::new(repo);
        let summary = service
            .summary(&owner, DateRange::custom(at(2025, 5, 11), at(2025, 5, 20)))
            .await
            .unwrap();

        assert_eq!(summary.total_income, Decimal::new(1000, 0));
        assert_eq!(summary.total_expenses, Decimal::new(250, 0));
        assert_eq!(summary.transaction_count, 2);
        assert_eq!(summary.saving_rate.percentage, Decimal::new(75, 0));
        assert_eq!(summary.percentage_change.income, Decimal::ONE_HUNDRED);
    }
}
