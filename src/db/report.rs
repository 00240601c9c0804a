use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use super::utils::{Pagination, RecordId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportFrequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl ReportFrequency {
    /// Midnight (UTC) of the first day of the next reporting period after `from`.
    pub fn next_report_date(self, from: DateTime<Utc>) -> DateTime<Utc> {
        let today = from.date_naive();
        let next = match self {
            Self::Daily => today.checked_add_days(Days::new(1)),
            Self::Weekly => today.checked_add_days(Days::new(7)),
            Self::Monthly => first_of_month(today.year(), today.month() + 1),
            Self::Quarterly => {
                let quarter_start = (today.month0() / 3) * 3 + 1;
                first_of_month(today.year(), quarter_start + 3)
            }
            Self::Yearly => NaiveDate::from_ymd_opt(today.year() + 1, 1, 1),
        };

        next.and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .unwrap_or(from)
    }
}

// `month` may overflow into the next year (13 => January).
fn first_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (year, month) = if month > 12 {
        (year + 1, month - 12)
    } else {
        (year, month)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReportSetting {
    pub id: RecordId,
    pub user_id: RecordId,
    pub frequency: ReportFrequency,
    pub is_enabled: bool,
    pub next_report_date: Option<DateTime<Utc>>,
    pub last_sent_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportSetting {
    /// Setting every new account starts with.
    pub fn initial(user_id: RecordId, now: DateTime<Utc>) -> Self {
        let frequency = ReportFrequency::Monthly;
        Self {
            id: RecordId::generate(),
            user_id,
            frequency,
            is_enabled: true,
            next_report_date: Some(frequency.next_report_date(now)),
            last_sent_date: now,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: RecordId,
    pub user_id: RecordId,
    pub period: String,
    pub send_date: DateTime<Utc>,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn find_setting(&self, user_id: &RecordId) -> Result<Option<ReportSetting>, sqlx::Error>;

    /// Persists frequency, enabled flag and next report date of the user's setting.
    async fn save_setting(&self, setting: &ReportSetting) -> Result<bool, sqlx::Error>;

    async fn list_reports(
        &self,
        user_id: &RecordId,
        page: Pagination,
    ) -> Result<(Vec<Report>, i64), sqlx::Error>;
}

pub struct PgReportRepository {
    pool: PgPool,
}

impl PgReportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportRepository for PgReportRepository {
    async fn find_setting(&self, user_id: &RecordId) -> Result<Option<ReportSetting>, sqlx::Error> {
        sqlx::query_as::<_, ReportSetting>(
            r#"
            SELECT id, user_id, frequency, is_enabled, next_report_date, last_sent_date, created_at, updated_at
            FROM report_settings
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn save_setting(&self, setting: &ReportSetting) -> Result<bool, sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE report_settings
            SET frequency = $1, is_enabled = $2, next_report_date = $3, updated_at = $4
            WHERE id = $5 AND user_id = $6
            "#,
        )
        .bind(setting.frequency)
        .bind(setting.is_enabled)
        .bind(setting.next_report_date)
        .bind(setting.updated_at)
        .bind(&setting.id)
        .bind(&setting.user_id)
        .execute(&self.pool)
        .await
        .map(|result| result.rows_affected() > 0)
    }

    async fn list_reports(
        &self,
        user_id: &RecordId,
        page: Pagination,
    ) -> Result<(Vec<Report>, i64), sqlx::Error> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reports WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let reports = sqlx::query_as::<_, Report>(
            r#"
            SELECT id, user_id, period, send_date, status, created_at, updated_at
            FROM reports
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok((reports, total))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 15, 30, 0).unwrap()
    }

    #[test]
    fn monthly_reports_start_on_the_first_of_next_month() {
        let next = ReportFrequency::Monthly.next_report_date(at(2025, 12, 20));
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn quarterly_reports_start_on_the_next_quarter() {
        let next = ReportFrequency::Quarterly.next_report_date(at(2025, 5, 8));
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap());

        let next = ReportFrequency::Quarterly.next_report_date(at(2025, 11, 2));
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn daily_weekly_and_yearly_reports() {
        assert_eq!(
            ReportFrequency::Daily.next_report_date(at(2025, 2, 28)),
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            ReportFrequency::Weekly.next_report_date(at(2025, 2, 28)),
            Utc.with_ymd_and_hms(2025, 3, 7, 0, 0, 0).unwrap()
        );
        assert_eq!(
            ReportFrequency::Yearly.next_report_date(at(2025, 2, 28)),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn initial_setting_is_enabled_and_monthly() {
        let now = at(2025, 5, 8);
        let setting = ReportSetting::initial(RecordId::generate(), now);
        assert!(setting.is_enabled);
        assert_eq!(setting.frequency, ReportFrequency::Monthly);
        assert_eq!(setting.last_sent_date, now);
    }
}
