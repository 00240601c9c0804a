//! In-memory repositories backing the unit tests.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    auth::AuthRepository,
    report::{Report, ReportRepository, ReportSetting},
    tx::{NewTransaction, Totals, Transaction, TransactionRepository, TransactionFilter, TransactionStatus, TransactionType},
    user::{NewUser, User},
    utils::{Pagination, RecordId},
};

#[derive(Default)]
pub struct MemoryAuthRepository {
    users: Mutex<Vec<User>>,
    tokens: Mutex<HashMap<String, (RecordId, DateTime<Utc>)>>,
    pub settings: Mutex<Vec<ReportSetting>>,
}

#[async_trait]
impl AuthRepository for MemoryAuthRepository {
    async fn create_user(&self, user: NewUser) -> Result<User, sqlx::Error> {
        let now = Utc::now();
        let created = User {
            id: RecordId::generate(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            profile_picture: None,
            created_at: now,
            updated_at: now,
        };

        self.settings
            .lock()
            .unwrap()
            .push(ReportSetting::initial(created.id.clone(), now));
        self.users.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|user| user.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: &RecordId) -> Result<Option<User>, sqlx::Error> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|user| &user.id == id).cloned())
    }

    async fn store_refresh_token(
        &self,
        user_id: &RecordId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        self.tokens
            .lock()
            .unwrap()
            .insert(token.to_string(), (user_id.clone(), expires_at));
        Ok(())
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<Option<RecordId>, sqlx::Error> {
        let entry = self.tokens.lock().unwrap().remove(token);
        Ok(entry
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .map(|(user_id, _)| user_id))
    }
}

/// Shares its settings with a [MemoryAuthRepository] so that registration and
/// report queries see the same data.
pub struct MemoryReportRepository {
    pub auth: std::sync::Arc<MemoryAuthRepository>,
    pub reports: Mutex<Vec<Report>>,
}

impl MemoryReportRepository {
    pub fn new(auth: std::sync::Arc<MemoryAuthRepository>) -> Self {
        Self {
            auth,
            reports: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ReportRepository for MemoryReportRepository {
    async fn find_setting(&self, user_id: &RecordId) -> Result<Option<ReportSetting>, sqlx::Error> {
        let settings = self.auth.settings.lock().unwrap();
        Ok(settings.iter().find(|setting| &setting.user_id == user_id).cloned())
    }

    async fn save_setting(&self, setting: &ReportSetting) -> Result<bool, sqlx::Error> {
        let mut settings = self.auth.settings.lock().unwrap();
        match settings
            .iter_mut()
            .find(|stored| stored.id == setting.id && stored.user_id == setting.user_id)
        {
            Some(stored) => {
                *stored = setting.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_reports(
        &self,
        user_id: &RecordId,
        page: Pagination,
    ) -> Result<(Vec<Report>, i64), sqlx::Error> {
        let mut owned: Vec<Report> = self
            .reports
            .lock()
            .unwrap()
            .iter()
            .filter(|report| &report.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = owned.len() as i64;
        let items = owned
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.page_size as usize)
            .collect();
        Ok((items, total))
    }
}

#[derive(Default)]
pub struct MemoryTransactionRepository {
    pub rows: Mutex<Vec<Transaction>>,
}

impl MemoryTransactionRepository {
    pub fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl TransactionRepository for MemoryTransactionRepository {
    async fn insert(&self, owner: &RecordId, transaction: NewTransaction) -> Result<Transaction, sqlx::Error> {
        let created = transaction.into_transaction(owner, Utc::now());
        self.rows.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn insert_many(
        &self,
        owner: &RecordId,
        transactions: Vec<NewTransaction>,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        let now = Utc::now();
        let created: Vec<Transaction> = transactions
            .into_iter()
            .map(|transaction| transaction.into_transaction(owner, now))
            .collect();
        self.rows.lock().unwrap().extend(created.iter().cloned());
        Ok(created)
    }

    async fn find(&self, owner: &RecordId, id: &RecordId) -> Result<Option<Transaction>, sqlx::Error> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .find(|row| &row.id == id && &row.user_id == owner)
            .cloned())
    }

    async fn list(
        &self,
        owner: &RecordId,
        filter: &TransactionFilter,
        page: Pagination,
    ) -> Result<(Vec<Transaction>, i64), sqlx::Error> {
        let mut matching: Vec<Transaction> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| &row.user_id == owner && filter.matches(row))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.page_size as usize)
            .collect();
        Ok((items, total))
    }

    async fn save(&self, owner: &RecordId, transaction: &Transaction) -> Result<bool, sqlx::Error> {
        let mut rows = self.rows.lock().unwrap();
        match rows
            .iter_mut()
            .find(|row| row.id == transaction.id && &row.user_id == owner)
        {
            Some(row) => {
                *row = Transaction {
                    user_id: row.user_id.clone(),
                    created_at: row.created_at,
                    last_processed: row.last_processed,
                    ..transaction.clone()
                };
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, owner: &RecordId, id: &RecordId) -> Result<bool, sqlx::Error> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|row| !(&row.id == id && &row.user_id == owner));
        Ok(rows.len() < before)
    }

    async fn delete_many(&self, owner: &RecordId, ids: &[RecordId]) -> Result<u64, sqlx::Error> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|row| !(&row.user_id == owner && ids.contains(&row.id)));
        Ok((before - rows.len()) as u64)
    }

    async fn totals(
        &self,
        owner: &RecordId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Totals, sqlx::Error> {
        let rows = self.rows.lock().unwrap();
        let mut totals = Totals::default();
        for row in rows.iter().filter(|row| {
            &row.user_id == owner
                && row.status == TransactionStatus::Completed
                && from.map_or(true, |from| row.date >= from)
                && to.map_or(true, |to| row.date < to)
        }) {
            match row.kind {
                TransactionType::Income => totals.income += row.amount,
                TransactionType::Expense => totals.expenses += row.amount,
            }
            totals.count += 1;
        }
        Ok(totals)
    }
}
