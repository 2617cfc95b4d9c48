//! Entitlement record queries

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use super::{from_millis, now_millis, to_millis, Database, StoreError};
use crate::billing::EntitlementRecord;

const USER_COLUMNS: &str = "id, email, name, plan, credits, total_generations, is_admin,
    billing_status, stripe_customer_id, stripe_subscription_id, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<EntitlementRecord> {
    let total_generations: i64 = row.get(5)?;
    Ok(EntitlementRecord {
        user_id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        plan: row.get(3)?,
        credits: row.get(4)?,
        total_generations: total_generations.max(0) as u64,
        is_admin: row.get(6)?,
        billing_status: row.get(7)?,
        stripe_customer_id: row.get(8)?,
        stripe_subscription_id: row.get(9)?,
        created_at: from_millis(row.get(10)?),
        updated_at: from_millis(row.get(11)?),
    })
}

pub(super) fn query_user(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<EntitlementRecord>, StoreError> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    Ok(conn
        .query_row(&sql, params![user_id], user_from_row)
        .optional()?)
}

pub(super) fn query_user_by_customer(
    conn: &Connection,
    customer_id: &str,
) -> Result<Option<EntitlementRecord>, StoreError> {
    let sql = format!(
        "SELECT {} FROM users WHERE stripe_customer_id = ?1 LIMIT 1",
        USER_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![customer_id], user_from_row)
        .optional()?)
}

fn insert_record(conn: &Connection, record: &EntitlementRecord) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO users (id, email, name, plan, credits, total_generations,
            is_admin, billing_status, stripe_customer_id, stripe_subscription_id,
            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.user_id,
            record.email,
            record.name,
            record.plan,
            record.credits,
            record.total_generations as i64,
            record.is_admin,
            record.billing_status,
            record.stripe_customer_id,
            record.stripe_subscription_id,
            to_millis(record.created_at),
            to_millis(record.updated_at),
        ],
    )
}

impl Database {
    pub fn get_user(&self, user_id: &str) -> Result<Option<EntitlementRecord>, StoreError> {
        let conn = self.lock();
        query_user(&conn, user_id)
    }

    /// Provision the signup record for `user_id` unless one exists.
    ///
    /// Returns the stored record and whether it was created by this call.
    /// An existing record is returned untouched.
    pub fn create_user_if_absent(
        &self,
        user_id: &str,
        email: Option<String>,
        name: Option<String>,
    ) -> Result<(EntitlementRecord, bool), StoreError> {
        let conn = self.lock();
        let created = insert_record(&conn, &EntitlementRecord::signup(user_id, email, name))? > 0;
        if created {
            info!(user_id, "Provisioned entitlement record");
        }

        let record = query_user(&conn, user_id)?
            .ok_or_else(|| StoreError::Inconsistent(format!("user {} vanished", user_id)))?;
        Ok((record, created))
    }

    /// Set the admin override. `None` when the user does not exist.
    pub fn set_admin(
        &self,
        user_id: &str,
        is_admin: bool,
    ) -> Result<Option<EntitlementRecord>, StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE users SET is_admin = ?2, updated_at = ?3 WHERE id = ?1",
            params![user_id, is_admin, now_millis()],
        )?;
        if changed == 0 {
            return Ok(None);
        }

        info!(user_id, is_admin, "Updated admin flag");
        query_user(&conn, user_id)
    }

    /// Insert a fully specified record, for tests that need a given plan
    #[cfg(test)]
    pub fn insert_user(&self, record: &EntitlementRecord) -> Result<(), StoreError> {
        let conn = self.lock();
        insert_record(&conn, record)?;
        Ok(())
    }
}
