//! Poster records and the generation settlement transaction

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};

use super::users::query_user;
use super::{from_millis, now_millis, to_millis, Database, StoreError};
use crate::billing::{evaluate, Debit, Decision, DenialReason, EntitlementRecord, Operation};
use crate::generation::{Poster, PosterStatus};

const POSTER_COLUMNS: &str = "id, user_id, request_id, title, event_type, description, prompt,
    image_url, storage_path, style, size, width, height, model, status, created_at, updated_at";

/// Outcome of inserting a pending poster
#[derive(Debug)]
pub enum PendingInsert {
    Inserted,
    /// The owner already has a poster under this request id
    Existing(Poster),
}

/// Outcome of settling a pending generation
#[derive(Debug)]
pub enum Settlement {
    /// Debit applied and poster completed, in one transaction
    Completed {
        record: EntitlementRecord,
        poster: Poster,
    },
    /// The current record no longer allows the generation; nothing changed
    Denied(DenialReason),
    /// The poster is missing or was already settled
    NotPending,
    UserMissing,
}

fn poster_from_row(row: &Row<'_>) -> rusqlite::Result<Poster> {
    Ok(Poster {
        id: row.get(0)?,
        user_id: row.get(1)?,
        request_id: row.get(2)?,
        title: row.get(3)?,
        event_type: row.get(4)?,
        description: row.get(5)?,
        prompt: row.get(6)?,
        image_url: row.get(7)?,
        storage_path: row.get(8)?,
        style: row.get(9)?,
        size: row.get(10)?,
        width: row.get(11)?,
        height: row.get(12)?,
        model: row.get(13)?,
        status: row.get(14)?,
        created_at: from_millis(row.get(15)?),
        updated_at: from_millis(row.get(16)?),
    })
}

fn query_poster(conn: &Connection, poster_id: &str) -> Result<Option<Poster>, StoreError> {
    let sql = format!("SELECT {} FROM posters WHERE id = ?1", POSTER_COLUMNS);
    Ok(conn
        .query_row(&sql, params![poster_id], poster_from_row)
        .optional()?)
}

fn query_poster_by_request(
    conn: &Connection,
    user_id: &str,
    request_id: &str,
) -> Result<Option<Poster>, StoreError> {
    let sql = format!(
        "SELECT {} FROM posters WHERE user_id = ?1 AND request_id = ?2",
        POSTER_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![user_id, request_id], poster_from_row)
        .optional()?)
}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl Database {
    /// Insert `poster` as pending.
    ///
    /// When the owner already has a poster with the same request id the
    /// existing one is returned instead.
    pub fn insert_pending_poster(&self, poster: &Poster) -> Result<PendingInsert, StoreError> {
        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT INTO posters (id, user_id, request_id, title, event_type, description,
                prompt, image_url, storage_path, style, size, width, height, model, status,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                poster.id,
                poster.user_id,
                poster.request_id,
                poster.title,
                poster.event_type,
                poster.description,
                poster.prompt,
                poster.image_url,
                poster.storage_path,
                poster.style,
                poster.size,
                poster.width,
                poster.height,
                poster.model,
                PosterStatus::Pending,
                to_millis(poster.created_at),
                to_millis(poster.updated_at),
            ],
        );

        match inserted {
            Ok(_) => Ok(PendingInsert::Inserted),
            Err(e) if is_constraint_violation(&e) => match poster.request_id.as_deref() {
                Some(request_id) => query_poster_by_request(&conn, &poster.user_id, request_id)?
                    .map(PendingInsert::Existing)
                    .ok_or(StoreError::Sqlite(e)),
                None => Err(StoreError::Sqlite(e)),
            },
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_poster_by_request(
        &self,
        user_id: &str,
        request_id: &str,
    ) -> Result<Option<Poster>, StoreError> {
        let conn = self.lock();
        query_poster_by_request(&conn, user_id, request_id)
    }

    /// Apply the debit for a pending poster and mark it completed.
    ///
    /// Runs under an immediate transaction: the record is re-evaluated
    /// against its current state, metered users are debited with a
    /// conditional decrement, and the poster flips to completed. Either all
    /// of it commits or none of it does.
    pub fn settle_generation(
        &self,
        poster_id: &str,
        user_id: &str,
    ) -> Result<Settlement, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(record) = query_user(&tx, user_id)? else {
            return Ok(Settlement::UserMissing);
        };

        let status: Option<PosterStatus> = tx
            .query_row(
                "SELECT status FROM posters WHERE id = ?1 AND user_id = ?2",
                params![poster_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        if status != Some(PosterStatus::Pending) {
            return Ok(Settlement::NotPending);
        }

        let now = now_millis();
        match evaluate(&record, Operation::GeneratePoster) {
            Decision::Denied { reason } => return Ok(Settlement::Denied(reason)),
            Decision::Allowed {
                debit: Debit::Credit,
            } => {
                let debited = tx.execute(
                    "UPDATE users
                     SET credits = credits - 1,
                         total_generations = total_generations + 1,
                         updated_at = ?2
                     WHERE id = ?1 AND credits > 0",
                    params![user_id, now],
                )?;
                if debited == 0 {
                    return Ok(Settlement::Denied(DenialReason::InsufficientCredits {
                        plan: record.plan,
                    }));
                }
            }
            Decision::Allowed {
                debit: Debit::CounterOnly,
            } => {
                tx.execute(
                    "UPDATE users
                     SET total_generations = total_generations + 1,
                         updated_at = ?2
                     WHERE id = ?1",
                    params![user_id, now],
                )?;
            }
        }

        tx.execute(
            "UPDATE posters SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![poster_id, PosterStatus::Completed, now],
        )?;

        let record = query_user(&tx, user_id)?
            .ok_or_else(|| StoreError::Inconsistent(format!("user {} vanished", user_id)))?;
        let poster = query_poster(&tx, poster_id)?
            .ok_or_else(|| StoreError::Inconsistent(format!("poster {} vanished", poster_id)))?;
        tx.commit()?;

        info!(
            user_id,
            poster_id,
            credits = record.credits,
            total_generations = record.total_generations,
            "Generation settled"
        );
        Ok(Settlement::Completed { record, poster })
    }

    /// Remove a poster that never settled. Completed posters are left alone.
    pub fn discard_pending_poster(&self, poster_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM posters WHERE id = ?1 AND status = ?2",
            params![poster_id, PosterStatus::Pending],
        )?;
        Ok(removed > 0)
    }

    /// Completed posters of `user_id`, newest first
    pub fn list_posters(&self, user_id: &str, limit: usize) -> Result<Vec<Poster>, StoreError> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {} FROM posters
             WHERE user_id = ?1 AND status = ?2
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3",
            POSTER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let posters = stmt
            .query_map(
                params![user_id, PosterStatus::Completed, limit as i64],
                poster_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(posters)
    }

    /// One completed poster, only if owned by `user_id`
    pub fn get_poster(&self, user_id: &str, poster_id: &str) -> Result<Option<Poster>, StoreError> {
        let conn = self.lock();
        Ok(query_poster(&conn, poster_id)?
            .filter(|p| p.user_id == user_id && p.status == PosterStatus::Completed))
    }

    /// Delete a poster owned by `user_id`, returning what was removed
    pub fn delete_poster(
        &self,
        user_id: &str,
        poster_id: &str,
    ) -> Result<Option<Poster>, StoreError> {
        let conn = self.lock();
        let Some(poster) = query_poster(&conn, poster_id)?.filter(|p| p.user_id == user_id) else {
            return Ok(None);
        };
        conn.execute(
            "DELETE FROM posters WHERE id = ?1 AND user_id = ?2",
            params![poster_id, user_id],
        )?;
        debug!(user_id, poster_id, "Deleted poster");
        Ok(Some(poster))
    }

    /// Pending posters created before `cutoff`
    pub fn stale_pending_posters(&self, cutoff: DateTime<Utc>) -> Result<Vec<Poster>, StoreError> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {} FROM posters WHERE status = ?1 AND created_at < ?2 ORDER BY created_at",
            POSTER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let posters = stmt
            .query_map(
                params![PosterStatus::Pending, to_millis(cutoff)],
                poster_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(posters)
    }
}
