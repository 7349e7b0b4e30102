//! Contact form inbox: public submission, admin read/reply/delete.

use crate::{
    models::contact::{ContactMessage, MessageFilter, MessageStats, NewContactMessage},
    services::image_repository::{RepositoryError, RepositoryResult},
};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

const CONTACT_COLUMNS: &str = "id, name, email, subject, message, is_read, replied_at, created_at";

const NAME_CHARS: (usize, usize) = (2, 100);
const SUBJECT_MAX_CHARS: usize = 200;
const MESSAGE_CHARS: (usize, usize) = (10, 5000);
const EMAIL_MAX_LEN: usize = 254;

#[derive(Clone)]
pub struct ContactService {
    db: SqlitePool,
}

impl ContactService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Validate and store a submission as unread.
    pub async fn submit(&self, new: NewContactMessage) -> RepositoryResult<ContactMessage> {
        let new = validate(new)?;
        let message = sqlx::query_as::<_, ContactMessage>(&format!(
            "INSERT INTO contacts (id, name, email, subject, message, is_read, replied_at, created_at) \
             VALUES (?, ?, ?, ?, ?, 0, NULL, ?) RETURNING {CONTACT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.subject)
        .bind(&new.message)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await?;
        info!(message_id = %message.id, "contact message received");
        Ok(message)
    }

    /// Newest first.
    pub async fn list(&self, filter: MessageFilter) -> RepositoryResult<Vec<ContactMessage>> {
        let condition = match filter {
            MessageFilter::All => "1 = 1",
            MessageFilter::Unread => "is_read = 0",
            MessageFilter::Replied => "replied_at IS NOT NULL",
        };
        let messages = sqlx::query_as::<_, ContactMessage>(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE {condition} \
             ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(messages)
    }

    pub async fn get(&self, id: Uuid) -> RepositoryResult<ContactMessage> {
        sqlx::query_as::<_, ContactMessage>(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(RepositoryError::MessageNotFound(id))
    }

    pub async fn set_read(&self, id: Uuid, is_read: bool) -> RepositoryResult<ContactMessage> {
        sqlx::query_as::<_, ContactMessage>(&format!(
            "UPDATE contacts SET is_read = ? WHERE id = ? RETURNING {CONTACT_COLUMNS}"
        ))
        .bind(is_read)
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(RepositoryError::MessageNotFound(id))
    }

    /// Stamp `replied_at`; a replied message is also read.
    pub async fn mark_replied(&self, id: Uuid) -> RepositoryResult<ContactMessage> {
        let message = sqlx::query_as::<_, ContactMessage>(&format!(
            "UPDATE contacts SET replied_at = ?, is_read = 1 WHERE id = ? RETURNING {CONTACT_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(RepositoryError::MessageNotFound(id))?;
        info!(message_id = %id, "contact message marked as replied");
        Ok(message)
    }

    pub async fn delete(&self, id: Uuid) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM contacts WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::MessageNotFound(id));
        }
        info!(message_id = %id, "contact message deleted");
        Ok(())
    }

    pub async fn stats(&self) -> RepositoryResult<MessageStats> {
        let (total, unread, replied) = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT COUNT(*), \
                    COALESCE(SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END), 0), \
                    COALESCE(SUM(CASE WHEN replied_at IS NOT NULL THEN 1 ELSE 0 END), 0) \
             FROM contacts",
        )
        .fetch_one(&self.db)
        .await?;
        Ok(MessageStats {
            total,
            unread,
            replied,
        })
    }
}

/// Trim every field and enforce the form bounds. A blank subject becomes `None`.
fn validate(new: NewContactMessage) -> RepositoryResult<NewContactMessage> {
    let name = new.name.trim().to_string();
    let email = new.email.trim().to_string();
    let message = new.message.trim().to_string();
    let subject = new
        .subject
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let name_len = name.chars().count();
    if name_len < NAME_CHARS.0 || name_len > NAME_CHARS.1 {
        return Err(RepositoryError::Invalid(format!(
            "Name must be between {} and {} characters",
            NAME_CHARS.0, NAME_CHARS.1
        )));
    }
    if !is_plausible_email(&email) {
        return Err(RepositoryError::Invalid("Invalid email address".into()));
    }
    if subject
        .as_ref()
        .is_some_and(|s| s.chars().count() > SUBJECT_MAX_CHARS)
    {
        return Err(RepositoryError::Invalid(format!(
            "Subject must be at most {} characters",
            SUBJECT_MAX_CHARS
        )));
    }
    let message_len = message.chars().count();
    if message_len < MESSAGE_CHARS.0 || message_len > MESSAGE_CHARS.1 {
        return Err(RepositoryError::Invalid(format!(
            "Message must be between {} and {} characters",
            MESSAGE_CHARS.0, MESSAGE_CHARS.1
        )));
    }

    Ok(NewContactMessage {
        name,
        email,
        subject,
        message,
    })
}

fn is_plausible_email(email: &str) -> bool {
    if email.len() > EMAIL_MAX_LEN || email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
                && !domain.ends_with('.')
        }
        None => false,
    }
}
