//! Metadata store for stored images (`project_images`).
//!
//! `ImageMetadataStore` is the part the media pipeline depends on;
//! `SqliteImageRepository` implements it and adds the library queries.

use crate::models::image::{
    ImageProjectRow, MediaImage, NewImage, StoredImage, normalize_media_row,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("image `{0}` not found")]
    ImageNotFound(Uuid),
    #[error("project `{0}` not found")]
    ProjectNotFound(Uuid),
    #[error("project `{0}` not found")]
    SlugNotFound(String),
    #[error("setting `{0}` not found")]
    SettingNotFound(String),
    #[error("message `{0}` not found")]
    MessageNotFound(Uuid),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Relational operations the ingestion pipeline performs on image rows.
#[async_trait]
pub trait ImageMetadataStore: Send + Sync {
    /// Insert an unassigned row with ordering hint zero.
    async fn insert_unassigned(&self, image: NewImage) -> RepositoryResult<StoredImage>;

    async fn find(&self, id: Uuid) -> RepositoryResult<StoredImage>;

    async fn delete(&self, id: Uuid) -> RepositoryResult<()>;

    /// Point an image at `project`, or detach it with `None`.
    async fn set_project(&self, id: Uuid, project: Option<Uuid>) -> RepositoryResult<()>;

    /// Ids of the images currently associated with `project`.
    async fn project_image_ids(&self, project: Uuid) -> RepositoryResult<Vec<Uuid>>;

    /// `(id, storage_key)` of every row.
    async fn storage_keys(&self) -> RepositoryResult<Vec<(Uuid, String)>>;
}

/// One page of the media library, newest first.
#[derive(Debug)]
pub struct MediaPage {
    pub images: Vec<MediaImage>,
    pub is_truncated: bool,
    /// Position after the last returned entry, `(created_at, id)`.
    pub next_cursor: Option<(DateTime<Utc>, Uuid)>,
}

#[derive(Clone)]
pub struct SqliteImageRepository {
    db: SqlitePool,
}

pub(crate) const IMAGE_COLUMNS: &str =
    "id, project_id, url, storage_key, alt_text, sort_order, size_bytes, content_type, created_at";

const MEDIA_SELECT: &str = "SELECT i.id, i.project_id, i.url, i.storage_key, i.alt_text, \
     i.sort_order, i.size_bytes, i.content_type, i.created_at, \
     p.id AS joined_project_id, p.title AS project_title, p.slug AS project_slug \
     FROM project_images i \
     LEFT JOIN projects p ON p.id = i.project_id AND p.deleted_at IS NULL";

impl SqliteImageRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Library listing with project summaries, `(created_at, id)` descending.
    pub async fn list_media(
        &self,
        limit: usize,
        after: Option<(DateTime<Utc>, Uuid)>,
    ) -> RepositoryResult<MediaPage> {
        let limit = limit.clamp(1, 1000);
        let fetch_limit = limit + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(MEDIA_SELECT);
        if let Some((created_at, id)) = after {
            builder.push(" WHERE (i.created_at < ");
            builder.push_bind(created_at);
            builder.push(" OR (i.created_at = ");
            builder.push_bind(created_at);
            builder.push(" AND i.id < ");
            builder.push_bind(id);
            builder.push("))");
        }
        builder.push(" ORDER BY i.created_at DESC, i.id DESC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<ImageProjectRow> = builder.build_query_as().fetch_all(&self.db).await?;

        let is_truncated = rows.len() == fetch_limit;
        if is_truncated {
            rows.pop();
        }
        let next_cursor = if is_truncated {
            rows.last().map(|row| (row.created_at, row.id))
        } else {
            None
        };

        Ok(MediaPage {
            images: rows.into_iter().map(normalize_media_row).collect(),
            is_truncated,
            next_cursor,
        })
    }

    /// Library entries for a set of ids, in no particular order.
    pub async fn media_by_ids(&self, ids: &[Uuid]) -> RepositoryResult<Vec<MediaImage>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(MEDIA_SELECT);
        builder.push(" WHERE i.id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        let rows: Vec<ImageProjectRow> = builder.build_query_as().fetch_all(&self.db).await?;
        Ok(rows.into_iter().map(normalize_media_row).collect())
    }

    /// Images of a project ordered for display.
    pub async fn list_for_project(&self, project: Uuid) -> RepositoryResult<Vec<StoredImage>> {
        let images = sqlx::query_as::<_, StoredImage>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM project_images \
             WHERE project_id = ? ORDER BY sort_order ASC, created_at ASC"
        ))
        .bind(project)
        .fetch_all(&self.db)
        .await?;
        Ok(images)
    }

    pub async fn update_details(
        &self,
        id: Uuid,
        alt_text: Option<String>,
        sort_order: Option<i64>,
    ) -> RepositoryResult<StoredImage> {
        sqlx::query_as::<_, StoredImage>(&format!(
            "UPDATE project_images SET \
                 alt_text = COALESCE(?, alt_text), \
                 sort_order = COALESCE(?, sort_order) \
             WHERE id = ? RETURNING {IMAGE_COLUMNS}"
        ))
        .bind(alt_text)
        .bind(sort_order)
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(RepositoryError::ImageNotFound(id))
    }

    async fn ensure_project_visible(&self, project: Uuid) -> RepositoryResult<()> {
        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM projects WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(project)
        .fetch_one(&self.db)
        .await?;
        if exists == 0 {
            return Err(RepositoryError::ProjectNotFound(project));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageMetadataStore for SqliteImageRepository {
    async fn insert_unassigned(&self, image: NewImage) -> RepositoryResult<StoredImage> {
        let inserted = sqlx::query_as::<_, StoredImage>(&format!(
            "INSERT INTO project_images \
                 (id, project_id, url, storage_key, alt_text, sort_order, size_bytes, content_type, created_at) \
             VALUES (?, NULL, ?, ?, ?, 0, ?, ?, ?) \
             RETURNING {IMAGE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&image.url)
        .bind(&image.storage_key)
        .bind(&image.alt_text)
        .bind(image.size_bytes)
        .bind(&image.content_type)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await;

        match inserted {
            Ok(row) => Ok(row),
            Err(err) if is_unique_violation(&err) => Err(RepositoryError::Conflict(format!(
                "storage key `{}` is already recorded",
                image.storage_key
            ))),
            Err(err) => Err(RepositoryError::Sqlx(err)),
        }
    }

    async fn find(&self, id: Uuid) -> RepositoryResult<StoredImage> {
        sqlx::query_as::<_, StoredImage>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM project_images WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(RepositoryError::ImageNotFound(id))
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM project_images WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::ImageNotFound(id));
        }
        Ok(())
    }

    async fn set_project(&self, id: Uuid, project: Option<Uuid>) -> RepositoryResult<()> {
        // Project visibility is checked in the same statement as the write.
        let result = sqlx::query(
            "UPDATE project_images SET project_id = ?1 \
             WHERE id = ?2 AND (?1 IS NULL OR EXISTS \
                 (SELECT 1 FROM projects WHERE id = ?1 AND deleted_at IS NULL))",
        )
        .bind(project)
        .bind(id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(());
        }
        if let Some(project) = project {
            self.ensure_project_visible(project).await?;
        }
        Err(RepositoryError::ImageNotFound(id))
    }

    async fn project_image_ids(&self, project: Uuid) -> RepositoryResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM project_images WHERE project_id = ? ORDER BY sort_order, created_at",
        )
        .bind(project)
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }

    async fn storage_keys(&self) -> RepositoryResult<Vec<(Uuid, String)>> {
        let rows = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, storage_key FROM project_images ORDER BY storage_key",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    fn new_image(key: &str) -> NewImage {
        NewImage {
            url: format!("http://localhost:3000/storage/project-images/{key}"),
            storage_key: key.to_string(),
            alt_text: Some(format!("{key} original")),
            size_bytes: 1234,
            content_type: "image/jpeg".into(),
        }
    }

    async fn insert_project(db: &SqlitePool, slug: &str) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO projects (id, slug, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(slug)
        .bind(slug.to_uppercase())
        .bind(now)
        .bind(now)
        .execute(db)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn insert_defaults_to_unassigned_and_order_zero() {
        let repo = SqliteImageRepository::new(memory_pool().await);
        let image = repo.insert_unassigned(new_image("a.jpg")).await.unwrap();

        assert_eq!(image.project_id, None);
        assert_eq!(image.sort_order, 0);
        assert_eq!(image.alt_text.as_deref(), Some("a.jpg original"));
        assert_eq!(repo.find(image.id).await.unwrap(), image);
    }

    #[tokio::test]
    async fn duplicate_storage_key_is_a_conflict() {
        let repo = SqliteImageRepository::new(memory_pool().await);
        repo.insert_unassigned(new_image("a.jpg")).await.unwrap();
        let err = repo.insert_unassigned(new_image("a.jpg")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn set_project_requires_visible_project() {
        let db = memory_pool().await;
        let repo = SqliteImageRepository::new(db.clone());
        let image = repo.insert_unassigned(new_image("a.jpg")).await.unwrap();

        let missing = Uuid::new_v4();
        let err = repo.set_project(image.id, Some(missing)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::ProjectNotFound(id) if id == missing));

        let project = insert_project(&db, "harbor").await;
        repo.set_project(image.id, Some(project)).await.unwrap();
        assert_eq!(repo.project_image_ids(project).await.unwrap(), vec![image.id]);

        repo.set_project(image.id, None).await.unwrap();
        assert!(repo.project_image_ids(project).await.unwrap().is_empty());

        let err = repo.set_project(Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, RepositoryError::ImageNotFound(_)));

        let err = repo
            .set_project(Uuid::new_v4(), Some(project))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ImageNotFound(_)));
    }

    #[tokio::test]
    async fn set_project_refuses_soft_deleted_project() {
        let db = memory_pool().await;
        let repo = SqliteImageRepository::new(db.clone());
        let image = repo.insert_unassigned(new_image("a.jpg")).await.unwrap();
        let project = insert_project(&db, "harbor").await;
        sqlx::query("UPDATE projects SET deleted_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(project)
            .execute(&db)
            .await
            .unwrap();

        let err = repo.set_project(image.id, Some(project)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::ProjectNotFound(id) if id == project));
        assert_eq!(repo.find(image.id).await.unwrap().project_id, None);
    }

    #[tokio::test]
    async fn list_media_pages_newest_first_with_projects() {
        let db = memory_pool().await;
        let repo = SqliteImageRepository::new(db.clone());
        let project = insert_project(&db, "harbor").await;

        let mut ids = Vec::new();
        for key in ["a.jpg", "b.jpg", "c.jpg"] {
            ids.push(repo.insert_unassigned(new_image(key)).await.unwrap().id);
        }
        repo.set_project(ids[0], Some(project)).await.unwrap();

        let first = repo.list_media(2, None).await.unwrap();
        assert_eq!(first.images.len(), 2);
        assert!(first.is_truncated);
        let second = repo.list_media(2, first.next_cursor).await.unwrap();
        assert_eq!(second.images.len(), 1);
        assert!(!second.is_truncated);
        assert_eq!(second.next_cursor, None);

        let all: Vec<_> = first.images.iter().chain(second.images.iter()).collect();
        let mut seen: Vec<Uuid> = all.iter().map(|m| m.image.id).collect();
        seen.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(seen, expected);

        let claimed = all.iter().find(|m| m.image.id == ids[0]).unwrap();
        assert_eq!(claimed.project.as_ref().unwrap().slug, "harbor");
        assert!(all.iter().filter(|m| m.image.id != ids[0]).all(|m| m.project.is_none()));
    }

    #[tokio::test]
    async fn soft_deleted_project_is_not_joined() {
        let db = memory_pool().await;
        let repo = SqliteImageRepository::new(db.clone());
        let project = insert_project(&db, "harbor").await;
        let image = repo.insert_unassigned(new_image("a.jpg")).await.unwrap();
        repo.set_project(image.id, Some(project)).await.unwrap();

        sqlx::query("UPDATE projects SET deleted_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(project)
            .execute(&db)
            .await
            .unwrap();

        let media = repo.media_by_ids(&[image.id]).await.unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].project, None);
        assert_eq!(media[0].image.project_id, Some(project));
    }

    #[tokio::test]
    async fn update_details_keeps_unset_fields() {
        let repo = SqliteImageRepository::new(memory_pool().await);
        let image = repo.insert_unassigned(new_image("a.jpg")).await.unwrap();

        let updated = repo.update_details(image.id, None, Some(3)).await.unwrap();
        assert_eq!(updated.sort_order, 3);
        assert_eq!(updated.alt_text, image.alt_text);

        let updated = repo
            .update_details(image.id, Some("Dock at dusk".into()), None)
            .await
            .unwrap();
        assert_eq!(updated.alt_text.as_deref(), Some("Dock at dusk"));
        assert_eq!(updated.sort_order, 3);

        let err = repo.update_details(Uuid::new_v4(), None, None).await.unwrap_err();
        assert!(matches!(err, RepositoryError::ImageNotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let repo = SqliteImageRepository::new(memory_pool().await);
        let image = repo.insert_unassigned(new_image("a.jpg")).await.unwrap();
        repo.delete(image.id).await.unwrap();
        assert!(matches!(
            repo.find(image.id).await.unwrap_err(),
            RepositoryError::ImageNotFound(_)
        ));
        assert!(matches!(
            repo.delete(image.id).await.unwrap_err(),
            RepositoryError::ImageNotFound(_)
        ));
    }
}
