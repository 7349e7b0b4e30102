//! Project records and the image sets attached to them.

use crate::{
    models::{
        image::StoredImage,
        project::{NewProject, Project, ProjectUpdate, ProjectWithImages},
    },
    services::{
        image_repository::{
            IMAGE_COLUMNS, RepositoryError, RepositoryResult, SqliteImageRepository,
            is_unique_violation,
        },
        media_service::{AssociationOutcome, MediaService},
    },
};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

const PROJECT_COLUMNS: &str =
    "id, slug, title, description, is_featured, sort_order, created_at, updated_at, deleted_at";

/// A written project plus what happened to its requested image set.
#[derive(Serialize, Debug)]
pub struct ProjectWrite {
    #[serde(flatten)]
    pub project: ProjectWithImages,
    pub association: AssociationOutcome,
}

#[derive(Clone)]
pub struct ProjectService {
    db: SqlitePool,
    images: SqliteImageRepository,
    media: MediaService,
}

impl ProjectService {
    pub fn new(db: SqlitePool, media: MediaService) -> Self {
        Self {
            images: SqliteImageRepository::new(db.clone()),
            db,
            media,
        }
    }

    /// Insert a project and claim the listed images for it.
    pub async fn create(&self, new: NewProject) -> RepositoryResult<ProjectWrite> {
        validate_slug(&new.slug)?;
        validate_title(&new.title)?;

        let now = Utc::now();
        let inserted = sqlx::query_as::<_, Project>(&format!(
            "INSERT INTO projects \
                 (id, slug, title, description, is_featured, sort_order, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&new.slug)
        .bind(new.title.trim())
        .bind(&new.description)
        .bind(new.is_featured)
        .bind(new.sort_order)
        .bind(now)
        .bind(now)
        .fetch_one(&self.db)
        .await
        .map_err(|err| slug_conflict(err, &new.slug))?;
        info!(project_id = %inserted.id, slug = %inserted.slug, "project created");

        let association = self
            .media
            .toggle_image_association(&new.images, Some(inserted.id))
            .await;
        let project = self.with_images(inserted).await?;
        Ok(ProjectWrite {
            project,
            association,
        })
    }

    /// Apply the present fields. When `images` is given it becomes the exact
    /// image set of the project.
    pub async fn update(&self, id: Uuid, update: ProjectUpdate) -> RepositoryResult<ProjectWrite> {
        if let Some(slug) = &update.slug {
            validate_slug(slug)?;
        }
        if let Some(title) = &update.title {
            validate_title(title)?;
        }

        let slug = update.slug.clone().unwrap_or_default();
        let updated = sqlx::query_as::<_, Project>(&format!(
            "UPDATE projects SET \
                 slug = COALESCE(?, slug), \
                 title = COALESCE(?, title), \
                 description = COALESCE(?, description), \
                 is_featured = COALESCE(?, is_featured), \
                 sort_order = COALESCE(?, sort_order), \
                 updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(&update.slug)
        .bind(update.title.as_deref().map(str::trim))
        .bind(&update.description)
        .bind(update.is_featured)
        .bind(update.sort_order)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|err| slug_conflict(err, &slug))?
        .ok_or(RepositoryError::ProjectNotFound(id))?;
        info!(project_id = %id, "project updated");

        let association = match &update.images {
            Some(desired) => self.media.reconcile_project_images(id, desired).await?,
            None => AssociationOutcome {
                success: true,
                ..AssociationOutcome::default()
            },
        };
        let project = self.with_images(updated).await?;
        Ok(ProjectWrite {
            project,
            association,
        })
    }

    /// Hide the project and release its images back to the unassigned pool.
    pub async fn soft_delete(&self, id: Uuid) -> RepositoryResult<()> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            "UPDATE projects SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::ProjectNotFound(id));
        }

        let released = sqlx::query("UPDATE project_images SET project_id = NULL WHERE project_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        info!(project_id = %id, released, "project deleted");
        Ok(())
    }

    /// Remove the project row for good, soft deleted or not. Its images stay
    /// in the library, unassigned.
    pub async fn permanent_delete(&self, id: Uuid) -> RepositoryResult<()> {
        let mut tx = self.db.begin().await?;

        let released = sqlx::query("UPDATE project_images SET project_id = NULL WHERE project_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::ProjectNotFound(id));
        }
        tx.commit().await?;

        info!(project_id = %id, released, "project permanently deleted");
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> RepositoryResult<ProjectWithImages> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(RepositoryError::ProjectNotFound(id))?;
        self.with_images(project).await
    }

    pub async fn by_slug(&self, slug: &str) -> RepositoryResult<ProjectWithImages> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE slug = ? AND deleted_at IS NULL"
        ))
        .bind(slug)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| RepositoryError::SlugNotFound(slug.to_string()))?;
        self.with_images(project).await
    }

    /// Every visible project with its images, in display order.
    pub async fn list_public(&self) -> RepositoryResult<Vec<ProjectWithImages>> {
        let projects = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE deleted_at IS NULL \
             ORDER BY sort_order ASC, created_at DESC"
        ))
        .fetch_all(&self.db)
        .await?;
        self.attach_images(projects).await
    }

    pub async fn featured(&self, limit: usize) -> RepositoryResult<Vec<ProjectWithImages>> {
        let projects = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects \
             WHERE deleted_at IS NULL AND is_featured = 1 \
             ORDER BY sort_order ASC, created_at DESC LIMIT ?"
        ))
        .bind(limit.clamp(1, 100) as i64)
        .fetch_all(&self.db)
        .await?;
        self.attach_images(projects).await
    }

    async fn with_images(&self, project: Project) -> RepositoryResult<ProjectWithImages> {
        let images = self.images.list_for_project(project.id).await?;
        Ok(ProjectWithImages { project, images })
    }

    /// One query for the images of every listed project.
    async fn attach_images(&self, projects: Vec<Project>) -> RepositoryResult<Vec<ProjectWithImages>> {
        let images = sqlx::query_as::<_, StoredImage>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM project_images \
             WHERE project_id IN (SELECT id FROM projects WHERE deleted_at IS NULL) \
             ORDER BY sort_order ASC, created_at ASC"
        ))
        .fetch_all(&self.db)
        .await?;

        let mut by_project: HashMap<Uuid, Vec<StoredImage>> = HashMap::new();
        for image in images {
            if let Some(project_id) = image.project_id {
                by_project.entry(project_id).or_default().push(image);
            }
        }

        Ok(projects
            .into_iter()
            .map(|project| ProjectWithImages {
                images: by_project.remove(&project.id).unwrap_or_default(),
                project,
            })
            .collect())
    }
}

fn validate_slug(slug: &str) -> RepositoryResult<()> {
    let valid = !slug.is_empty()
        && slug.len() <= 100
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
        return Err(RepositoryError::Invalid(format!(
            "Invalid slug `{}`: use lowercase letters, digits and dashes",
            slug
        )));
    }
    Ok(())
}

fn validate_title(title: &str) -> RepositoryResult<()> {
    if title.trim().is_empty() {
        return Err(RepositoryError::Invalid("Title is required".into()));
    }
    Ok(())
}

fn slug_conflict(err: sqlx::Error, slug: &str) -> RepositoryError {
    if is_unique_violation(&err) {
        RepositoryError::Conflict(format!("Slug `{}` is already taken", slug))
    } else {
        RepositoryError::Sqlx(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::memory_pool,
        models::image::NewImage,
        services::{
            image_repository::ImageMetadataStore,
            media_service::fakes::MemoryStore,
            validation::Limits,
        },
    };
    use std::sync::Arc;

    async fn setup() -> (SqliteImageRepository, ProjectService) {
        let db = memory_pool().await;
        let repo = SqliteImageRepository::new(db.clone());
        let media = MediaService::new(
            Arc::new(MemoryStore::default()),
            Arc::new(repo.clone()),
            "project-images",
            Limits::default(),
        );
        (repo, ProjectService::new(db, media))
    }

    async fn image(repo: &SqliteImageRepository, key: &str) -> Uuid {
        repo.insert_unassigned(NewImage {
            url: format!("memory://project-images/{key}"),
            storage_key: key.to_string(),
            alt_text: None,
            size_bytes: 10,
            content_type: "image/jpeg".into(),
        })
        .await
        .unwrap()
        .id
    }

    fn new_project(slug: &str, images: Vec<Uuid>) -> NewProject {
        NewProject {
            slug: slug.to_string(),
            title: format!("Title {slug}"),
            description: None,
            is_featured: false,
            sort_order: 0,
            images,
        }
    }

    #[tokio::test]
    async fn create_claims_requested_images() {
        let (repo, service) = setup().await;
        let a = image(&repo, "a.jpg").await;
        let b = image(&repo, "b.jpg").await;
        let spare = image(&repo, "c.jpg").await;

        let written = service.create(new_project("harbour", vec![a, b])).await.unwrap();
        assert!(written.association.success);
        let ids: Vec<Uuid> = written.project.images.iter().map(|i| i.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a) && ids.contains(&b));
        assert_eq!(repo.find(spare).await.unwrap().project_id, None);
    }

    #[tokio::test]
    async fn create_reports_unknown_images_but_keeps_project() {
        let (_repo, service) = setup().await;
        let missing = Uuid::new_v4();
        let written = service.create(new_project("lonely", vec![missing])).await.unwrap();
        assert!(!written.association.success);
        assert_eq!(written.association.failures[0].image_id, missing);
        assert!(service.by_slug("lonely").await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_or_malformed_slug_is_rejected() {
        let (_repo, service) = setup().await;
        service.create(new_project("harbour", vec![])).await.unwrap();

        let err = service.create(new_project("harbour", vec![])).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let err = service.create(new_project("Not A Slug", vec![])).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Invalid(_)));
    }

    #[tokio::test]
    async fn update_reconciles_image_set() {
        let (repo, service) = setup().await;
        let a = image(&repo, "a.jpg").await;
        let b = image(&repo, "b.jpg").await;
        let c = image(&repo, "c.jpg").await;
        let project = service
            .create(new_project("harbour", vec![a, b]))
            .await
            .unwrap()
            .project
            .project;

        let written = service
            .update(
                project.id,
                ProjectUpdate {
                    title: Some("Harbour at night".into()),
                    images: Some(vec![b, c]),
                    ..ProjectUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(written.project.project.title, "Harbour at night");
        assert_eq!(written.project.project.slug, "harbour");
        assert_eq!(repo.find(a).await.unwrap().project_id, None);
        assert_eq!(repo.find(b).await.unwrap().project_id, Some(project.id));
        assert_eq!(repo.find(c).await.unwrap().project_id, Some(project.id));
    }

    #[tokio::test]
    async fn images_move_between_projects_exclusively() {
        let (repo, service) = setup().await;
        let a = image(&repo, "a.jpg").await;
        let p = service.create(new_project("p", vec![a])).await.unwrap();
        let q = service.create(new_project("q", vec![a])).await.unwrap();

        let p = service.get(p.project.project.id).await.unwrap();
        let q = service.get(q.project.project.id).await.unwrap();
        assert!(p.images.is_empty());
        assert_eq!(q.images.len(), 1);
    }

    #[tokio::test]
    async fn soft_delete_hides_project_and_releases_images() {
        let (repo, service) = setup().await;
        let a = image(&repo, "a.jpg").await;
        let project = service
            .create(new_project("gone", vec![a]))
            .await
            .unwrap()
            .project
            .project;

        service.soft_delete(project.id).await.unwrap();
        assert!(matches!(
            service.by_slug("gone").await,
            Err(RepositoryError::SlugNotFound(_))
        ));
        assert!(service.list_public().await.unwrap().is_empty());
        assert_eq!(repo.find(a).await.unwrap().project_id, None);
        assert!(matches!(
            service.soft_delete(project.id).await,
            Err(RepositoryError::ProjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn permanent_delete_removes_row_and_keeps_images() {
        let (repo, service) = setup().await;
        let a = image(&repo, "a.jpg").await;
        let live = service
            .create(new_project("live", vec![a]))
            .await
            .unwrap()
            .project
            .project;
        let hidden = service
            .create(new_project("hidden", vec![]))
            .await
            .unwrap()
            .project
            .project;
        service.soft_delete(hidden.id).await.unwrap();

        service.permanent_delete(live.id).await.unwrap();
        service.permanent_delete(hidden.id).await.unwrap();

        assert_eq!(repo.find(a).await.unwrap().project_id, None);
        assert!(matches!(
            service.permanent_delete(live.id).await,
            Err(RepositoryError::ProjectNotFound(_))
        ));
        // the slug is free again
        service.create(new_project("live", vec![])).await.unwrap();
    }

    #[tokio::test]
    async fn public_and_featured_listings() {
        let (repo, service) = setup().await;
        let a = image(&repo, "a.jpg").await;
        let mut featured = new_project("featured", vec![a]);
        featured.is_featured = true;
        featured.sort_order = 1;
        service.create(featured).await.unwrap();
        service.create(new_project("plain", vec![])).await.unwrap();

        let all = service.list_public().await.unwrap();
        let slugs: Vec<&str> = all.iter().map(|p| p.project.slug.as_str()).collect();
        assert_eq!(slugs, vec!["plain", "featured"]);
        assert_eq!(all[1].images.len(), 1);

        let top = service.featured(3).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].project.slug, "featured");
        assert_eq!(top[0].images[0].id, a);
    }
}
