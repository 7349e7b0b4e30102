//! Stored images and the shapes they take when read back with their project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A durable image record.
///
/// The binary lives in the object store under `storage_key`; `url` is the
/// public reference to it. `project_id = None` means the image is unassigned
/// and can be claimed by any project.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct StoredImage {
    pub id: Uuid,

    /// Owning project, if any. At most one at a time.
    pub project_id: Option<Uuid>,

    /// Publicly resolvable reference to the binary.
    pub url: String,

    /// Key of the binary inside the image bucket.
    pub storage_key: String,

    /// Descriptive text, defaults to the original filename.
    pub alt_text: Option<String>,

    /// Display ordering hint within a project.
    pub sort_order: i64,

    pub size_bytes: i64,

    pub content_type: String,

    pub created_at: DateTime<Utc>,
}

/// Values needed to record a freshly stored binary.
#[derive(Clone, Debug)]
pub struct NewImage {
    pub url: String,
    pub storage_key: String,
    pub alt_text: Option<String>,
    pub size_bytes: i64,
    pub content_type: String,
}

/// The slice of a project shown next to an image in the media library.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProjectSummary {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
}

/// A library entry: the image plus the project that displays it.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct MediaImage {
    #[serde(flatten)]
    pub image: StoredImage,
    pub project: Option<ProjectSummary>,
}

/// Raw row of `project_images LEFT JOIN projects`.
///
/// Every `project_*` column is nullable because of the outer join; the row
/// only carries a project when all of them are present.
#[derive(FromRow, Debug, Clone)]
pub struct ImageProjectRow {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub url: String,
    pub storage_key: String,
    pub alt_text: Option<String>,
    pub sort_order: i64,
    pub size_bytes: i64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub joined_project_id: Option<Uuid>,
    pub project_title: Option<String>,
    pub project_slug: Option<String>,
}

/// Fold a joined row into a [`MediaImage`].
///
/// Shapes handled:
/// - unassigned: no `project_id`, no joined columns -> `project: None`
/// - assigned: `project_id` and every joined column present -> `Some(summary)`
/// - dangling: `project_id` set but the join produced nothing (project
///   soft-deleted or missing) -> `project: None`, `project_id` kept as stored
/// - torn: joined columns partially null or pointing at a different id ->
///   treated as no project
pub fn normalize_media_row(row: ImageProjectRow) -> MediaImage {
    let project = match (
        row.project_id,
        row.joined_project_id,
        row.project_title,
        row.project_slug,
    ) {
        (Some(owner), Some(joined), Some(title), Some(slug)) if owner == joined => {
            Some(ProjectSummary {
                id: joined,
                title,
                slug,
            })
        }
        (Some(owner), _, _, _) => {
            tracing::debug!(image_id = %row.id, project_id = %owner, "image points at a project that is not visible");
            None
        }
        _ => None,
    };

    MediaImage {
        image: StoredImage {
            id: row.id,
            project_id: row.project_id,
            url: row.url,
            storage_key: row.storage_key,
            alt_text: row.alt_text,
            sort_order: row.sort_order,
            size_bytes: row.size_bytes,
            content_type: row.content_type,
            created_at: row.created_at,
        },
        project,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(project_id: Option<Uuid>) -> ImageProjectRow {
        ImageProjectRow {
            id: Uuid::new_v4(),
            project_id,
            url: "http://localhost/storage/project-images/a.jpg".into(),
            storage_key: "a.jpg".into(),
            alt_text: Some("a.jpg".into()),
            sort_order: 0,
            size_bytes: 10,
            content_type: "image/jpeg".into(),
            created_at: Utc::now(),
            joined_project_id: None,
            project_title: None,
            project_slug: None,
        }
    }

    #[test]
    fn unassigned_row_has_no_project() {
        let media = normalize_media_row(row(None));
        assert_eq!(media.project, None);
        assert_eq!(media.image.project_id, None);
    }

    #[test]
    fn assigned_row_carries_summary() {
        let project = Uuid::new_v4();
        let mut r = row(Some(project));
        r.joined_project_id = Some(project);
        r.project_title = Some("Harbor".into());
        r.project_slug = Some("harbor".into());

        let media = normalize_media_row(r);
        assert_eq!(
            media.project,
            Some(ProjectSummary {
                id: project,
                title: "Harbor".into(),
                slug: "harbor".into(),
            })
        );
    }

    #[test]
    fn dangling_row_keeps_owner_but_no_summary() {
        let project = Uuid::new_v4();
        let media = normalize_media_row(row(Some(project)));
        assert_eq!(media.project, None);
        assert_eq!(media.image.project_id, Some(project));
    }

    #[test]
    fn torn_row_is_treated_as_no_project() {
        let project = Uuid::new_v4();
        let mut r = row(Some(project));
        r.joined_project_id = Some(project);
        r.project_title = Some("Harbor".into());
        let media = normalize_media_row(r);
        assert_eq!(media.project, None);

        let mut r = row(Some(project));
        r.joined_project_id = Some(Uuid::new_v4());
        r.project_title = Some("Other".into());
        r.project_slug = Some("other".into());
        assert_eq!(normalize_media_row(r).project, None);
    }

    #[test]
    fn flattened_json_shape() {
        let media = normalize_media_row(row(None));
        let value = serde_json::to_value(&media).unwrap();
        assert!(value.get("id").is_some());
        assert!(value.get("url").is_some());
        assert!(value["project"].is_null());
    }
}
