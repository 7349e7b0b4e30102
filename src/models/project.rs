//! Projects: the portfolio entries images get associated with.

use super::image::StoredImage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Project {
    pub id: Uuid,

    /// URL-safe unique handle used by the public detail page.
    pub slug: String,

    pub title: String,

    pub description: Option<String>,

    pub is_featured: bool,

    pub sort_order: i64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Set on soft delete; such projects disappear from public listings.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A project together with its images, ordered by `sort_order`.
#[derive(Serialize, Clone, Debug)]
pub struct ProjectWithImages {
    #[serde(flatten)]
    pub project: Project,
    pub images: Vec<StoredImage>,
}

/// Body of a create request. `images` are previously uploaded image ids to claim.
#[derive(Deserialize, Clone, Debug)]
pub struct NewProject {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub images: Vec<Uuid>,
}

/// Body of an update request. Absent fields are left alone; `images`, when
/// present, is the complete desired image set.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct ProjectUpdate {
    pub slug: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_featured: Option<bool>,
    pub sort_order: Option<i64>,
    pub images: Option<Vec<Uuid>>,
}
