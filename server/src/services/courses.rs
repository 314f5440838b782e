/// Course catalog. Reads are public; writes are admin-only.

use crate::auth::SessionUser;
use crate::db::models::{Course, CourseInput, CoursePatch};
use crate::db::{Storage, StorageError};
use crate::error::{AppError, Result};
use std::sync::Arc;
use uuid::Uuid;

fn require_admin(actor: &SessionUser) -> Result<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn duplicate_code(err: StorageError, code: &str) -> AppError {
    match err {
        StorageError::UniqueViolation(_) => {
            AppError::Conflict(format!("Course code {} already exists", code))
        }
        other => other.into(),
    }
}

pub struct CourseCatalog {
    storage: Arc<dyn Storage>,
}

impl CourseCatalog {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        CourseCatalog { storage }
    }

    pub async fn list(&self) -> Result<Vec<Course>> {
        Ok(self.storage.list_courses().await?)
    }

    pub async fn get(&self, id: &str) -> Result<Course> {
        self.storage
            .get_course(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Course".to_string()))
    }

    pub async fn create(&self, input: CourseInput, actor: &SessionUser) -> Result<Course> {
        require_admin(actor)?;

        let name = input.name.trim().to_string();
        let code = input.code.trim().to_string();
        let mut missing = Vec::new();
        if name.is_empty() {
            missing.push("name");
        }
        if code.is_empty() {
            missing.push("code");
        }
        if !missing.is_empty() {
            return Err(AppError::missing_fields(&missing));
        }

        let course = Course {
            id: Uuid::new_v4().to_string(),
            name,
            code,
            description: clean(input.description),
            duration: clean(input.duration),
            degree: clean(input.degree),
        };
        self.storage
            .insert_course(&course)
            .await
            .map_err(|e| duplicate_code(e, &course.code))?;

        log::info!("Course {} ({}) created", course.code, course.id);
        Ok(course)
    }

    pub async fn update(&self, id: &str, patch: CoursePatch, actor: &SessionUser) -> Result<Course> {
        require_admin(actor)?;
        let mut course = self.get(id).await?;

        if let Some(name) = clean(patch.name) {
            course.name = name;
        }
        if let Some(code) = clean(patch.code) {
            course.code = code;
        }
        if patch.description.is_some() {
            course.description = clean(patch.description);
        }
        if patch.duration.is_some() {
            course.duration = clean(patch.duration);
        }
        if patch.degree.is_some() {
            course.degree = clean(patch.degree);
        }

        let updated = self
            .storage
            .update_course(&course)
            .await
            .map_err(|e| duplicate_code(e, &course.code))?;
        if !updated {
            return Err(AppError::NotFound("Course".to_string()));
        }
        Ok(course)
    }

    /// Applications referencing the course keep their dangling id.
    pub async fn delete(&self, id: &str, actor: &SessionUser) -> Result<()> {
        require_admin(actor)?;
        if !self.storage.delete_course(id).await? {
            return Err(AppError::NotFound("Course".to_string()));
        }
        log::info!("Course {} deleted", id);
        Ok(())
    }
}
