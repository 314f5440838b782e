/// Application lifecycle.
///
/// An application becomes durable only on final submission. Afterwards the
/// owning student may edit its content and staff (admins) drive its status
/// forward: `pending -> under_review -> approved | rejected`, with approve and
/// reject also reachable straight from `pending`.

use crate::auth::SessionUser;
use crate::db::models::{
    Application, ApplicationPatch, ApplicationStatus, ApplicationSubmission, ApplicationView,
    DocumentDescriptor, DocumentMap, PersonalDetails,
};
use crate::db::Storage;
use crate::error::{AppError, Result};
use crate::services::documents::{normalize_slot, DocumentIntake};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Shown when an application points at a course that no longer exists.
pub const UNKNOWN_COURSE: &str = "Unknown";

fn missing_required(course_id: &str, personal: &PersonalDetails) -> Vec<&'static str> {
    let checks = [
        ("courseId", course_id),
        ("firstName", personal.first_name.as_str()),
        ("email", personal.email.as_str()),
        ("mobileNumber", personal.mobile_number.as_str()),
    ];
    checks
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect()
}

fn validate_required(course_id: &str, personal: &PersonalDetails) -> Result<()> {
    let missing = missing_required(course_id, personal);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::missing_fields(&missing))
    }
}

fn can_access(application: &Application, actor: &SessionUser) -> bool {
    actor.is_admin() || application.student_id == actor.id
}

pub struct ApplicationService {
    storage: Arc<dyn Storage>,
    documents: Arc<DocumentIntake>,
}

impl ApplicationService {
    pub fn new(storage: Arc<dyn Storage>, documents: Arc<DocumentIntake>) -> Self {
        ApplicationService { storage, documents }
    }

    /// Every descriptor not already on record must come from our own intake.
    fn check_documents(
        &self,
        owner_id: &str,
        documents: &DocumentMap,
        existing: &DocumentMap,
    ) -> Result<()> {
        for (slot, descriptor) in documents {
            if existing.get(slot) == Some(descriptor) {
                continue;
            }
            if normalize_slot(Some(slot))? != *slot {
                return Err(AppError::Validation(format!("Invalid document slot: {}", slot)));
            }
            self.documents.check_descriptor(owner_id, descriptor)?;
        }
        Ok(())
    }

    async fn course_name(&self, course_id: &str) -> Result<String> {
        Ok(self
            .storage
            .get_course(course_id)
            .await?
            .map(|course| course.name)
            .unwrap_or_else(|| UNKNOWN_COURSE.to_string()))
    }

    async fn view(&self, application: Application) -> Result<ApplicationView> {
        let course_name = self.course_name(&application.course_id).await?;
        Ok(ApplicationView {
            application,
            course_name,
        })
    }

    async fn views(&self, applications: Vec<Application>) -> Result<Vec<ApplicationView>> {
        let courses: HashMap<String, String> = self
            .storage
            .list_courses()
            .await?
            .into_iter()
            .map(|course| (course.id, course.name))
            .collect();

        Ok(applications
            .into_iter()
            .map(|application| {
                let course_name = courses
                    .get(&application.course_id)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_COURSE.to_string());
                ApplicationView {
                    application,
                    course_name,
                }
            })
            .collect())
    }

    async fn load(&self, id: &str) -> Result<Application> {
        self.storage
            .get_application(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Application".to_string()))
    }

    pub async fn create_application(
        &self,
        submission: ApplicationSubmission,
        actor: &SessionUser,
    ) -> Result<ApplicationView> {
        let course_id = submission.course_id.trim().to_string();
        validate_required(&course_id, &submission.personal_details)?;
        self.check_documents(&actor.id, &submission.documents, &DocumentMap::new())?;

        let now = Utc::now();
        let application = Application {
            id: Uuid::new_v4().to_string(),
            student_id: actor.id.clone(),
            course_id,
            status: ApplicationStatus::Pending,
            personal_details: submission.personal_details,
            academic_details: submission.academic_details,
            documents: submission.documents,
            submitted_at: now,
            updated_at: now,
        };
        self.storage.insert_application(&application).await?;

        log::info!(
            "Application {} submitted by {} for course {}",
            application.id,
            application.student_id,
            application.course_id
        );
        self.view(application).await
    }

    pub async fn get_application(&self, id: &str, actor: &SessionUser) -> Result<ApplicationView> {
        let application = self.load(id).await?;
        if !can_access(&application, actor) {
            return Err(AppError::Forbidden);
        }
        self.view(application).await
    }

    /// Admins see every application, everybody else only their own.
    pub async fn list_applications(&self, actor: &SessionUser) -> Result<Vec<ApplicationView>> {
        let applications = if actor.is_admin() {
            self.storage.list_applications().await?
        } else {
            self.storage.list_applications_for_student(&actor.id).await?
        };
        self.views(applications).await
    }

    /// Owners may edit content but never status; admins may change both.
    /// An echoed current status is not a change. Status moves are
    /// compare-and-set, so a content edit racing a decision never undoes it.
    pub async fn update_application(
        &self,
        id: &str,
        patch: ApplicationPatch,
        actor: &SessionUser,
    ) -> Result<ApplicationView> {
        let mut application = self.load(id).await?;
        if !can_access(&application, actor) {
            return Err(AppError::Forbidden);
        }

        let previous = application.status;
        let next = patch.status.filter(|status| *status != previous);
        if let Some(status) = next {
            if !actor.is_admin() {
                return Err(AppError::Forbidden);
            }
            if previous.is_terminal() {
                return Err(AppError::Conflict(format!(
                    "Application is already {}",
                    previous
                )));
            }
            if !previous.can_transition_to(status) {
                return Err(AppError::Conflict(format!(
                    "Cannot change status from {} to {}",
                    previous, status
                )));
            }
        }

        let touches_content = patch.touches_non_status_fields();
        if touches_content {
            if let Some(course_id) = patch.course_id {
                application.course_id = course_id.trim().to_string();
            }
            if let Some(personal) = patch.personal_details {
                application.personal_details = personal;
            }
            if let Some(academic) = patch.academic_details {
                application.academic_details = academic;
            }
            if let Some(documents) = patch.documents {
                self.check_documents(
                    &application.student_id,
                    &documents,
                    &application.documents,
                )?;
                application.documents = documents;
            }
            validate_required(&application.course_id, &application.personal_details)?;
        }

        let now = Utc::now();
        if let Some(status) = next {
            if !self
                .storage
                .update_application_status(id, previous, status, now)
                .await?
            {
                return Err(AppError::Conflict(
                    "Application status changed meanwhile, reload and retry".to_string(),
                ));
            }
            log::info!(
                "Application {} moved {} -> {} by {}",
                id,
                previous,
                status,
                actor.id
            );
        }

        if touches_content {
            application.updated_at = now;
            if !self.storage.update_application_content(&application).await? {
                return Err(AppError::NotFound("Application".to_string()));
            }
        }

        let current = self.load(id).await?;
        self.view(current).await
    }

    pub async fn update_status(
        &self,
        id: &str,
        status: ApplicationStatus,
        actor: &SessionUser,
    ) -> Result<ApplicationView> {
        let patch = ApplicationPatch {
            status: Some(status),
            ..Default::default()
        };
        self.update_application(id, patch, actor).await
    }

    /// Replace a single document slot, leaving the others untouched.
    pub async fn attach_document(
        &self,
        id: &str,
        slot: &str,
        descriptor: DocumentDescriptor,
        actor: &SessionUser,
    ) -> Result<ApplicationView> {
        let slot = normalize_slot(Some(slot))?;
        let application = self.load(id).await?;
        if !can_access(&application, actor) {
            return Err(AppError::Forbidden);
        }
        self.documents
            .check_descriptor(&application.student_id, &descriptor)?;

        if !self
            .storage
            .set_application_document(id, &slot, &descriptor, Utc::now())
            .await?
        {
            return Err(AppError::NotFound("Application".to_string()));
        }
        log::info!("Document {} attached to application {}", slot, id);

        let current = self.load(id).await?;
        self.view(current).await
    }
}
