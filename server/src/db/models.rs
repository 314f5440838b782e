/// Data models for database operations.
/// Represents users, courses, applications, conversations, messages,
/// verification codes and sessions, plus the request/response DTOs
/// the REST handlers exchange.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Current layout version of the JSON detail blocks stored on an application.
pub const DETAILS_SCHEMA_VERSION: i64 = 1;

/// Sender id reserved for automated chat replies.
pub const SYSTEM_SENDER: &str = "system";

/// Raised when a stored enum column holds a value this build does not know.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Admin,
    Support,
}

string_enum!(Role, "role", {
    Student => "student",
    Admin => "admin",
    Support => "support",
});

impl Role {
    /// Admins and support staff may join any conversation.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Support)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
}

string_enum!(ApplicationStatus, "application status", {
    Pending => "pending",
    UnderReview => "under_review",
    Approved => "approved",
    Rejected => "rejected",
});

impl ApplicationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ApplicationStatus::Approved | ApplicationStatus::Rejected)
    }

    /// Staff-driven transitions only ever move forward. Re-applying the
    /// current status is accepted as a no-op.
    pub fn can_transition_to(&self, next: ApplicationStatus) -> bool {
        use ApplicationStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, UnderReview) | (Pending, Approved) | (Pending, Rejected)
                | (UnderReview, Approved)
                | (UnderReview, Rejected)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Pending,
    Closed,
}

string_enum!(ConversationStatus, "conversation status", {
    Open => "open",
    Pending => "pending",
    Closed => "closed",
});

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub duration: Option<String>,
    pub degree: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
    pub description: Option<String>,
    pub duration: Option<String>,
    pub degree: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoursePatch {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub duration: Option<String>,
    pub degree: Option<String>,
}

/// Step 1 and 2 of the admission form: identity, contact and address.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonalDetails {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub date_of_birth: String,
    pub gender: String,
    pub mobile_number: String,
    pub alternate_mobile_number: Option<String>,
    pub email: String,
    #[serde(alias = "aadhaarNumber")]
    pub national_id: String,
    pub nationality: String,
    pub religion: Option<String>,
    pub category: String,
    pub permanent_address: String,
    pub temporary_address: Option<String>,
    pub state: String,
    pub district: String,
    pub city: String,
    pub pincode: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardianDetails {
    pub father_name: String,
    pub father_phone: String,
    pub father_occupation: Option<String>,
    pub father_income: Option<String>,
    pub mother_name: String,
    pub mother_phone: String,
    pub mother_occupation: Option<String>,
    pub mother_income: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_relation: Option<String>,
    pub guardian_phone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SchoolRecord {
    pub school_name: String,
    pub board: String,
    pub passing_year: String,
    pub stream: Option<String>,
    pub percentage: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GraduationRecord {
    pub college: String,
    pub degree: String,
    pub branch: Option<String>,
    pub mode: Option<String>,
    pub year: String,
    pub percentage: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EducationHistory {
    pub tenth: SchoolRecord,
    pub twelfth: SchoolRecord,
    pub graduation: Option<GraduationRecord>,
}

/// Steps 3 to 5 of the admission form: guardians, prior education and the
/// chosen specialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AcademicDetails {
    pub guardian: GuardianDetails,
    pub education: EducationHistory,
    pub course_specialization: Option<String>,
    pub course_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDescriptor {
    #[serde(alias = "name")]
    pub file_name: String,
    #[serde(alias = "size")]
    pub size_bytes: u64,
    pub url: String,
}

/// Slot name -> uploaded file. Ordered so serialized output is stable.
pub type DocumentMap = BTreeMap<String, DocumentDescriptor>;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub status: ApplicationStatus,
    pub personal_details: PersonalDetails,
    pub academic_details: AcademicDetails,
    pub documents: DocumentMap,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub student_id: String,
    pub support_staff_id: Option<String>,
    pub subject: String,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_automated(&self) -> bool {
        self.sender_id == SYSTEM_SENDER
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationCode {
    pub id: String,
    pub email: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// Request/Response DTOs
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub full_name: String,
    pub role: Option<Role>,
    pub verification_ticket: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmailAvailabilityResponse {
    pub available: bool,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendCodeRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendCodeResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyCodeRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyCodeResponse {
    pub success: bool,
    pub message: String,
    pub verification_ticket: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSubmission {
    #[serde(default)]
    pub course_id: String,
    #[serde(default)]
    pub personal_details: PersonalDetails,
    #[serde(default)]
    pub academic_details: AcademicDetails,
    #[serde(default)]
    pub documents: DocumentMap,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationPatch {
    pub status: Option<ApplicationStatus>,
    pub course_id: Option<String>,
    pub personal_details: Option<PersonalDetails>,
    pub academic_details: Option<AcademicDetails>,
    pub documents: Option<DocumentMap>,
}

impl ApplicationPatch {
    pub fn touches_non_status_fields(&self) -> bool {
        self.course_id.is_some()
            || self.personal_details.is_some()
            || self.academic_details.is_some()
            || self.documents.is_some()
    }
}

/// An application as shown to clients, with the course name resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationView {
    #[serde(flatten)]
    pub application: Application,
    pub course_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub file_name: String,
    pub size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartConversationRequest {
    #[serde(default)]
    pub subject: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageResponse {
    pub user_message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_message: Option<Message>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestSessionRequest {
    pub guest_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestSessionResponse {
    pub guest_id: String,
    pub guest_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignStaffRequest {
    pub support_staff_id: Option<String>,
}

/// Admin inbox row: the conversation with its transcript and the student
/// behind it (absent for guests).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationThread {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<Message>,
    pub student: Option<User>,
}
