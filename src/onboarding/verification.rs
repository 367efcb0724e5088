//! Student verification gate.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::lookup::{StudentLookup, encode_student_id};
use crate::session::{Major, VerifiedStudent};

/// Outcome of one lookup. A miss has `found == false` and no record data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub found: bool,
    pub student_id: String,
    pub majors: Vec<Major>,
    pub courses_taken: Vec<String>,
}

impl VerificationResult {
    /// The student's primary major, if the record has one.
    pub fn major(&self) -> Option<&Major> {
        self.majors.first()
    }

    /// The verified student, or `Error::NotFound` for a miss.
    pub fn into_student(self) -> Result<VerifiedStudent> {
        if !self.found {
            return Err(Error::NotFound {
                student_id: self.student_id,
            });
        }
        Ok(VerifiedStudent {
            student_id: self.student_id,
            majors: self.majors,
            courses_taken: self.courses_taken,
        })
    }
}

pub struct VerificationGate {
    lookup: Arc<dyn StudentLookup>,
}

impl VerificationGate {
    pub fn new(lookup: Arc<dyn StudentLookup>) -> Self {
        Self { lookup }
    }

    /// Look up `student_id`. Blank input and lookup outages are errors; a
    /// missing record is a result with `found == false`.
    pub async fn verify(&self, student_id: &str) -> Result<VerificationResult> {
        let student_id = student_id.trim();
        if student_id.is_empty() {
            return Err(Error::invalid("student_id", "must not be empty"));
        }

        let Some(record) = self.lookup.find(&encode_student_id(student_id)).await? else {
            info!(student_id, "Student not found");
            return Ok(VerificationResult {
                found: false,
                student_id: student_id.to_string(),
                majors: Vec::new(),
                courses_taken: Vec::new(),
            });
        };

        let majors: Vec<Major> = record
            .majors
            .iter()
            .filter_map(|m| Major::parse(m))
            .collect();
        info!(
            student_id,
            majors = majors.len(),
            courses = record.course_history.len(),
            "Student verified"
        );
        Ok(VerificationResult {
            found: true,
            student_id: student_id.to_string(),
            majors,
            courses_taken: record.course_history,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::CollaboratorError;
    use crate::lookup::StudentRecord;

    /// Knows "S123" (CS) and fails for "DOWN".
    struct StubLookup;

    #[async_trait]
    impl StudentLookup for StubLookup {
        async fn find(&self, encoded_id: &str) -> Result<Option<StudentRecord>> {
            if encoded_id == encode_student_id("DOWN") {
                return Err(CollaboratorError::LookupUnavailable("timeout".into()).into());
            }
            Ok((encoded_id == encode_student_id("S123")).then(|| StudentRecord {
                majors: vec!["Computer Science".into(), "Math".into()],
                course_history: vec!["CS010A".into()],
            }))
        }
    }

    fn gate() -> VerificationGate {
        VerificationGate::new(Arc::new(StubLookup))
    }

    #[tokio::test]
    async fn known_student_is_verified() {
        let result = gate().verify("  S123 ").await.unwrap();
        assert!(result.found);
        assert_eq!(result.student_id, "S123");
        assert_eq!(result.major(), Some(&Major::ComputerScience));
        assert_eq!(result.majors[1], Major::Other("Math".into()));
        assert_eq!(result.courses_taken, vec!["CS010A"]);
    }

    #[tokio::test]
    async fn unknown_student_is_not_found() {
        let result = gate().verify("S999").await.unwrap();
        assert!(!result.found);
        assert!(result.majors.is_empty() && result.courses_taken.is_empty());

        let err = result.into_student().unwrap_err();
        assert!(matches!(err, Error::NotFound { ref student_id } if student_id == "S999"));
        assert_eq!(err.user_message(), "Student ID not recognized.");
    }

    #[tokio::test]
    async fn blank_id_is_rejected_before_lookup() {
        let err = gate().verify("   ").await.unwrap_err();
        assert!(matches!(err, Error::InputValidation { .. }));
    }

    #[tokio::test]
    async fn lookup_outage_is_retryable() {
        let err = gate().verify("DOWN").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
