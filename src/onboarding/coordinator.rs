//! Onboarding coordinator: drives a session through its gates and into the
//! planning chat.
//!
//! Every action locks the session for its whole duration, works on a draft
//! and commits only after input checks and any remote call have succeeded.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::prompts::{initial_context_message, major_confirmation_message};
use super::verification::VerificationGate;
use crate::bridge::{ConversationBridge, EventSender, TurnResult};
use crate::error::{Error, Result};
use crate::router::{Persona, Router};
use crate::session::{
    ChatEntry, Major, Quarter, Session, SessionKey, SessionStore, Stage, StageKind, Term,
    TurnTrace, model::{MAX_YEAR, MIN_YEAR},
};

/// What the UI needs to render a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub user_id: String,
    pub session_id: String,
    pub stage: StageKind,
    pub progress: f32,
    pub instruction: Option<&'static str>,
    pub student_id: Option<String>,
    pub majors: Vec<Major>,
    pub courses_taken: Vec<String>,
    pub major: Option<Major>,
    pub term: Option<Term>,
    pub desired_courses: Vec<String>,
    pub transcript: Vec<ChatEntry>,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        let stage = session.stage_kind();
        let student = session.stage.student();
        Self {
            user_id: session.key.user_id.clone(),
            session_id: session.key.session_id.clone(),
            stage,
            progress: stage.progress(),
            instruction: stage.instruction(),
            student_id: student.map(|s| s.student_id.clone()),
            majors: student.map(|s| s.majors.clone()).unwrap_or_default(),
            courses_taken: student.map(|s| s.courses_taken.clone()).unwrap_or_default(),
            major: session.stage.major().cloned(),
            term: session.stage.term(),
            desired_courses: session.stage.desired_courses().to_vec(),
            transcript: session.transcript.clone(),
        }
    }
}

/// Reply to a turn sent through the bridge.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub persona: Persona,
    /// Routing rule that picked the persona.
    pub rule: &'static str,
    pub session: SessionView,
}

/// Debug panel contents.
#[derive(Debug, Clone, Serialize)]
pub struct DebugView {
    pub stage: StageKind,
    pub traces: Vec<TurnTrace>,
}

pub struct OnboardingCoordinator {
    store: Arc<SessionStore>,
    gate: VerificationGate,
    router: Router,
    bridge: Arc<ConversationBridge>,
}

impl OnboardingCoordinator {
    pub fn new(
        store: Arc<SessionStore>,
        gate: VerificationGate,
        router: Router,
        bridge: Arc<ConversationBridge>,
    ) -> Self {
        Self {
            store,
            gate,
            router,
            bridge,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Current view of the session, creating it on first access.
    pub async fn status(&self, key: &SessionKey) -> Result<SessionView> {
        let session = self.store.get_or_create(key).await?;
        Ok(SessionView::from(&session))
    }

    /// Step 1: verify the student id.
    ///
    /// Re-verifying the same student refreshes their record in place. A
    /// different student past step 1 restarts onboarding for them.
    pub async fn verify(&self, key: &SessionKey, student_id: &str) -> Result<SessionView> {
        let handle = self.store.handle(key).await?;
        let mut session = handle.lock().await;

        let student = self.gate.verify(student_id).await?.into_student()?;
        let mut draft = session.clone();

        match draft.stage.student_mut() {
            None => {
                draft
                    .advance(Stage::MajorPending { student })
                    .map_err(|e| Error::invalid("stage", e))?;
            }
            Some(current) if current.student_id == student.student_id => {
                *current = student;
            }
            Some(current) => {
                info!(
                    session = %key,
                    previous = %current.student_id,
                    "Different student verified, restarting onboarding"
                );
                self.bridge.reset(key).await?;
                draft.reset_to(Stage::MajorPending { student });
            }
        }

        draft.touch();
        *session = draft;
        info!(session = %key, stage = %session.stage_kind(), "Verification recorded");
        Ok(SessionView::from(&*session))
    }

    /// Step 2: confirm the major, announced to the onboarding persona.
    pub async fn confirm_major(&self, key: &SessionKey, major: &str) -> Result<ChatReply> {
        let major = Major::parse(major).ok_or_else(|| Error::invalid("major", "must not be empty"))?;

        let handle = self.store.handle(key).await?;
        let mut session = handle.lock().await;
        let Stage::MajorPending { student } = &session.stage else {
            return Err(wrong_stage(&session, StageKind::MajorPending));
        };
        let mut draft = session.clone();
        draft
            .advance(Stage::TermPending {
                student: student.clone(),
                major: major.clone(),
            })
            .map_err(|e| Error::invalid("stage", e))?;

        let message = major_confirmation_message(&major);
        let decision = self.router.route(&session, &message)?;
        let result = self
            .bridge
            .send_turn(key, decision.persona, &message, None)
            .await?;

        commit_turn(&mut draft, decision.persona, &message, &result);
        *session = draft;
        info!(session = %key, major = %major, "Major confirmed");
        Ok(reply(&session, decision.persona, decision.rule, result))
    }

    /// Step 3: the quarter and year being planned.
    pub async fn set_term(&self, key: &SessionKey, quarter: &str, year: &str) -> Result<SessionView> {
        let term = parse_term(quarter, year)?;

        let handle = self.store.handle(key).await?;
        let mut session = handle.lock().await;
        let Stage::TermPending { student, major } = &session.stage else {
            return Err(wrong_stage(&session, StageKind::TermPending));
        };

        let mut draft = session.clone();
        draft
            .advance(Stage::CoursesPending {
                student: student.clone(),
                major: major.clone(),
                term,
            })
            .map_err(|e| Error::invalid("stage", e))?;
        draft.touch();
        *session = draft;
        info!(session = %key, term = %term, "Term recorded");
        Ok(SessionView::from(&*session))
    }

    /// Step 4: desired courses. Opens the chat by sending the initial
    /// context as the first turn; nothing is committed if that send fails.
    pub async fn set_courses(
        &self,
        key: &SessionKey,
        courses: &str,
        events: Option<&EventSender>,
    ) -> Result<ChatReply> {
        let desired_courses = parse_courses(courses);
        if desired_courses.is_empty() {
            return Err(Error::invalid("courses", "enter at least one course"));
        }

        let handle = self.store.handle(key).await?;
        let mut session = handle.lock().await;
        let Stage::CoursesPending {
            student,
            major,
            term,
        } = &session.stage
        else {
            return Err(wrong_stage(&session, StageKind::CoursesPending));
        };

        let message = initial_context_message(student, major, *term, &desired_courses);
        let mut draft = session.clone();
        draft
            .advance(Stage::ChatOpen {
                student: student.clone(),
                major: major.clone(),
                term: *term,
                desired_courses,
            })
            .map_err(|e| Error::invalid("stage", e))?;

        let decision = self.router.route_session(&draft)?;
        let result = self
            .bridge
            .send_turn(key, decision.persona, &message, events)
            .await?;

        commit_turn(&mut draft, decision.persona, &message, &result);
        *session = draft;
        info!(session = %key, persona = %decision.persona, "Chat opened");
        Ok(reply(&session, decision.persona, decision.rule, result))
    }

    /// Free chat once onboarding is complete.
    pub async fn chat(
        &self,
        key: &SessionKey,
        message: &str,
        events: Option<&EventSender>,
    ) -> Result<ChatReply> {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::invalid("message", "must not be empty"));
        }

        let handle = self.store.handle(key).await?;
        let mut session = handle.lock().await;
        expect_stage(&session, StageKind::ChatOpen)?;

        let decision = self.router.route(&session, message)?;
        let result = self
            .bridge
            .send_turn(key, decision.persona, message, events)
            .await?;

        commit_turn(&mut session, decision.persona, message, &result);
        Ok(reply(&session, decision.persona, decision.rule, result))
    }

    /// Back to step 1 with an empty conversation. The identifier pair is kept.
    pub async fn reset_onboarding(&self, key: &SessionKey) -> Result<SessionView> {
        let handle = self.store.handle(key).await?;
        let mut session = handle.lock().await;
        self.bridge.reset(key).await?;
        session.reset_to(Stage::Unverified);
        session.touch();
        info!(session = %key, "Onboarding reset");
        Ok(SessionView::from(&*session))
    }

    /// Clear the conversation but keep the onboarding facts and stage.
    pub async fn new_chat(&self, key: &SessionKey) -> Result<SessionView> {
        let handle = self.store.handle(key).await?;
        let mut session = handle.lock().await;
        self.bridge.reset(key).await?;
        session.clear_conversation();
        session.touch();
        info!(session = %key, "Conversation cleared");
        Ok(SessionView::from(&*session))
    }

    pub async fn export_markdown(&self, key: &SessionKey) -> Result<String> {
        Ok(self.store.get_or_create(key).await?.export_markdown())
    }

    pub async fn debug(&self, key: &SessionKey) -> Result<DebugView> {
        let session = self.store.get_or_create(key).await?;
        Ok(DebugView {
            stage: session.stage_kind(),
            traces: session.traces,
        })
    }

    /// Drop the session entirely.
    pub async fn delete(&self, key: &SessionKey) -> bool {
        self.store.remove(key).await
    }
}

fn wrong_stage(session: &Session, expected: StageKind) -> Error {
    Error::WrongStage {
        expected,
        actual: session.stage_kind(),
    }
}

fn expect_stage(session: &Session, expected: StageKind) -> Result<()> {
    if session.stage_kind() == expected {
        Ok(())
    } else {
        Err(wrong_stage(session, expected))
    }
}

fn commit_turn(session: &mut Session, persona: Persona, message: &str, result: &TurnResult) {
    session.record_turn(
        persona.as_str(),
        message,
        &result.final_text,
        TurnTrace {
            persona: persona.to_string(),
            tool_calls: result.tool_calls.clone(),
            tool_responses: result.tool_responses.clone(),
        },
    );
    session.touch();
}

fn reply(session: &Session, persona: Persona, rule: &'static str, result: TurnResult) -> ChatReply {
    ChatReply {
        reply: result.final_text,
        persona,
        rule,
        session: SessionView::from(session),
    }
}

fn parse_term(quarter: &str, year: &str) -> Result<Term> {
    if quarter.trim().is_empty() {
        return Err(Error::invalid("quarter", "must not be empty"));
    }
    let quarter = Quarter::parse(quarter).ok_or_else(|| {
        Error::invalid("quarter", format!("{quarter:?} is not one of Fall, Winter, Spring, Summer"))
    })?;
    let year = year.trim();
    if year.is_empty() {
        return Err(Error::invalid("year", "must not be empty"));
    }
    let year: u16 = year
        .parse()
        .map_err(|_| Error::invalid("year", format!("{year:?} is not a year")))?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(Error::invalid(
            "year",
            format!("must be between {MIN_YEAR} and {MAX_YEAR}"),
        ));
    }
    Ok(Term { quarter, year })
}

/// Split comma/newline separated course codes, dropping blanks and
/// duplicates (first occurrence wins).
pub fn parse_courses(text: &str) -> Vec<String> {
    let mut courses: Vec<String> = Vec::new();
    for course in text.split([',', '\n', '\r']).map(str::trim) {
        if !course.is_empty() && !courses.iter().any(|c| c == course) {
            courses.push(course.to_string());
        }
    }
    courses
}
