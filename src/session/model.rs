//! Session data model: identity, onboarding stage and transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identity ────────────────────────────────────────────────────────────

/// The `(user_id, session_id)` pair keying both local state and the
/// runner's conversation memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Mint a fresh pair for a new browser session.
    pub fn generate(user_id: impl Into<String>) -> Self {
        Self::new(user_id, format!("ui-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.session_id)
    }
}

// ── Major / Term ────────────────────────────────────────────────────────

/// A student's major. Only CS and ME have specialist personas; anything
/// else is carried as `Other` and rejected at routing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Major {
    ComputerScience,
    MechanicalEngineering,
    Other(String),
}

impl Major {
    /// Parse free text. Returns `None` for blank input.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        let normalized = trimmed
            .to_ascii_lowercase()
            .replace(['.', '-', '_'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let major = match normalized.as_str() {
            "cs" | "computer science" | "comp sci" | "compsci" | "bs cs" | "cs major" => {
                Self::ComputerScience
            }
            "me" | "mechanical engineering" | "mech e" | "meche" | "mechanical" | "me major" => {
                Self::MechanicalEngineering
            }
            _ => Self::Other(trimmed.to_string()),
        };
        Some(major)
    }

    /// Short code shown to the user and the model.
    pub fn code(&self) -> &str {
        match self {
            Self::ComputerScience => "CS",
            Self::MechanicalEngineering => "ME",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl std::fmt::Display for Major {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quarter {
    Fall,
    Winter,
    Spring,
    Summer,
}

impl Quarter {
    pub const ALL: [Quarter; 4] = [Self::Fall, Self::Winter, Self::Spring, Self::Summer];

    pub fn parse(input: &str) -> Option<Self> {
        let lower = input.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|q| q.to_string().to_ascii_lowercase() == lower)
    }
}

impl std::fmt::Display for Quarter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fall => "Fall",
            Self::Winter => "Winter",
            Self::Spring => "Spring",
            Self::Summer => "Summer",
        };
        write!(f, "{s}")
    }
}

/// Earliest and latest planning year accepted by the term gate.
pub const MIN_YEAR: u16 = 2000;
pub const MAX_YEAR: u16 = 2100;

/// The quarter being planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub quarter: Quarter,
    pub year: u16,
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.quarter, self.year)
    }
}

// ── Stage ───────────────────────────────────────────────────────────────

/// The onboarding stages, without their data.
///
/// Progresses linearly: Unverified → MajorPending → TermPending →
/// CoursesPending → ChatOpen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Unverified,
    MajorPending,
    TermPending,
    CoursesPending,
    ChatOpen,
}

impl StageKind {
    /// Check if a forward transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: StageKind) -> bool {
        use StageKind::*;
        matches!(
            (self, target),
            (Unverified, MajorPending)
                | (MajorPending, TermPending)
                | (TermPending, CoursesPending)
                | (CoursesPending, ChatOpen)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ChatOpen)
    }

    pub fn next(&self) -> Option<StageKind> {
        use StageKind::*;
        match self {
            Unverified => Some(MajorPending),
            MajorPending => Some(TermPending),
            TermPending => Some(CoursesPending),
            CoursesPending => Some(ChatOpen),
            ChatOpen => None,
        }
    }

    /// Fraction of onboarding completed, for the progress bar.
    pub fn progress(&self) -> f32 {
        match self {
            Self::Unverified => 0.2,
            Self::MajorPending => 0.4,
            Self::TermPending => 0.6,
            Self::CoursesPending => 0.8,
            Self::ChatOpen => 1.0,
        }
    }

    /// Instruction line shown above the chat while onboarding is open.
    pub fn instruction(&self) -> Option<&'static str> {
        match self {
            Self::Unverified => Some("Step 1: Verify your Student ID."),
            Self::MajorPending => {
                Some("Step 2: Confirm your major (we'll route you to the right advisor).")
            }
            Self::TermPending => Some("Step 3: Enter the quarter and year you're planning for."),
            Self::CoursesPending => {
                Some("Step 4: Enter the courses you want, then start the chat.")
            }
            Self::ChatOpen => None,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unverified => "unverified",
            Self::MajorPending => "major_pending",
            Self::TermPending => "term_pending",
            Self::CoursesPending => "courses_pending",
            Self::ChatOpen => "chat_open",
        };
        write!(f, "{s}")
    }
}

/// Facts established by a successful verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedStudent {
    pub student_id: String,
    /// Majors listed on the student's record, in record order.
    pub majors: Vec<Major>,
    pub courses_taken: Vec<String>,
}

/// Onboarding stage together with exactly the facts valid at that stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    Unverified,
    MajorPending {
        student: VerifiedStudent,
    },
    TermPending {
        student: VerifiedStudent,
        major: Major,
    },
    CoursesPending {
        student: VerifiedStudent,
        major: Major,
        term: Term,
    },
    ChatOpen {
        student: VerifiedStudent,
        major: Major,
        term: Term,
        desired_courses: Vec<String>,
    },
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Unverified => StageKind::Unverified,
            Self::MajorPending { .. } => StageKind::MajorPending,
            Self::TermPending { .. } => StageKind::TermPending,
            Self::CoursesPending { .. } => StageKind::CoursesPending,
            Self::ChatOpen { .. } => StageKind::ChatOpen,
        }
    }

    pub fn student(&self) -> Option<&VerifiedStudent> {
        match self {
            Self::Unverified => None,
            Self::MajorPending { student }
            | Self::TermPending { student, .. }
            | Self::CoursesPending { student, .. }
            | Self::ChatOpen { student, .. } => Some(student),
        }
    }

    pub fn student_mut(&mut self) -> Option<&mut VerifiedStudent> {
        match self {
            Self::Unverified => None,
            Self::MajorPending { student }
            | Self::TermPending { student, .. }
            | Self::CoursesPending { student, .. }
            | Self::ChatOpen { student, .. } => Some(student),
        }
    }

    /// The confirmed major, once past the major gate.
    pub fn major(&self) -> Option<&Major> {
        match self {
            Self::TermPending { major, .. }
            | Self::CoursesPending { major, .. }
            | Self::ChatOpen { major, .. } => Some(major),
            _ => None,
        }
    }

    pub fn term(&self) -> Option<Term> {
        match self {
            Self::CoursesPending { term, .. } | Self::ChatOpen { term, .. } => Some(*term),
            _ => None,
        }
    }

    pub fn desired_courses(&self) -> &[String] {
        match self {
            Self::ChatOpen {
                desired_courses, ..
            } => desired_courses,
            _ => &[],
        }
    }
}

// ── Transcript ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Assistant => write!(f, "Assistant"),
        }
    }
}

/// One bubble in the chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: ChatRole,
    pub content: String,
    /// Persona that handled the turn.
    pub persona: String,
    pub ts: DateTime<Utc>,
}

/// Tool activity captured for a turn, for the debug panel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnTrace {
    pub persona: String,
    pub tool_calls: Vec<serde_json::Value>,
    pub tool_responses: Vec<serde_json::Value>,
}

// ── Session ─────────────────────────────────────────────────────────────

/// One browser session's onboarding facts and conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub stage: Stage,
    pub transcript: Vec<ChatEntry>,
    pub traces: Vec<TurnTrace>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            stage: Stage::Unverified,
            transcript: Vec::new(),
            traces: Vec::new(),
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn stage_kind(&self) -> StageKind {
        self.stage.kind()
    }

    /// Replace the stage, enforcing forward-only single-step movement.
    ///
    /// Regression goes through [`Session::reset_to`] instead.
    pub fn advance(&mut self, next: Stage) -> Result<StageKind, String> {
        let from = self.stage.kind();
        let to = next.kind();
        if !from.can_transition_to(to) {
            return Err(format!("Cannot transition from {from} to {to}"));
        }
        self.stage = next;
        Ok(to)
    }

    /// Explicit reset: the only way a stage moves backwards.
    pub fn reset_to(&mut self, stage: Stage) {
        self.stage = stage;
        self.clear_conversation();
    }

    pub fn clear_conversation(&mut self) {
        self.transcript.clear();
        self.traces.clear();
    }

    /// Record a completed turn: the user's message and the reply.
    pub fn record_turn(&mut self, persona: &str, message: &str, reply: &str, trace: TurnTrace) {
        let now = Utc::now();
        self.transcript.push(ChatEntry {
            role: ChatRole::User,
            content: message.to_string(),
            persona: persona.to_string(),
            ts: now,
        });
        self.transcript.push(ChatEntry {
            role: ChatRole::Assistant,
            content: reply.to_string(),
            persona: persona.to_string(),
            ts: now,
        });
        self.traces.push(trace);
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    /// Render the transcript as a Markdown document.
    pub fn export_markdown(&self) -> String {
        let mut parts = vec![format!(
            "# Schedule Recommender Chat Export\n\nExported: {}\n",
            Utc::now().to_rfc3339()
        )];
        for entry in &self.transcript {
            parts.push(format!(
                "## {} ({})\n\n{}\n",
                entry.role,
                entry.ts.format("%H:%M:%S"),
                entry.content
            ));
        }
        parts.join("\n")
    }
}
