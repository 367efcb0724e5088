//! Persona router: picks which specialist fields a chat turn.
//!
//! Rules are evaluated first-match in a fixed order:
//! 1. onboarding still open → STUDENT
//! 2. resource/professor lookup intent → ONLINE
//! 3. confirmed major CS → CS, ME → ME
//!
//! A session at CHAT_OPEN whose major matches no rule is a configuration
//! error for that turn, never a silent default.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Error};
use crate::session::{Major, Session, StageKind};

/// A configured role that receives routed chat turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Persona {
    Cs,
    Me,
    Online,
    Student,
}

impl Persona {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cs => "CS",
            Self::Me => "ME",
            Self::Online => "ONLINE",
            Self::Student => "STUDENT",
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static LOOKUP_INTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(professors?|prof|instructors?|lecturers?|who\s+(teaches|is\s+teaching)|rate\s*my\s*prof\w*|reviews?|ratings?|office\s+hours|websites?|links?|urls?|online|search|look\s*up|lookup|google|web|internet)\b",
    )
    .expect("lookup intent pattern is valid")
});

/// Whether a message asks for an external lookup (professors, reviews,
/// websites, ...).
pub fn has_lookup_intent(message: &str) -> bool {
    LOOKUP_INTENT.is_match(message)
}

type Predicate = Box<dyn Fn(&Session, &str) -> bool + Send + Sync>;

/// A single routing rule.
pub struct RouteRule {
    /// Rule name, reported as the decision's rationale.
    pub name: &'static str,
    pub predicate: Predicate,
    pub persona: Persona,
}

impl RouteRule {
    pub fn new<F>(name: &'static str, persona: Persona, predicate: F) -> Self
    where
        F: Fn(&Session, &str) -> bool + Send + Sync + 'static,
    {
        Self {
            name,
            predicate: Box::new(predicate),
            persona,
        }
    }
}

impl std::fmt::Debug for RouteRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteRule")
            .field("name", &self.name)
            .field("persona", &self.persona)
            .finish()
    }
}

/// The persona chosen for one turn and the rule that chose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub persona: Persona,
    pub rule: &'static str,
}

/// Ordered first-match router.
#[derive(Debug)]
pub struct Router {
    rules: Vec<RouteRule>,
}

impl Router {
    /// The standard rule chain.
    pub fn default_rules() -> Self {
        Self {
            rules: vec![
                RouteRule::new("onboarding", Persona::Student, |session, _| {
                    session.stage_kind() != StageKind::ChatOpen
                }),
                RouteRule::new("resource_lookup", Persona::Online, |_, message| {
                    has_lookup_intent(message)
                }),
                RouteRule::new("cs_major", Persona::Cs, |session, _| {
                    session.stage.major() == Some(&Major::ComputerScience)
                }),
                RouteRule::new("me_major", Persona::Me, |session, _| {
                    session.stage.major() == Some(&Major::MechanicalEngineering)
                }),
            ],
        }
    }

    /// A router with no rules (for testing).
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Insert a rule at `index`, shifting later rules down.
    pub fn insert(&mut self, index: usize, rule: RouteRule) {
        let index = index.min(self.rules.len());
        self.rules.insert(index, rule);
    }

    pub fn push(&mut self, rule: RouteRule) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    /// Choose the persona for `message` in `session`.
    pub fn route(&self, session: &Session, message: &str) -> Result<RoutingDecision, Error> {
        for rule in &self.rules {
            if (rule.predicate)(session, message) {
                debug!(
                    session = %session.key,
                    rule = rule.name,
                    persona = %rule.persona,
                    "Routed turn"
                );
                return Ok(RoutingDecision {
                    persona: rule.persona,
                    rule: rule.name,
                });
            }
        }

        let major = session
            .stage
            .major()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "(none)".to_string());
        Err(ConfigError::UnsupportedMajor(major).into())
    }

    /// Choose the persona for a system-composed message, such as the
    /// initial planning context. Rules that inspect message text see an
    /// empty message, so only the session decides.
    pub fn route_session(&self, session: &Session) -> Result<RoutingDecision, Error> {
        self.route(session, "")
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::default_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Quarter, SessionKey, Stage, Term, VerifiedStudent};

    fn student() -> VerifiedStudent {
        VerifiedStudent {
            student_id: "S123".into(),
            majors: vec![Major::ComputerScience],
            courses_taken: vec![],
        }
    }

    fn chat_open(major: Major) -> Session {
        let mut session = Session::new(SessionKey::new("u", "s"));
        session.stage = Stage::ChatOpen {
            student: student(),
            major,
            term: Term {
                quarter: Quarter::Fall,
                year: 2026,
            },
            desired_courses: vec!["CS101".into()],
        };
        session
    }

    #[test]
    fn chat_open_cs_routes_to_cs() {
        let router = Router::default_rules();
        let decision = router
            .route(&chat_open(Major::ComputerScience), "Can I take CS111 and CS141 together?")
            .unwrap();
        assert_eq!(decision.persona, Persona::Cs);
        assert_eq!(decision.rule, "cs_major");
    }

    #[test]
    fn chat_open_me_routes_to_me() {
        let router = Router::default_rules();
        let decision = router
            .route(&chat_open(Major::MechanicalEngineering), "What should follow ME010?")
            .unwrap();
        assert_eq!(decision.persona, Persona::Me);
    }

    #[test]
    fn lookup_intent_routes_online_regardless_of_major() {
        let router = Router::default_rules();
        for major in [
            Major::ComputerScience,
            Major::MechanicalEngineering,
            Major::Other("Biology".into()),
        ] {
            let decision = router
                .route(&chat_open(major), "Who is the professor for CS153 and are the reviews good?")
                .unwrap();
            assert_eq!(decision.persona, Persona::Online);
            assert_eq!(decision.rule, "resource_lookup");
        }
    }

    #[test]
    fn onboarding_always_routes_to_student() {
        let router = Router::default_rules();
        let mut session = Session::new(SessionKey::new("u", "s"));
        for message in ["hello", "look up professor reviews online", ""] {
            let decision = router.route(&session, message).unwrap();
            assert_eq!(decision.persona, Persona::Student);
            assert_eq!(decision.rule, "onboarding");
        }

        session.stage = Stage::TermPending {
            student: student(),
            major: Major::ComputerScience,
        };
        let decision = router.route(&session, "search the web").unwrap();
        assert_eq!(decision.persona, Persona::Student);
    }

    #[test]
    fn unsupported_major_is_a_configuration_error() {
        let router = Router::default_rules();
        let err = router
            .route(&chat_open(Major::Other("Biology".into())), "Plan my quarter")
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::UnsupportedMajor(ref m)) if m == "Biology"));
    }

    #[test]
    fn empty_router_reports_unsupported_major() {
        let err = Router::empty()
            .route(&Session::new(SessionKey::new("u", "s")), "hi")
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::UnsupportedMajor(ref m)) if m == "(none)"));
    }

    #[test]
    fn inserted_rules_take_priority_by_position() {
        let mut router = Router::default_rules();
        router.insert(
            1,
            RouteRule::new("always_online", Persona::Online, |_, m| m.contains("syllabus")),
        );
        assert_eq!(
            router.rule_names(),
            ["onboarding", "always_online", "resource_lookup", "cs_major", "me_major"]
        );
        let decision = router
            .route(&chat_open(Major::ComputerScience), "Where is the syllabus?")
            .unwrap();
        assert_eq!(decision.rule, "always_online");
    }

    #[test]
    fn session_routing_ignores_message_keywords() {
        let router = Router::default_rules();
        let decision = router.route_session(&chat_open(Major::ComputerScience)).unwrap();
        assert_eq!((decision.persona, decision.rule), (Persona::Cs, "cs_major"));

        let err = router
            .route_session(&chat_open(Major::Other("Biology".into())))
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::UnsupportedMajor(_))));
    }

    #[test]
    fn lookup_intent_keywords() {
        assert!(has_lookup_intent("Who teaches CS100 this fall?"));
        assert!(has_lookup_intent("Can you look up the department website?"));
        assert!(has_lookup_intent("RateMyProfessor score for Dr. Lee"));
        assert!(has_lookup_intent("when are office hours"));
        assert!(!has_lookup_intent("Can I take CS111 and MATH010B together?"));
        assert!(!has_lookup_intent("Suggest a lighter schedule"));
        // word boundaries: "prerequisites" must not match "prof"-style keywords
        assert!(!has_lookup_intent("What are the prerequisites for CS152?"));
    }

    #[test]
    fn persona_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Persona::Online).unwrap(), "\"ONLINE\"");
        assert_eq!(serde_json::to_string(&Persona::Cs).unwrap(), "\"CS\"");
        assert_eq!(Persona::Student.to_string(), "STUDENT");
    }
}
