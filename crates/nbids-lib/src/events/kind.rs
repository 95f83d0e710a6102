use crate::config::AlignmentConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event types produced by the task, with their trigger codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    Cue,
    Response,
    Feedback,
    Questions,
    Answers,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Start,
        EventKind::Cue,
        EventKind::Response,
        EventKind::Feedback,
        EventKind::Questions,
        EventKind::Answers,
    ];

    pub fn id(self) -> i64 {
        match self {
            EventKind::Start => 1,
            EventKind::Cue => 5,
            EventKind::Response => 10,
            EventKind::Feedback => 15,
            EventKind::Questions => 20,
            EventKind::Answers => 25,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Cue => "cue",
            EventKind::Response => "response",
            EventKind::Feedback => "feedback",
            EventKind::Questions => "questions",
            EventKind::Answers => "answers",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "start" => Some(EventKind::Start),
            "cue" => Some(EventKind::Cue),
            "response" | "resp" => Some(EventKind::Response),
            "feedback" | "feedb" => Some(EventKind::Feedback),
            "questions" | "question" | "quest" => Some(EventKind::Questions),
            "answers" | "answer" | "answ" => Some(EventKind::Answers),
            _ => None,
        }
    }

    /// Aligned behavior column used as this event's reference time.
    pub fn behavior_column(self) -> Option<&'static str> {
        match self {
            EventKind::Start => None,
            EventKind::Cue => Some("cue_time"),
            EventKind::Response => Some("response_time"),
            EventKind::Feedback => Some("feedback_time"),
            EventKind::Questions => Some("questions_time"),
            EventKind::Answers => Some("answers_time"),
        }
    }

    pub fn count_rule(self, cfg: &AlignmentConfig) -> CountRule {
        match self {
            EventKind::Start => CountRule::Exactly(1),
            EventKind::Cue | EventKind::Response | EventKind::Feedback => {
                CountRule::AtLeast(cfg.trial_min_count)
            }
            EventKind::Questions | EventKind::Answers => CountRule::AtLeast(cfg.question_min_count),
        }
    }

    /// Only cue and feedback onsets follow deterministically from a behavior
    /// column, so only they can be rebuilt when triggers are lost.
    pub fn reconstructible(self) -> bool {
        matches!(self, EventKind::Cue | EventKind::Feedback)
    }

    /// Types whose inter-event timing is cross-checked against behavior.
    pub fn timing_checked(self) -> bool {
        matches!(
            self,
            EventKind::Cue | EventKind::Response | EventKind::Feedback
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CountRule {
    Exactly(usize),
    AtLeast(usize),
}

impl CountRule {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            CountRule::Exactly(n) => count == n,
            CountRule::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for CountRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountRule::Exactly(n) => write!(f, "== {n}"),
            CountRule::AtLeast(n) => write!(f, ">= {n}"),
        }
    }
}
