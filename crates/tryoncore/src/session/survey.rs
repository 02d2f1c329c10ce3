//! Five-question feedback survey offered for credits.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurveyStep {
    Q1,
    Q2,
    Q3,
    Q4,
    Q5,
}

/// What kind of answer a step expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerKind {
    /// 1 to 5
    Rating,
    Choice,
    FreeText,
}

impl SurveyStep {
    pub const ALL: [SurveyStep; 5] = [SurveyStep::Q1, SurveyStep::Q2, SurveyStep::Q3, SurveyStep::Q4, SurveyStep::Q5];

    pub fn phase_name(&self) -> &'static str {
        match self {
            SurveyStep::Q1 => "SURVEY_Q1",
            SurveyStep::Q2 => "SURVEY_Q2",
            SurveyStep::Q3 => "SURVEY_Q3",
            SurveyStep::Q4 => "SURVEY_Q4",
            SurveyStep::Q5 => "SURVEY_Q5",
        }
    }

    pub fn from_phase_name(name: &str) -> Option<Self> {
        SurveyStep::ALL.into_iter().find(|s| s.phase_name() == name)
    }

    /// Short id used in callback data, e.g. `q3`
    pub fn id(&self) -> &'static str {
        match self {
            SurveyStep::Q1 => "q1",
            SurveyStep::Q2 => "q2",
            SurveyStep::Q3 => "q3",
            SurveyStep::Q4 => "q4",
            SurveyStep::Q5 => "q5",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        SurveyStep::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn next(&self) -> Option<SurveyStep> {
        match self {
            SurveyStep::Q1 => Some(SurveyStep::Q2),
            SurveyStep::Q2 => Some(SurveyStep::Q3),
            SurveyStep::Q3 => Some(SurveyStep::Q4),
            SurveyStep::Q4 => Some(SurveyStep::Q5),
            SurveyStep::Q5 => None,
        }
    }

    pub fn answer_kind(&self) -> AnswerKind {
        match self {
            SurveyStep::Q1 | SurveyStep::Q2 | SurveyStep::Q4 => AnswerKind::Rating,
            SurveyStep::Q3 => AnswerKind::Choice,
            SurveyStep::Q5 => AnswerKind::FreeText,
        }
    }

    /// i18n key of the question text
    pub fn question_key(&self) -> &'static str {
        match self {
            SurveyStep::Q1 => "survey-q1",
            SurveyStep::Q2 => "survey-q2",
            SurveyStep::Q3 => "survey-q3",
            SurveyStep::Q4 => "survey-q4",
            SurveyStep::Q5 => "survey-q5",
        }
    }
}

/// Main frustration options for Q3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frustration {
    Quality,
    Speed,
    Price,
    Ux,
    Other,
}

impl Frustration {
    pub const ALL: [Frustration; 5] = [
        Frustration::Quality,
        Frustration::Speed,
        Frustration::Price,
        Frustration::Ux,
        Frustration::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Frustration::Quality => "quality",
            Frustration::Speed => "speed",
            Frustration::Price => "price",
            Frustration::Ux => "ux",
            Frustration::Other => "other",
        }
    }
}

impl FromStr for Frustration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Frustration::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("Unknown frustration: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurveyAnswer {
    Rating(u8),
    Choice(Frustration),
    Text(String),
}

impl SurveyAnswer {
    /// Parses the value part of a `survey_<step>_<value>` button
    pub fn parse_for(step: SurveyStep, value: &str) -> Option<SurveyAnswer> {
        match step.answer_kind() {
            AnswerKind::Rating => value
                .parse::<u8>()
                .ok()
                .filter(|r| (1..=5).contains(r))
                .map(SurveyAnswer::Rating),
            AnswerKind::Choice => value.parse().ok().map(SurveyAnswer::Choice),
            AnswerKind::FreeText => {
                let text = value.trim();
                (!text.is_empty()).then(|| SurveyAnswer::Text(text.chars().take(1000).collect()))
            }
        }
    }
}

/// Answers collected so far, stored on the session as JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyAnswers {
    pub satisfaction: Option<u8>,
    pub realism: Option<u8>,
    pub frustration: Option<Frustration>,
    pub value_for_money: Option<u8>,
    pub willingness_to_pay: Option<String>,
}

/// A fully answered survey
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedSurvey {
    pub satisfaction: u8,
    pub realism: u8,
    pub frustration: Frustration,
    pub value_for_money: u8,
    pub willingness_to_pay: String,
}

impl SurveyAnswers {
    /// Stores `answer` for `step`; returns false when the answer does not fit the step.
    pub fn record(&mut self, step: SurveyStep, answer: SurveyAnswer) -> bool {
        match (step, answer) {
            (SurveyStep::Q1, SurveyAnswer::Rating(r)) => self.satisfaction = Some(r),
            (SurveyStep::Q2, SurveyAnswer::Rating(r)) => self.realism = Some(r),
            (SurveyStep::Q3, SurveyAnswer::Choice(c)) => self.frustration = Some(c),
            (SurveyStep::Q4, SurveyAnswer::Rating(r)) => self.value_for_money = Some(r),
            (SurveyStep::Q5, SurveyAnswer::Text(t)) => self.willingness_to_pay = Some(t),
            _ => return false,
        }
        true
    }

    pub fn complete(&self) -> Option<CompletedSurvey> {
        Some(CompletedSurvey {
            satisfaction: self.satisfaction?,
            realism: self.realism?,
            frustration: self.frustration?,
            value_for_money: self.value_for_money?,
            willingness_to_pay: self.willingness_to_pay.clone()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == SurveyAnswers::default()
    }
}
