//! Per-chat session state: phases, credits, look items and the survey sub-flow

pub mod machine;
pub mod survey;
pub mod types;

pub use machine::{
    current_month_key, CreditRules, GenerationTicket, ResetOutcome, SessionStateMachine, StartRefusal, SurveyProgress,
    SurveyStart, UserMeta,
};
pub use survey::{Frustration, SurveyAnswer, SurveyAnswers, SurveyStep};
pub use types::{ChatSession, CreditBalance, Gender, GenderTag, ItemCategory, LookItem, ModelPhotoPolicy, Phase};
