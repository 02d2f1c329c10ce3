//! Transport-neutral keyboards shared by the router and photo intake.

use crate::core::types::Language;
use crate::i18n;
use crate::messenger::{Button, Markup};
use crate::payments;
use crate::session::survey::{AnswerKind, Frustration, SurveyStep};

/// Inline language picker, one language per row
pub fn language_picker() -> Markup {
    Markup::column(
        Language::ALL
            .iter()
            .map(|lang| Button::new(lang.display_name(), format!("lang_{}", lang.as_str())))
            .collect(),
    )
}

/// Persistent reply-keyboard menu
pub fn main_menu(lang: Language) -> Markup {
    Markup::Menu(vec![
        vec![i18n::t(lang, "generate-button")],
        vec![i18n::t(lang, "menu-balance"), i18n::t(lang, "menu-reset")],
        vec![i18n::t(lang, "menu-change-model"), i18n::t(lang, "menu-change-language")],
    ])
}

pub fn generate_button(lang: Language) -> Markup {
    Markup::column(vec![Button::new(i18n::t(lang, "generate-button"), "generate_look")])
}

/// Credit packages plus, when offered, the survey-for-credits button
pub fn low_credits(lang: Language, offer_survey: bool) -> Markup {
    let mut buttons = payments::package_buttons(lang);
    if offer_survey {
        buttons.push(Button::new(i18n::t(lang, "survey-offer-button"), "survey_start"));
    }
    Markup::column(buttons)
}

/// Answer buttons for one survey question; the free-text step has none.
pub fn survey_question(lang: Language, step: SurveyStep) -> Markup {
    match step.answer_kind() {
        AnswerKind::Rating => Markup::Inline(vec![(1..=5)
            .map(|r| Button::new(r.to_string(), format!("survey_{}_{}", step.id(), r)))
            .collect()]),
        AnswerKind::Choice => Markup::column(
            Frustration::ALL
                .iter()
                .map(|f| {
                    Button::new(
                        i18n::t(lang, &format!("frustration-{}", f.as_str())),
                        format!("survey_{}_{}", step.id(), f.as_str()),
                    )
                })
                .collect(),
        ),
        AnswerKind::FreeText => Markup::RemoveMenu,
    }
}
