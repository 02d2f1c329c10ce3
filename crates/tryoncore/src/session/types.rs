use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::{AppError, AppResult};
use crate::core::types::{ImageRef, Language};
use crate::impl_text_column;
use crate::session::survey::{SurveyAnswers, SurveyStep};

/// Where a chat currently is in the try-on flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    #[default]
    New,
    AwaitingLanguage,
    AwaitingModelImage,
    AwaitingOutfits,
    Generating,
    Completed,
    Survey(SurveyStep),
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::New => "NEW",
            Phase::AwaitingLanguage => "AWAITING_LANGUAGE",
            Phase::AwaitingModelImage => "AWAITING_MODEL_IMAGE",
            Phase::AwaitingOutfits => "AWAITING_OUTFITS",
            Phase::Generating => "GENERATING",
            Phase::Completed => "COMPLETED",
            Phase::Survey(step) => step.phase_name(),
        }
    }

    /// Phases in which a generate trigger is accepted
    pub fn accepts_generation(&self) -> bool {
        matches!(self, Phase::AwaitingOutfits | Phase::Completed)
    }

    /// Phases in which photos are look items
    pub fn accepts_outfits(&self) -> bool {
        matches!(self, Phase::AwaitingOutfits | Phase::Completed)
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Phase::New),
            "AWAITING_LANGUAGE" => Ok(Phase::AwaitingLanguage),
            "AWAITING_MODEL_IMAGE" => Ok(Phase::AwaitingModelImage),
            "AWAITING_OUTFITS" => Ok(Phase::AwaitingOutfits),
            "GENERATING" => Ok(Phase::Generating),
            "COMPLETED" => Ok(Phase::Completed),
            other => SurveyStep::from_phase_name(other)
                .map(Phase::Survey)
                .ok_or_else(|| format!("Unknown phase: {}", other)),
        }
    }
}

impl_text_column!(Phase);

/// What a clothing photo contributes to the look
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    Outfit,
    Top,
    Bottom,
    Shoes,
    Handbag,
    Hat,
    Accessory,
    Background,
    Unknown,
}

impl ItemCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemCategory::Outfit => "outfit",
            ItemCategory::Top => "top",
            ItemCategory::Bottom => "bottom",
            ItemCategory::Shoes => "shoes",
            ItemCategory::Handbag => "handbag",
            ItemCategory::Hat => "hat",
            ItemCategory::Accessory => "accessory",
            ItemCategory::Background => "background",
            ItemCategory::Unknown => "unknown",
        }
    }

    /// Items photographed on their own that benefit from background removal
    pub fn wants_background_removal(&self) -> bool {
        matches!(
            self,
            ItemCategory::Outfit | ItemCategory::Shoes | ItemCategory::Hat | ItemCategory::Accessory | ItemCategory::Handbag
        )
    }

    pub fn is_background(&self) -> bool {
        matches!(self, ItemCategory::Background)
    }
}

impl FromStr for ItemCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outfit" | "dress" | "full_outfit" => Ok(ItemCategory::Outfit),
            "top" => Ok(ItemCategory::Top),
            "bottom" | "pants" => Ok(ItemCategory::Bottom),
            "shoes" | "footwear" => Ok(ItemCategory::Shoes),
            "handbag" | "bag" => Ok(ItemCategory::Handbag),
            "hat" | "headwear" => Ok(ItemCategory::Hat),
            "accessory" => Ok(ItemCategory::Accessory),
            "background" => Ok(ItemCategory::Background),
            "unknown" => Ok(ItemCategory::Unknown),
            other => Err(format!("Unknown item category: {}", other)),
        }
    }
}

impl_text_column!(ItemCategory);

/// Gender inferred for the model photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "man" => Ok(Gender::Male),
            "female" | "woman" => Ok(Gender::Female),
            other => Err(format!("Unknown gender: {}", other)),
        }
    }
}

impl_text_column!(Gender);

/// Gender an item is designed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderTag {
    Male,
    Female,
    #[default]
    Unisex,
}

impl GenderTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenderTag::Male => "male",
            GenderTag::Female => "female",
            GenderTag::Unisex => "unisex",
        }
    }

    /// Unisex items fit anyone; a model of unknown gender accepts everything.
    pub fn compatible_with(&self, model: Option<Gender>) -> bool {
        match (self, model) {
            (GenderTag::Unisex, _) | (_, None) => true,
            (GenderTag::Male, Some(g)) => g == Gender::Male,
            (GenderTag::Female, Some(g)) => g == Gender::Female,
        }
    }
}

impl FromStr for GenderTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "man" => Ok(GenderTag::Male),
            "female" | "woman" => Ok(GenderTag::Female),
            "unisex" | "" => Ok(GenderTag::Unisex),
            other => Err(format!("Unknown gender tag: {}", other)),
        }
    }
}

impl_text_column!(GenderTag);

/// How much of the body a model photo must show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelPhotoPolicy {
    /// Head to at least the knees
    #[default]
    FullBody,
    /// Head to at least the waist
    WaistUp,
}

impl ModelPhotoPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelPhotoPolicy::FullBody => "full_body",
            ModelPhotoPolicy::WaistUp => "waist_up",
        }
    }

    /// Requirement sentence given to the validator
    pub fn requirement(&self) -> &'static str {
        match self {
            ModelPhotoPolicy::FullBody => {
                "The photo must show exactly one real person, visible from the head down to at least the knees, ideally to the ankles."
            }
            ModelPhotoPolicy::WaistUp => {
                "The photo must show exactly one real person, visible from the head down to at least the waist."
            }
        }
    }
}

impl FromStr for ModelPhotoPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full_body" => Ok(ModelPhotoPolicy::FullBody),
            "waist_up" => Ok(ModelPhotoPolicy::WaistUp),
            other => Err(format!("Unknown model photo policy: {}", other)),
        }
    }
}

/// One accepted clothing or accessory photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookItem {
    pub id: String,
    pub category: ItemCategory,
    pub description: String,
    pub image_ref: ImageRef,
    pub contains_person: bool,
    pub gender: GenderTag,
}

/// Stored credit balance; a value that is not a non-negative integer is kept as `Corrupt`
/// so the problem surfaces when someone tries to spend it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditBalance {
    Valid(i64),
    Corrupt(String),
}

impl CreditBalance {
    pub fn checked(&self, chat_id: i64) -> AppResult<i64> {
        match self {
            CreditBalance::Valid(n) => Ok(*n),
            CreditBalance::Corrupt(raw) => Err(AppError::CorruptBalance {
                chat_id,
                raw: raw.clone(),
            }),
        }
    }

    /// Balance for display; `None` when corrupt
    pub fn shown(&self) -> Option<i64> {
        match self {
            CreditBalance::Valid(n) => Some(*n),
            CreditBalance::Corrupt(_) => None,
        }
    }
}

/// Durable per-chat state
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    pub chat_id: i64,
    pub phase: Phase,
    pub language: Option<Language>,
    pub credits: CreditBalance,
    pub model_image: Option<ImageRef>,
    pub original_model_image: Option<ImageRef>,
    pub model_gender: Option<Gender>,
    pub outfit_items: Vec<LookItem>,
    /// Month key `YYYY-MM` of the last automatic grant
    pub last_monthly_grant: Option<String>,
    /// Free text the user wants applied to the next generation
    pub refinement: Option<String>,
    pub survey: SurveyAnswers,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

impl ChatSession {
    pub fn new(chat_id: i64, initial_credits: i64, month_key: String) -> Self {
        Self {
            chat_id,
            phase: Phase::New,
            language: None,
            credits: CreditBalance::Valid(initial_credits),
            model_image: None,
            original_model_image: None,
            model_gender: None,
            outfit_items: Vec::new(),
            last_monthly_grant: Some(month_key),
            refinement: None,
            survey: SurveyAnswers::default(),
            username: None,
            first_name: None,
        }
    }

    /// Language for messages, falling back to the default before onboarding
    pub fn lang(&self) -> Language {
        self.language.unwrap_or_default()
    }

    pub fn balance(&self) -> AppResult<i64> {
        self.credits.checked(self.chat_id)
    }

    /// Adds credits to a valid balance
    pub fn credit(&mut self, amount: i64) -> AppResult<i64> {
        let current = self.balance()?;
        let updated = current.checked_add(amount).ok_or_else(|| AppError::CorruptBalance {
            chat_id: self.chat_id,
            raw: format!("{} + {}", current, amount),
        })?;
        self.credits = CreditBalance::Valid(updated);
        Ok(updated)
    }

    /// Clears the working look without touching the model
    pub fn clear_look(&mut self) {
        self.outfit_items.clear();
        self.refinement = None;
    }
}
