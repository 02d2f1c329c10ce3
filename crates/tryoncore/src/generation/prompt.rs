//! Instruction texts sent to the AI vendors, and the local prompt used when the
//! composer is unavailable.

use crate::session::types::{ItemCategory, LookItem};

/// System instruction for try-on synthesis.
///
/// Image 1 is always the user's model photo; images 2..N are the garments.
pub const SYNTHESIS_RULES: &str = "You are a professional virtual try-on image generation engine.

IDENTITY: the only person in the result is the person from IMAGE 1. Never change their face, head, hair or body shape.

BACKGROUND: keep the background of IMAGE 1 exactly as it is, even when the garment images have removed or different backgrounds. The only exception is an explicit background item, which replaces the scene.

REFERENCE IMAGES (IMAGE 2+): use every clothing item and accessory visible in them and ignore any person shown there.

CONFLICTS: when several items compete for the same body slot (two skirts, two coats), choose the one that best fits the overall look and apply only that one. Never blend two items into one.

Apply the items onto the person from IMAGE 1, replacing the clothes they are wearing. Realistic fit, professional fashion photography.";

/// Batch categorization request for `count` images
pub fn categorization_instruction(count: usize) -> String {
    format!(
        "Analyze these {count} images of fashion items. For EACH distinct clothing item or accessory across \
         all images output ONE object; a photo of a person wearing a top, pants and shoes yields three objects \
         with the same imageIndex.
For each object:
1. category: one of top, bottom, outfit (one-piece items such as dresses), shoes, handbag, hat, accessory, background.
2. description: a detailed description of that single item only, ignoring any person.
3. isProhibited: true for underwear, lingerie, bikinis, swimwear or adult items.
4. gender: male, female or unisex.
5. containsPerson: true when a real person (not a mannequin) wears the item in the photo.
6. imageIndex: the 0-based index of the image (0 to {last}).
Answer only with a JSON array of objects with the keys imageIndex, category, description, isProhibited, gender, containsPerson.",
        count = count,
        last = count.saturating_sub(1),
    )
}

/// Garment extraction request for one photo of a worn item
pub fn isolation_instruction(description: &str) -> String {
    format!(
        "Crop and extract the [{}] from this image and place it on a pure white background. \
         Remove the person, body parts, skin and face completely. Keep the original shape, texture and \
         lighting of the item. Return only the isolated item image.",
        description
    )
}

fn has_background(items: &[LookItem]) -> bool {
    items.iter().any(|i| i.category.is_background())
}

fn item_lines(items: &[LookItem]) -> String {
    items
        .iter()
        .map(|i| format!("[{}]: {}", i.category.as_str().to_uppercase(), i.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// System prompt for the prompt-writing LLM
pub fn composer_system_prompt(items: &[LookItem]) -> String {
    let background = if has_background(items) {
        "Describe the new background based on the provided background item."
    } else {
        "State explicitly: keep the original background, lighting and setting exactly as in the source image. Do not describe a new location."
    };
    format!(
        "You are an expert fashion stylist writing a precise prompt for an AI image editor.
Input: a list of items to apply to an existing photo of a person.
Rules:
1. Use wearing language: \"the model is wearing white shoes\", \"she is holding a red bag\".
2. Describe only the items, never a person mentioned in an item description.
3. Body slots not covered by the items (pants, shoes, accessories) stay as they are; say so.
4. Background: {}
5. Describe how each item sits on the body.
6. Output only the prompt text.",
        background
    )
}

/// User message for the prompt-writing LLM
pub fn composer_user_message(items: &[LookItem], refinement: Option<&str>) -> String {
    format!(
        "INPUT ITEMS:\n{}\n\nUSER REFINEMENT:\n{}\n\nWrite the prompt.",
        item_lines(items),
        refinement.filter(|r| !r.trim().is_empty()).unwrap_or("None")
    )
}

/// Deterministic prompt built from the item descriptions alone
pub fn local_prompt(items: &[LookItem], refinement: Option<&str>) -> String {
    let mut lines: Vec<String> = items
        .iter()
        .filter(|i| !i.category.is_background())
        .map(|i| match i.category {
            ItemCategory::Handbag => format!("The person is holding {}.", i.description),
            _ => format!("The person is wearing {}.", i.description),
        })
        .collect();

    if let Some(bg) = items.iter().find(|i| i.category.is_background()) {
        lines.push(format!("Replace the background with {}.", bg.description));
    } else {
        lines.push("Keep the original background, lighting and setting exactly as they are.".to_string());
    }
    lines.push("Keep everything not mentioned above unchanged.".to_string());
    if let Some(refinement) = refinement.map(str::trim).filter(|r| !r.is_empty()) {
        lines.push(format!("Additional request: {}", refinement));
    }
    lines.join("\n")
}

/// Final text part of the synthesis request
pub fn synthesis_prompt(items: &[LookItem], composed: &str) -> String {
    let descriptions = items
        .iter()
        .map(|i| i.description.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    let background = if has_background(items) {
        "Replace the background with the provided background image."
    } else {
        "Keep the original background."
    };
    format!(
        "Generate a realistic full-body fashion photograph of the person from IMAGE 1 wearing the items from IMAGE 2+.\n\
         Items: {}\n\
         If several images provide items for the same body part, pick one.\n\
         {}\n\n\
         Details: {}",
        descriptions, background, composed
    )
}
