//! Credit package catalogue and invoice payload checks.

use fluent_templates::fluent_bundle::FluentValue;

use crate::core::types::Language;
use crate::i18n;
use crate::messenger::{Button, Invoice};

/// A purchasable bundle of credits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditPackage {
    pub id: &'static str,
    pub credits: i64,
    /// Price in major currency units
    pub price: i64,
}

pub const PACKAGES: [CreditPackage; 4] = [
    CreditPackage {
        id: "pkg_100",
        credits: 100,
        price: 10_000,
    },
    CreditPackage {
        id: "pkg_160",
        credits: 160,
        price: 15_000,
    },
    CreditPackage {
        id: "pkg_300",
        credits: 300,
        price: 25_000,
    },
    CreditPackage {
        id: "pkg_400",
        credits: 400,
        price: 30_000,
    },
];

/// Prefix of the inline button data that requests an invoice
pub const BUY_PREFIX: &str = "buy_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentRejection {
    UnknownPackage(String),
    AmountMismatch { expected: u32, got: u32 },
    CurrencyMismatch { expected: String, got: String },
}

impl CreditPackage {
    pub fn find(id: &str) -> Option<&'static CreditPackage> {
        PACKAGES.iter().find(|p| p.id == id)
    }

    /// Price in minor currency units, as Telegram invoices expect
    pub fn amount_minor(&self) -> u32 {
        u32::try_from(self.price * 100).unwrap_or(u32::MAX)
    }

    pub fn callback_data(&self) -> String {
        format!("{}{}", BUY_PREFIX, self.id)
    }

    pub fn button(&self, lang: Language) -> Button {
        let label = i18n::tf(
            lang,
            "buy-button",
            &[
                ("credits", FluentValue::from(self.credits)),
                ("price", FluentValue::from(self.price)),
            ],
        );
        Button::new(label, self.callback_data())
    }

    pub fn invoice(&self, lang: Language, currency: &str) -> Invoice {
        let credits = [("credits", FluentValue::from(self.credits))];
        Invoice {
            title: i18n::tf(lang, "invoice-title", &credits),
            description: i18n::tf(lang, "invoice-description", &credits),
            payload: self.id.to_string(),
            currency: currency.to_string(),
            label: i18n::tf(lang, "invoice-title", &credits),
            amount: self.amount_minor(),
        }
    }
}

/// Buttons for every package, one per row
pub fn package_buttons(lang: Language) -> Vec<Button> {
    PACKAGES.iter().map(|p| p.button(lang)).collect()
}

/// Checks a pre-checkout or settled payment against the catalogue
pub fn validate_payment(
    payload: &str,
    currency: &str,
    total_amount: u32,
    expected_currency: &str,
) -> Result<&'static CreditPackage, PaymentRejection> {
    let package = CreditPackage::find(payload).ok_or_else(|| PaymentRejection::UnknownPackage(payload.to_string()))?;
    if !currency.eq_ignore_ascii_case(expected_currency) {
        return Err(PaymentRejection::CurrencyMismatch {
            expected: expected_currency.to_string(),
            got: currency.to_string(),
        });
    }
    if total_amount != package.amount_minor() {
        return Err(PaymentRejection::AmountMismatch {
            expected: package.amount_minor(),
            got: total_amount,
        });
    }
    Ok(package)
}
