//! Credit plan catalog.
//!
//! Plans are a static, immutable catalog compiled into the binary. A plan
//! maps an external payment-provider product id to the credit grants it
//! purchases. Resolution falls back to an exact price match for providers
//! that omit the product id from their notifications.

use serde::{Deserialize, Serialize};

use crate::user::GenerationKind;

/// Starter pack price in minor currency units.
pub const STARTER_PRICE: i64 = 14_900;

/// Standard pack price in minor currency units.
pub const STANDARD_PRICE: i64 = 39_900;

/// Bulk pack price in minor currency units.
pub const BULK_PRICE: i64 = 99_900;

/// A purchasable credit pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Stable internal plan id.
    pub id: &'static str,

    /// Text credits granted on purchase.
    pub text_credit_grant: i64,

    /// Photo credits granted on purchase.
    pub photo_credit_grant: i64,

    /// Price in minor currency units.
    pub price: i64,

    /// Product id assigned by the payment provider.
    pub external_product_id: i64,
}

/// Per-kind monthly limits of the legacy plan-limit model.
///
/// Users predating the credit pools are billed against these limits via
/// the `legacy_*_used` counters. The limits gate availability checks only;
/// the ledger itself never compares against them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyLimits {
    /// Free text generations per billing period.
    pub text: i64,
    /// Free photo generations per billing period.
    pub photo: i64,
}

impl LegacyLimits {
    /// Limit for a generation kind.
    #[must_use]
    pub const fn limit(&self, kind: GenerationKind) -> i64 {
        match kind {
            GenerationKind::Text => self.text,
            GenerationKind::Photo => self.photo,
        }
    }
}

impl Default for LegacyLimits {
    fn default() -> Self {
        Self { text: 3, photo: 1 }
    }
}

/// The static plan catalog.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
    /// Legacy plan limits applied to all users.
    pub legacy_limits: LegacyLimits,
}

impl PlanCatalog {
    /// Build a catalog from an explicit plan list.
    #[must_use]
    pub fn new(plans: Vec<Plan>, legacy_limits: LegacyLimits) -> Self {
        Self {
            plans,
            legacy_limits,
        }
    }

    /// All plans, in display order.
    #[must_use]
    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    /// Resolve a plan by the provider's product id.
    #[must_use]
    pub fn by_product_id(&self, product_id: i64) -> Option<&Plan> {
        self.plans
            .iter()
            .find(|p| p.external_product_id == product_id)
    }

    /// Resolve a plan by exact price. Used when a notification carries no
    /// product id; amounts across the catalog are distinct by construction.
    #[must_use]
    pub fn by_amount(&self, amount: i64) -> Option<&Plan> {
        self.plans.iter().find(|p| p.price == amount)
    }

    /// Resolve a purchase: product id first, exact amount as a fallback.
    #[must_use]
    pub fn resolve(&self, product_id: Option<i64>, amount: Option<i64>) -> Option<&Plan> {
        product_id
            .and_then(|id| self.by_product_id(id))
            .or_else(|| amount.and_then(|a| self.by_amount(a)))
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(
            vec![
                Plan {
                    id: "starter",
                    text_credit_grant: 10,
                    photo_credit_grant: 5,
                    price: STARTER_PRICE,
                    external_product_id: 101,
                },
                Plan {
                    id: "standard",
                    text_credit_grant: 30,
                    photo_credit_grant: 15,
                    price: STANDARD_PRICE,
                    external_product_id: 102,
                },
                Plan {
                    id: "bulk",
                    text_credit_grant: 100,
                    photo_credit_grant: 50,
                    price: BULK_PRICE,
                    external_product_id: 103,
                },
            ],
            LegacyLimits::default(),
        )
    }
}
