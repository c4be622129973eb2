//! crates/profiler_core/src/payments.rs
//!
//! The bridge between the payment processor and the token ledger.
//!
//! The local `Payment` row is created `pending` together with the processor
//! intent. Tokens are credited only after the processor itself reports the
//! intent as succeeded; the caller's claim is never trusted.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::accounting::TokenAccountant;
use crate::domain::PaymentStatus;
use crate::ports::{
    ChargeIntent, DatabaseService, IntentMetadata, IntentStatus, PaymentProcessor, PortError,
    PortResult, WebhookEvent,
};

pub const CURRENCY: &str = "usd";

/// A purchasable bundle of tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenPackage {
    pub id: &'static str,
    pub name: &'static str,
    pub price_cents: i64,
    pub tokens: i64,
}

pub const TOKEN_PACKAGES: [TokenPackage; 3] = [
    TokenPackage {
        id: "starter",
        name: "Starter",
        price_cents: 500,
        tokens: 5_000,
    },
    TokenPackage {
        id: "standard",
        name: "Standard",
        price_cents: 1_500,
        tokens: 20_000,
    },
    TokenPackage {
        id: "pro",
        name: "Pro",
        price_cents: 4_000,
        tokens: 60_000,
    },
];

pub fn find_package(id: &str) -> Option<TokenPackage> {
    TOKEN_PACKAGES.iter().copied().find(|p| p.id == id)
}

#[derive(Clone)]
pub struct PaymentBridge {
    db: Arc<dyn DatabaseService>,
    processor: Arc<dyn PaymentProcessor>,
    accountant: TokenAccountant,
}

impl PaymentBridge {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        processor: Arc<dyn PaymentProcessor>,
        accountant: TokenAccountant,
    ) -> Self {
        Self {
            db,
            processor,
            accountant,
        }
    }

    /// Opens a processor intent and records the matching `pending` payment.
    pub async fn create_charge_intent(
        &self,
        amount_cents: i64,
        token_count: i64,
        user_id: Uuid,
    ) -> PortResult<ChargeIntent> {
        if amount_cents <= 0 || token_count <= 0 {
            return Err(PortError::Unexpected(
                "Charge amount and token count must be positive".to_string(),
            ));
        }

        let metadata = IntentMetadata {
            user_id,
            tokens: token_count,
        };
        let intent = self
            .processor
            .create_intent(amount_cents, CURRENCY, &metadata)
            .await?;

        self.db
            .create_payment(user_id, &intent.id, amount_cents, CURRENCY, token_count)
            .await?;
        info!(
            "Created charge intent {} for user {} ({} cents, {} tokens)",
            intent.id, user_id, amount_cents, token_count
        );

        Ok(intent)
    }

    async fn settle(&self, intent_id: &str) -> PortResult<PaymentStatus> {
        let payment = self
            .db
            .get_payment_by_intent(intent_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Payment for intent {} not found", intent_id)))?;

        if payment.status == PaymentStatus::Succeeded {
            info!("Intent {} already settled; not crediting again", intent_id);
            return Ok(PaymentStatus::Succeeded);
        }

        let intent = self.processor.retrieve_intent(intent_id).await?;
        if intent.status != IntentStatus::Succeeded {
            info!("Intent {} is not confirmed yet ({:?})", intent_id, intent.status);
            return Ok(payment.status);
        }

        // Only the caller whose write moves the row to `succeeded` credits it.
        if !self
            .db
            .update_payment_status(intent_id, PaymentStatus::Succeeded)
            .await?
        {
            info!("Intent {} was settled concurrently; not crediting again", intent_id);
            return Ok(PaymentStatus::Succeeded);
        }
        self.accountant
            .add_tokens_to_user(
                payment.user_id,
                payment.tokens_purchased,
                &format!("Purchased {} tokens (intent {})", payment.tokens_purchased, intent_id),
            )
            .await?;

        Ok(PaymentStatus::Succeeded)
    }

    /// Re-checks the intent with the processor and credits tokens once it succeeded.
    /// Errors are not propagated: the payment is marked `failed` instead.
    pub async fn handle_confirmed_charge(&self, intent_id: &str) -> PaymentStatus {
        match self.settle(intent_id).await {
            Ok(status) => status,
            Err(e) => {
                error!("Failed to settle intent {}: {}", intent_id, e);
                match self
                    .db
                    .update_payment_status(intent_id, PaymentStatus::Failed)
                    .await
                {
                    Ok(true) => PaymentStatus::Failed,
                    Ok(false) => PaymentStatus::Succeeded,
                    Err(e) => {
                        error!("Failed to mark intent {} as failed: {}", intent_id, e);
                        PaymentStatus::Failed
                    }
                }
            }
        }
    }

    /// Marks the payment `failed`. A payment that already succeeded keeps its
    /// status, so late or out-of-order failure events cannot reopen it.
    pub async fn handle_failed_charge(&self, intent_id: &str) -> PortResult<()> {
        if self
            .db
            .update_payment_status(intent_id, PaymentStatus::Failed)
            .await?
        {
            warn!("Charge for intent {} failed", intent_id);
        } else {
            warn!("Ignoring failure for intent {}; it already succeeded", intent_id);
        }
        Ok(())
    }

    /// Verifies a webhook delivery and routes it to the matching handler.
    pub async fn handle_webhook(&self, payload: &[u8], signature_header: &str) -> PortResult<WebhookEvent> {
        let event = self.processor.verify_webhook(payload, signature_header)?;
        match &event {
            WebhookEvent::PaymentSucceeded { intent_id } => {
                self.handle_confirmed_charge(intent_id).await;
            }
            WebhookEvent::PaymentFailed { intent_id } => {
                self.handle_failed_charge(intent_id).await?;
            }
            WebhookEvent::Ignored { event_type } => {
                info!("Ignoring webhook event {}", event_type);
            }
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packages_are_looked_up_by_id() {
        assert_eq!(find_package("standard").map(|p| p.tokens), Some(20_000));
        assert!(find_package("platinum").is_none());
    }

    #[test]
    fn packages_have_positive_prices_and_tokens() {
        for package in TOKEN_PACKAGES {
            assert!(package.price_cents > 0);
            assert!(package.tokens > 0);
        }
    }
}
