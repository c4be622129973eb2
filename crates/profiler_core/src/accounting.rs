//! crates/profiler_core/src/accounting.rs
//!
//! The token accounting engine: cost estimates, free-tier and balance checks,
//! debits and credits, and the ledger row written for every balance change.
//!
//! Checks return decisions as data. Only the mutating operations fail, and only
//! when the user or session they must change does not exist.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Actor, Identity, TokenUsageRecord, UsageKind, User};
use crate::ports::{DatabaseService, PortError, PortResult};

//=========================================================================================
// Limits and Rates
//=========================================================================================

/// Characters per billing token. A cost proxy, not a real tokenizer.
pub const CHARS_PER_TOKEN: i64 = 4;

pub const FREE_MAX_INPUT_TOKENS: i64 = 500;
pub const FREE_MAX_OUTPUT_TOKENS: i64 = 500;
/// Lifetime allowance of an anonymous session.
pub const FREE_LIFETIME_TOKENS: i64 = 1000;

/// Balance admins are pinned to.
pub const UNLIMITED_BALANCE: i64 = 999_999_999;

pub const UPLOAD_COST_PER_100_WORDS: i64 = 10;
pub const MIN_UPLOAD_COST: i64 = 10;
pub const FREE_MAX_UPLOAD_COST: i64 = 100;
pub const REGISTERED_MAX_UPLOAD_COST: i64 = 1000;

/// How often a conditional balance write is retried after losing to another writer.
const MAX_BALANCE_UPDATE_ATTEMPTS: usize = 5;

const UPGRADE_HINT: &str = "Create an account and purchase tokens to keep going.";

//=========================================================================================
// Decisions
//=========================================================================================

/// Outcome of a free-tier check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeLimitDecision {
    pub can_proceed: bool,
    /// Lifetime usage of the session before this call.
    pub tokens_used: i64,
    pub message: Option<String>,
}

/// Outcome of a registered-user balance check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceDecision {
    pub can_proceed: bool,
    pub current_balance: i64,
    pub message: Option<String>,
}

/// What a debit actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DebitOutcome {
    pub tokens_charged: i64,
    pub tokens_remaining: i64,
}

/// Balance summary shown to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum TokenStatus {
    Registered {
        balance: i64,
        unlimited: bool,
    },
    Free {
        tokens_used: i64,
        tokens_remaining: i64,
        lifetime_limit: i64,
    },
}

//=========================================================================================
// Pure Cost Functions
//=========================================================================================

/// Estimated billing tokens for a piece of text: `ceil(chars / CHARS_PER_TOKEN)`.
pub fn estimate_tokens(text: &str) -> i64 {
    let chars = text.chars().count() as i64;
    (chars + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN
}

pub fn count_words(text: &str) -> i64 {
    text.split_whitespace().count() as i64
}

fn upload_cost(words: i64, ceiling: i64) -> i64 {
    let hundreds = (words.max(0) + 99) / 100;
    (hundreds * UPLOAD_COST_PER_100_WORDS)
        .max(MIN_UPLOAD_COST)
        .min(ceiling)
}

/// Upload cost for an anonymous session.
pub fn calculate_upload_cost(words: i64) -> i64 {
    upload_cost(words, FREE_MAX_UPLOAD_COST)
}

/// Upload cost for a registered user: same floor, higher ceiling.
pub fn calculate_registered_upload_cost(words: i64) -> i64 {
    upload_cost(words, REGISTERED_MAX_UPLOAD_COST)
}

/// Rounds a charge up to whole tokens. Never rounds down.
pub fn round_up_charge(amount: f64) -> i64 {
    if !amount.is_finite() || amount <= 0.0 {
        return 0;
    }
    amount.ceil() as i64
}

/// The free-tier rule on its own, given the session's current usage.
pub fn evaluate_free_limits(tokens_used: i64, input_tokens: i64, output_tokens: i64) -> FreeLimitDecision {
    let refuse = |message: String| FreeLimitDecision {
        can_proceed: false,
        tokens_used,
        message: Some(format!("{} {}", message, UPGRADE_HINT)),
    };

    if tokens_used >= FREE_LIFETIME_TOKENS {
        return refuse(format!(
            "You have used all {} free tokens.",
            FREE_LIFETIME_TOKENS
        ));
    }
    if input_tokens > FREE_MAX_INPUT_TOKENS {
        return refuse(format!(
            "Free analyses are limited to {} input tokens; this text needs about {}.",
            FREE_MAX_INPUT_TOKENS, input_tokens
        ));
    }
    if output_tokens > FREE_MAX_OUTPUT_TOKENS {
        return refuse(format!(
            "Free analyses are limited to {} output tokens; this analysis needs about {}.",
            FREE_MAX_OUTPUT_TOKENS, output_tokens
        ));
    }
    if tokens_used + input_tokens + output_tokens > FREE_LIFETIME_TOKENS {
        return refuse(format!(
            "This request needs about {} tokens but only {} of your {} free tokens remain.",
            input_tokens + output_tokens,
            FREE_LIFETIME_TOKENS - tokens_used,
            FREE_LIFETIME_TOKENS
        ));
    }

    FreeLimitDecision {
        can_proceed: true,
        tokens_used,
        message: None,
    }
}

fn evaluate_balance(balance: i64, required: i64) -> BalanceDecision {
    if balance < required {
        BalanceDecision {
            can_proceed: false,
            current_balance: balance,
            message: Some(format!(
                "This request needs {} tokens but your balance is {}. Purchase more tokens to continue.",
                required, balance
            )),
        }
    } else {
        BalanceDecision {
            can_proceed: true,
            current_balance: balance,
            message: None,
        }
    }
}

/// Registered users may always upload; anonymous sessions only until their
/// lifetime allowance is spent.
pub fn can_user_upload_files(identity: &Identity) -> bool {
    match identity {
        Identity::User(_) => true,
        Identity::Anonymous(session) => session.tokens_used < FREE_LIFETIME_TOKENS,
    }
}

//=========================================================================================
// The Engine
//=========================================================================================

/// Debits, credits and checks against the persistence gateway.
#[derive(Clone)]
pub struct TokenAccountant {
    db: Arc<dyn DatabaseService>,
}

impl TokenAccountant {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    async fn require_user(&self, user_id: Uuid) -> PortResult<User> {
        self.db
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    async fn require_session_usage(&self, session_id: &str) -> PortResult<i64> {
        self.db
            .get_anonymous_session(session_id)
            .await?
            .map(|s| s.tokens_used)
            .ok_or_else(|| PortError::NotFound(format!("Anonymous session {} not found", session_id)))
    }

    /// Applies `update` to the user's balance with a conditional write, re-reading
    /// and retrying if another request changed the balance in between.
    /// Returns `(before, after)`.
    async fn update_user_balance<F>(&self, user_id: Uuid, update: F) -> PortResult<(i64, i64)>
    where
        F: Fn(i64) -> i64 + Send,
    {
        for _ in 0..MAX_BALANCE_UPDATE_ATTEMPTS {
            let before = self.require_user(user_id).await?.token_balance;
            let after = update(before);
            if self.db.compare_and_set_balance(user_id, before, after).await? {
                return Ok((before, after));
            }
            warn!("Balance of user {} changed concurrently, retrying update", user_id);
        }
        Err(PortError::Unexpected(format!(
            "Balance of user {} kept changing; update abandoned",
            user_id
        )))
    }

    async fn update_session_usage<F>(&self, session_id: &str, update: F) -> PortResult<(i64, i64)>
    where
        F: Fn(i64) -> i64 + Send,
    {
        for _ in 0..MAX_BALANCE_UPDATE_ATTEMPTS {
            let before = self.require_session_usage(session_id).await?;
            let after = update(before);
            if self
                .db
                .compare_and_set_session_usage(session_id, before, after)
                .await?
            {
                return Ok((before, after));
            }
            warn!("Usage of session {} changed concurrently, retrying update", session_id);
        }
        Err(PortError::Unexpected(format!(
            "Usage of session {} kept changing; update abandoned",
            session_id
        )))
    }

    async fn record(
        &self,
        actor: Actor,
        kind: UsageKind,
        tokens_used: i64,
        tokens_remaining: i64,
        description: &str,
    ) -> PortResult<()> {
        self.db
            .append_usage_record(TokenUsageRecord {
                id: Uuid::new_v4(),
                actor,
                kind,
                tokens_used,
                tokens_remaining,
                description: description.to_string(),
                created_at: Utc::now(),
            })
            .await
    }

    /// Free-tier check for an anonymous session. An unknown session counts as unused.
    pub async fn check_free_user_limits(
        &self,
        session_id: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> PortResult<FreeLimitDecision> {
        let tokens_used = self
            .db
            .get_anonymous_session(session_id)
            .await?
            .map(|s| s.tokens_used)
            .unwrap_or(0);

        let decision = evaluate_free_limits(tokens_used, input_tokens, output_tokens);
        if !decision.can_proceed {
            warn!(
                "Free-tier request refused for session {} (used {}, input {}, output {})",
                session_id, tokens_used, input_tokens, output_tokens
            );
        }
        Ok(decision)
    }

    /// Balance check for a registered user. Admins always pass and have their
    /// balance restored to `UNLIMITED_BALANCE` if it drifted below it; the
    /// restore is not a ledger entry (see `User::is_admin`).
    pub async fn check_registered_user_tokens(
        &self,
        user_id: Uuid,
        required: i64,
    ) -> PortResult<BalanceDecision> {
        let user = self.require_user(user_id).await?;

        if user.is_admin() {
            let current_balance = if user.token_balance < UNLIMITED_BALANCE {
                let (_, pinned) = self
                    .update_user_balance(user_id, |balance| balance.max(UNLIMITED_BALANCE))
                    .await?;
                info!("Restored unlimited balance for admin {}", user_id);
                pinned
            } else {
                user.token_balance
            };
            return Ok(BalanceDecision {
                can_proceed: true,
                current_balance,
                message: None,
            });
        }

        let decision = evaluate_balance(user.token_balance, required);
        if !decision.can_proceed {
            warn!(
                "Insufficient balance for user {}: has {}, needs {}",
                user_id, user.token_balance, required
            );
        }
        Ok(decision)
    }

    /// Debits a registered user. The charge is rounded up and capped at the balance
    /// left at commit time; admins are never debited.
    pub async fn deduct_registered_user_tokens(
        &self,
        user_id: Uuid,
        amount: f64,
        kind: UsageKind,
        description: &str,
    ) -> PortResult<DebitOutcome> {
        let charge = round_up_charge(amount);
        let user = self.require_user(user_id).await?;

        if user.is_admin() {
            info!(
                "Admin {} used {} tokens ({}); balance not debited",
                user_id, charge, description
            );
            return Ok(DebitOutcome {
                tokens_charged: 0,
                tokens_remaining: user.token_balance,
            });
        }

        let (before, after) = self
            .update_user_balance(user_id, |balance| balance - charge.min(balance.max(0)))
            .await?;
        let tokens_charged = before - after;
        if tokens_charged < charge {
            warn!(
                "User {} could only be charged {} of {} tokens",
                user_id, tokens_charged, charge
            );
        }

        self.record(Actor::User(user_id), kind, tokens_charged, after, description)
            .await?;
        info!(
            "Debited {} tokens from user {} ({}); {} remaining",
            tokens_charged, user_id, description, after
        );

        Ok(DebitOutcome {
            tokens_charged,
            tokens_remaining: after,
        })
    }

    /// Adds to an anonymous session's lifetime usage. Like the registered debit,
    /// the charge is capped at what is left of the allowance, so usage never
    /// exceeds `FREE_LIFETIME_TOKENS`.
    pub async fn deduct_free_user_tokens(
        &self,
        session_id: &str,
        amount: f64,
        kind: UsageKind,
        description: &str,
    ) -> PortResult<DebitOutcome> {
        let charge = round_up_charge(amount);
        let (before, after) = self
            .update_session_usage(session_id, |used| {
                used + charge.min((FREE_LIFETIME_TOKENS - used).max(0))
            })
            .await?;
        if after - before < charge {
            warn!(
                "Session {} could only be charged {} of {} tokens",
                session_id,
                after - before,
                charge
            );
        }
        let tokens_remaining = (FREE_LIFETIME_TOKENS - after).max(0);

        self.record(
            Actor::Session(session_id.to_string()),
            kind,
            after - before,
            tokens_remaining,
            description,
        )
        .await?;
        info!(
            "Session {} used {} free tokens ({}); {} remaining",
            session_id,
            after - before,
            description,
            tokens_remaining
        );

        Ok(DebitOutcome {
            tokens_charged: after - before,
            tokens_remaining,
        })
    }

    /// Credits a user and records the purchase as a negative debit.
    pub async fn add_tokens_to_user(
        &self,
        user_id: Uuid,
        amount: i64,
        description: &str,
    ) -> PortResult<i64> {
        if amount <= 0 {
            return Err(PortError::Unexpected(format!(
                "Refusing to credit a non-positive amount ({})",
                amount
            )));
        }

        let (_, after) = self
            .update_user_balance(user_id, |balance| balance.saturating_add(amount))
            .await?;
        self.record(Actor::User(user_id), UsageKind::Purchase, -amount, after, description)
            .await?;
        info!("Credited {} tokens to user {}; balance {}", amount, user_id, after);

        Ok(after)
    }

    /// Current balance or free allowance of whoever is calling.
    pub async fn token_status(&self, identity: &Identity) -> PortResult<TokenStatus> {
        match identity {
            Identity::User(user) => {
                let user = self.require_user(user.user_id).await?;
                Ok(TokenStatus::Registered {
                    balance: user.token_balance,
                    unlimited: user.is_admin(),
                })
            }
            Identity::Anonymous(session) => {
                let tokens_used = self
                    .db
                    .get_anonymous_session(&session.session_id)
                    .await?
                    .map(|s| s.tokens_used)
                    .unwrap_or(session.tokens_used);
                Ok(TokenStatus::Free {
                    tokens_used,
                    tokens_remaining: (FREE_LIFETIME_TOKENS - tokens_used).max(0),
                    lifetime_limit: FREE_LIFETIME_TOKENS,
                })
            }
        }
    }

    pub async fn usage_history(&self, user_id: Uuid, limit: i64) -> PortResult<Vec<TokenUsageRecord>> {
        self.db.get_usage_for_user(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_rounds_up_partial_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn estimate_is_monotonic_in_length() {
        let mut previous = 0;
        let mut text = String::new();
        for _ in 0..200 {
            text.push('x');
            let estimate = estimate_tokens(&text);
            assert!(estimate >= previous);
            previous = estimate;
        }
        assert_eq!(estimate_tokens(&text), estimate_tokens(&text.clone()));
    }

    #[test]
    fn estimate_counts_characters_not_bytes() {
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn upload_cost_for_250_words_is_three_hundreds() {
        assert_eq!(calculate_upload_cost(250), 3 * UPLOAD_COST_PER_100_WORDS);
        assert_eq!(calculate_registered_upload_cost(250), 3 * UPLOAD_COST_PER_100_WORDS);
    }

    #[test]
    fn upload_cost_has_floor_and_tiered_ceiling() {
        assert_eq!(calculate_upload_cost(0), MIN_UPLOAD_COST);
        assert_eq!(calculate_upload_cost(5), MIN_UPLOAD_COST);
        assert_eq!(calculate_upload_cost(50_000), FREE_MAX_UPLOAD_COST);
        assert_eq!(calculate_registered_upload_cost(50_000), REGISTERED_MAX_UPLOAD_COST);
        assert_eq!(calculate_registered_upload_cost(5_000), 500);
    }

    #[test]
    fn count_words_splits_on_any_whitespace() {
        assert_eq!(count_words("word ".repeat(250).as_str()), 250);
        assert_eq!(count_words("  one\ttwo\nthree  "), 3);
    }

    #[test]
    fn charges_round_up_never_down() {
        assert_eq!(round_up_charge(10.0), 10);
        assert_eq!(round_up_charge(10.01), 11);
        assert_eq!(round_up_charge(0.2), 1);
        assert_eq!(round_up_charge(-3.0), 0);
        assert_eq!(round_up_charge(f64::NAN), 0);
    }

    #[test]
    fn free_limits_refuse_when_total_would_exceed_cap() {
        let decision = evaluate_free_limits(950, 400, 100);
        assert!(!decision.can_proceed);
        assert_eq!(decision.tokens_used, 950);
        assert!(decision.message.is_some());
    }

    #[test]
    fn free_limits_refuse_exhausted_sessions_regardless_of_size() {
        for used in [FREE_LIFETIME_TOKENS, FREE_LIFETIME_TOKENS + 250] {
            assert!(!evaluate_free_limits(used, 0, 0).can_proceed);
            assert!(!evaluate_free_limits(used, 1, 1).can_proceed);
        }
    }

    #[test]
    fn free_limits_enforce_per_call_caps() {
        assert!(!evaluate_free_limits(0, FREE_MAX_INPUT_TOKENS + 1, 10).can_proceed);
        assert!(!evaluate_free_limits(0, 10, FREE_MAX_OUTPUT_TOKENS + 1).can_proceed);
        assert!(evaluate_free_limits(0, FREE_MAX_INPUT_TOKENS, FREE_MAX_OUTPUT_TOKENS).can_proceed);
    }

    #[test]
    fn balance_check_refuses_iff_balance_below_required() {
        assert!(evaluate_balance(100, 100).can_proceed);
        assert!(evaluate_balance(101, 100).can_proceed);
        let refused = evaluate_balance(99, 100);
        assert!(!refused.can_proceed);
        assert_eq!(refused.current_balance, 99);
    }
}
