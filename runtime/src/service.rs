//! Loyalty service facade.
//!
//! Validates input, runs the operation's transaction, records metrics and
//! logs, and dispatches notifications once the transaction committed.

use crate::adjustment::{self, AdjustOutcome, AdjustPoints};
use crate::allocator::StaleCandidatePolicy;
use crate::command::{Caller, CommandResult, LoyaltyCommand};
use crate::coupons::{self, CouponBatch, CreateCouponsOutcome};
use crate::error::LoyaltyError;
use crate::ledger;
use crate::metrics::{AdminMetrics, RedemptionMetrics};
use crate::notify::{self, ConsoleNotifier, Notice, Notifier};
use crate::outcome::{ClaimResponse, RedeemOutcome};
use crate::pricing;
use crate::redemption;
use crate::registration::{self, RegisterMember, RegistrationOutcome};
use crate::views::{self, MemberSummary};
use fidelidad_core::environment::{Clock, SystemClock};
use fidelidad_core::model::{LedgerEntry, MemberId, PricingConfig};
use fidelidad_core::store::DocumentStore;
use fidelidad_core::tier::DiscountTier;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Entry point for every loyalty operation.
///
/// Cheap to clone; all state is behind `Arc`.
pub struct LoyaltyService<S: DocumentStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    stale_policy: StaleCandidatePolicy,
}

impl<S: DocumentStore> Clone for LoyaltyService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            notifier: Arc::clone(&self.notifier),
            stale_policy: self.stale_policy,
        }
    }
}

impl<S: DocumentStore> LoyaltyService<S> {
    /// Service over `store` with the system clock, console notifications,
    /// and [`StaleCandidatePolicy::Fail`].
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(ConsoleNotifier::new()),
            stale_policy: StaleCandidatePolicy::default(),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the notification sink.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Choose what redemptions do with a stale coupon candidate.
    #[must_use]
    pub const fn with_stale_policy(mut self, policy: StaleCandidatePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Redeem with raw tier input and map the result to the caller contract.
    #[tracing::instrument(skip(self, member_id), fields(member_id = %member_id))]
    pub async fn claim(&self, member_id: &MemberId, tier_input: &str) -> ClaimResponse {
        let started = Instant::now();
        let result = match tier_input.parse::<DiscountTier>() {
            Ok(tier) => self.redeem(member_id, tier).await,
            Err(err) => {
                tracing::debug!(input = tier_input, "Rejected unknown tier");
                Err(err.into())
            }
        };

        let response = ClaimResponse::from_result(result);
        RedemptionMetrics::record(response.status(), started.elapsed());
        response
    }

    /// Redeem points for a coupon of `tier`.
    ///
    /// # Errors
    ///
    /// Returns [`LoyaltyError::InvalidArgument`] for an empty member id and
    /// [`LoyaltyError::Store`] when the transaction fails.
    #[tracing::instrument(skip(self, member_id, tier), fields(member_id = %member_id, tier = %tier))]
    pub async fn redeem(
        &self,
        member_id: &MemberId,
        tier: DiscountTier,
    ) -> Result<RedeemOutcome, LoyaltyError> {
        if member_id.as_str().trim().is_empty() {
            return Err(LoyaltyError::invalid("member id is required"));
        }

        let outcome = redemption::redeem(&self.store, &self.clock, self.stale_policy, member_id, tier)
            .await
            .inspect_err(|error| {
                tracing::error!(
                    member_id = %member_id,
                    tier = %tier,
                    error = %error,
                    "Redemption transaction failed"
                );
            })?;

        match &outcome {
            RedeemOutcome::Redeemed {
                code,
                email,
                new_points,
                cost,
                ..
            } => {
                tracing::info!(code = %code, new_points, cost, "Coupon redeemed");
                RedemptionMetrics::record_points(*cost);
                notify::dispatch(
                    &self.notifier,
                    Notice::CouponRedeemed {
                        member_id: member_id.clone(),
                        email: email.clone(),
                        tier,
                        code: code.clone(),
                        cost: *cost,
                        new_points: *new_points,
                    },
                );
            }
            other => tracing::debug!(status = other.status(), "Redemption not performed"),
        }

        Ok(outcome)
    }

    /// Adjust a member's balance.
    ///
    /// # Errors
    ///
    /// Returns [`LoyaltyError::InvalidArgument`] for an invalid request and
    /// [`LoyaltyError::Store`] when the transaction fails.
    #[tracing::instrument(skip(self, request), fields(member_id = %request.member_id, kind = ?request.kind))]
    pub async fn adjust_points(
        &self,
        actor: &str,
        request: AdjustPoints,
    ) -> Result<AdjustOutcome, LoyaltyError> {
        request.validate()?;
        let reason = request.reason.trim().to_string();

        let outcome = adjustment::adjust_points(&*self.store, Arc::clone(&self.clock), request, actor)
            .await
            .inspect_err(|error| {
                AdminMetrics::record("adjust_points", "error");
                tracing::error!(error = %error, "Point adjustment failed");
            })?;

        if let AdjustOutcome::Adjusted {
            member_id,
            email,
            kind,
            previous_points,
            new_points,
        } = &outcome
        {
            AdminMetrics::record("adjust_points", "adjusted");
            tracing::info!(previous_points, new_points, actor, "Points adjusted");
            notify::dispatch(
                &self.notifier,
                Notice::PointsAdjusted {
                    member_id: member_id.clone(),
                    email: email.clone(),
                    movement: *kind,
                    previous_points: *previous_points,
                    new_points: *new_points,
                    reason,
                },
            );
        } else {
            AdminMetrics::record("adjust_points", "not_applied");
            tracing::debug!(outcome = ?outcome, "Point adjustment not applied");
        }

        Ok(outcome)
    }

    /// Register a member.
    ///
    /// # Errors
    ///
    /// Returns [`LoyaltyError::InvalidArgument`] for an invalid request and
    /// [`LoyaltyError::Store`] when the transaction fails.
    #[tracing::instrument(skip(self, request))]
    pub async fn register_member(
        &self,
        actor: &str,
        request: RegisterMember,
    ) -> Result<RegistrationOutcome, LoyaltyError> {
        let request = request.normalized()?;

        let outcome = registration::register_member(&*self.store, Arc::clone(&self.clock), request, actor)
            .await
            .inspect_err(|error| {
                AdminMetrics::record("register_member", "error");
                tracing::error!(error = %error, "Member registration failed");
            })?;

        match &outcome {
            RegistrationOutcome::Registered {
                member_id,
                numero,
                email,
                nombre,
            } => {
                AdminMetrics::record("register_member", "registered");
                tracing::info!(member_id = %member_id, numero, "Member registered");
                notify::dispatch(
                    &self.notifier,
                    Notice::MemberRegistered {
                        member_id: member_id.clone(),
                        email: email.clone(),
                        nombre: nombre.clone(),
                        numero: *numero,
                    },
                );
            }
            RegistrationOutcome::EmailTaken { .. } => {
                AdminMetrics::record("register_member", "email_taken");
                tracing::debug!("Registration rejected, email taken");
            }
        }

        Ok(outcome)
    }

    /// Add coupon stock for one tier.
    ///
    /// # Errors
    ///
    /// Returns [`LoyaltyError::InvalidTier`] or [`LoyaltyError::InvalidArgument`]
    /// for invalid input and [`LoyaltyError::Store`] when the transaction fails.
    #[tracing::instrument(skip(self, codes), fields(count = codes.len()))]
    pub async fn create_coupons(
        &self,
        tier_input: &str,
        codes: Vec<String>,
    ) -> Result<CreateCouponsOutcome, LoyaltyError> {
        let tier: DiscountTier = tier_input.parse()?;
        let batch = CouponBatch::new(tier, codes)?;

        let outcome = coupons::create_coupons(&*self.store, Arc::clone(&self.clock), batch)
            .await
            .inspect_err(|error| {
                AdminMetrics::record("create_coupons", "error");
                tracing::error!(tier = %tier, error = %error, "Coupon creation failed");
            })?;

        match &outcome {
            CreateCouponsOutcome::Created { count, .. } => {
                AdminMetrics::record("create_coupons", "created");
                tracing::info!(tier = %tier, count, "Coupons created");
            }
            CreateCouponsOutcome::DuplicateCode { code } => {
                AdminMetrics::record("create_coupons", "duplicate_code");
                tracing::info!(tier = %tier, code = %code, "Coupon batch rejected, code already issued");
            }
        }

        Ok(outcome)
    }

    /// Change tier costs.
    ///
    /// # Errors
    ///
    /// Returns [`LoyaltyError::InvalidTier`] or [`LoyaltyError::InvalidArgument`]
    /// for invalid input and [`LoyaltyError::Store`] when the transaction fails.
    #[tracing::instrument(skip(self, costs))]
    pub async fn set_pricing(
        &self,
        actor: &str,
        costs: &BTreeMap<String, u64>,
    ) -> Result<PricingConfig, LoyaltyError> {
        let costs = pricing::parse_costs(costs)?;

        let updated = pricing::set_pricing(&*self.store, Arc::clone(&self.clock), costs, actor)
            .await
            .inspect_err(|error| {
                AdminMetrics::record("set_pricing", "error");
                tracing::error!(error = %error, "Pricing update failed");
            })?;

        AdminMetrics::record("set_pricing", "updated");
        tracing::info!(costs = ?updated.costs, "Pricing updated");
        Ok(updated)
    }

    /// Current tier costs.
    ///
    /// # Errors
    ///
    /// Returns [`LoyaltyError::Store`] if the read fails.
    pub async fn pricing(&self) -> Result<PricingConfig, LoyaltyError> {
        Ok(pricing::load_pricing(&*self.store).await?)
    }

    /// Available coupons per tier.
    ///
    /// # Errors
    ///
    /// Returns [`LoyaltyError::Store`] if a query fails.
    pub async fn coupon_stock(&self) -> Result<BTreeMap<DiscountTier, usize>, LoyaltyError> {
        Ok(coupons::coupon_stock(&*self.store).await?)
    }

    /// Summary of one member.
    ///
    /// # Errors
    ///
    /// Returns [`LoyaltyError::Store`] if the read fails.
    pub async fn member_summary(
        &self,
        member_id: &MemberId,
    ) -> Result<Option<MemberSummary>, LoyaltyError> {
        Ok(views::member_summary(&*self.store, member_id).await?)
    }

    /// Movements of one member, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LoyaltyError::Store`] if the query fails.
    pub async fn movements(
        &self,
        member_id: &MemberId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LoyaltyError> {
        Ok(ledger::movements(&*self.store, member_id, limit).await?)
    }

    /// Run a command on behalf of `caller`.
    ///
    /// Redemptions always act on the caller's own account.
    ///
    /// # Errors
    ///
    /// Returns [`LoyaltyError::Forbidden`] when a non-admin sends an admin
    /// command, otherwise whatever the operation returns.
    #[tracing::instrument(skip(self, caller, command), fields(caller = %caller.id, command = command.name()))]
    pub async fn execute(
        &self,
        caller: &Caller,
        command: LoyaltyCommand,
    ) -> Result<CommandResult, LoyaltyError> {
        if command.requires_admin() && !caller.is_admin() {
            tracing::warn!("Admin command refused");
            return Err(LoyaltyError::Forbidden(format!(
                "{} requires the admin role",
                command.name()
            )));
        }

        match command {
            LoyaltyCommand::Redeem { tier } => {
                let response = self.claim(&caller.member_id(), &tier).await;
                Ok(CommandResult::Redeem(response))
            }
            LoyaltyCommand::AdjustPoints {
                member_id,
                kind,
                amount,
                reason,
            } => {
                let request = AdjustPoints {
                    member_id,
                    kind,
                    amount,
                    reason,
                };
                Ok(CommandResult::AdjustPoints(
                    self.adjust_points(&caller.id, request).await?,
                ))
            }
            LoyaltyCommand::RegisterMember {
                nombre,
                apellido,
                email,
                password_hash,
                initial_points,
            } => {
                let request = RegisterMember {
                    nombre,
                    apellido,
                    email,
                    password_hash,
                    initial_points,
                };
                Ok(CommandResult::RegisterMember(
                    self.register_member(&caller.id, request).await?,
                ))
            }
            LoyaltyCommand::CreateCoupons { tier, codes } => Ok(CommandResult::CreateCoupons(
                self.create_coupons(&tier, codes).await?,
            )),
            LoyaltyCommand::SetPricing { costs } => Ok(CommandResult::SetPricing(
                self.set_pricing(&caller.id, &costs).await?,
            )),
        }
    }
}
