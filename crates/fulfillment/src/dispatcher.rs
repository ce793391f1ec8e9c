//! Best-effort dispatch of external side effects.
//!
//! Effects run after the inventory claim has committed; none of them can
//! fail the sale. Each effect resolves independently to applied, skipped,
//! or failed, and the orchestrator only proceeds to recording once every
//! outcome is in.

use std::time::Duration;

use futures_util::future::join_all;

use common::BuyerEmail;

use crate::services::{
    DirectoryService, DriveService, MailService, MemberInsert, OutboundEmail, extract_file_id,
};

/// An external, best-effort operation attached to a fulfillment.
#[derive(Debug, Clone)]
pub enum SideEffect {
    /// Insert the buyer into a directory group.
    GroupInvite { group: String, role: String },
    /// Grant the buyer read permission on a shared-drive URL.
    DriveGrant { url: String },
    /// Send the buyer a rendered notification email.
    Email { subject: String, html_body: String },
}

impl SideEffect {
    fn kind(&self) -> &'static str {
        match self {
            SideEffect::GroupInvite { .. } => "group_invite",
            SideEffect::DriveGrant { .. } => "drive_grant",
            SideEffect::Email { .. } => "email",
        }
    }
}

/// How a single effect resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectStatus {
    /// The effect was applied (or was already in place).
    Applied,
    /// The effect was not applicable and was skipped.
    Skipped,
    /// The service call failed or timed out. Logged, never fatal.
    Failed,
}

/// The resolved outcome of one side effect.
#[derive(Debug, Clone)]
pub struct EffectOutcome {
    pub kind: &'static str,
    pub status: EffectStatus,
    pub detail: Option<String>,
}

/// Invokes side effects against the external collaborators, isolating their
/// failures from the fulfillment outcome.
#[derive(Debug, Clone)]
pub struct SideEffectDispatcher<D, G, M> {
    directory: D,
    drive: G,
    mail: M,
    sender: String,
    timeout: Duration,
}

impl<D, G, M> SideEffectDispatcher<D, G, M>
where
    D: DirectoryService,
    G: DriveService,
    M: MailService,
{
    /// Creates a dispatcher with the outbound sender identity and a
    /// per-effect timeout.
    pub fn new(
        directory: D,
        drive: G,
        mail: M,
        sender: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            directory,
            drive,
            mail,
            sender: sender.into(),
            timeout,
        }
    }

    /// Applies all effects for one transaction concurrently and waits for
    /// every outcome. Never returns an error: failures are logged, counted,
    /// and reported as outcomes.
    #[tracing::instrument(skip(self, effects), fields(buyer = %buyer, count = effects.len()))]
    pub async fn apply(&self, buyer: &BuyerEmail, effects: Vec<SideEffect>) -> Vec<EffectOutcome> {
        join_all(effects.into_iter().map(|e| self.apply_one(buyer, e))).await
    }

    async fn apply_one(&self, buyer: &BuyerEmail, effect: SideEffect) -> EffectOutcome {
        let kind = effect.kind();

        let outcome = match tokio::time::timeout(self.timeout, self.dispatch(buyer, effect)).await {
            Ok(outcome) => outcome,
            Err(_) => EffectOutcome {
                kind,
                status: EffectStatus::Failed,
                detail: Some("timed out".to_string()),
            },
        };

        match outcome.status {
            EffectStatus::Applied => {
                tracing::debug!(kind, detail = ?outcome.detail, "side effect applied");
            }
            EffectStatus::Skipped => {
                tracing::info!(kind, detail = ?outcome.detail, "side effect skipped");
            }
            EffectStatus::Failed => {
                metrics::counter!("side_effect_failures_total", "kind" => kind).increment(1);
                tracing::warn!(kind, detail = ?outcome.detail, "side effect failed; sale unaffected");
            }
        }

        outcome
    }

    async fn dispatch(&self, buyer: &BuyerEmail, effect: SideEffect) -> EffectOutcome {
        let kind = effect.kind();

        match effect {
            SideEffect::GroupInvite { group, role } => {
                match self
                    .directory
                    .insert_member(&group, buyer.as_str(), &role)
                    .await
                {
                    Ok(MemberInsert::Added) => EffectOutcome {
                        kind,
                        status: EffectStatus::Applied,
                        detail: None,
                    },
                    // An existing membership is an expected outcome.
                    Ok(MemberInsert::AlreadyMember) => EffectOutcome {
                        kind,
                        status: EffectStatus::Applied,
                        detail: Some("member already exists".to_string()),
                    },
                    Err(e) => EffectOutcome {
                        kind,
                        status: EffectStatus::Failed,
                        detail: Some(e.to_string()),
                    },
                }
            }
            SideEffect::DriveGrant { url } => match extract_file_id(&url) {
                None => EffectOutcome {
                    kind,
                    status: EffectStatus::Skipped,
                    detail: Some(format!("unrecognized drive url: {url}")),
                },
                Some(file_id) => match self.drive.grant_read(&file_id, buyer.as_str()).await {
                    Ok(()) => EffectOutcome {
                        kind,
                        status: EffectStatus::Applied,
                        detail: None,
                    },
                    Err(e) => EffectOutcome {
                        kind,
                        status: EffectStatus::Failed,
                        detail: Some(e.to_string()),
                    },
                },
            },
            SideEffect::Email { subject, html_body } => {
                let email = OutboundEmail {
                    from: self.sender.clone(),
                    to: buyer.as_str().to_string(),
                    subject,
                    html_body,
                };
                match self.mail.send(email).await {
                    Ok(()) => EffectOutcome {
                        kind,
                        status: EffectStatus::Applied,
                        detail: None,
                    },
                    Err(e) => EffectOutcome {
                        kind,
                        status: EffectStatus::Failed,
                        detail: Some(e.to_string()),
                    },
                }
            }
        }
    }
}
