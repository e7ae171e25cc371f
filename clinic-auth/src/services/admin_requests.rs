//! Self-service admin signup: `pending -> approved | rejected`, both terminal.

use std::sync::Arc;
use tokio::sync::Mutex;

use super::{AdminRequestStore, AuthError, Clock, IdentityStore, NotificationGateway, TokenIssuer};
use crate::models::{
    AdminLevel, AdminRequest, AdminRequestId, Decision, IdentityId, IdentityProfile,
    IdentityRecord, IssuedToken, Role, TokenKind,
};
use crate::utils::{hash_secret, validate_email, validate_phone, PlainSecret};

pub const MIN_SECRET_LENGTH: usize = 8;

#[derive(Debug, Clone)]
pub struct AdminSignup {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub secret: PlainSecret,
    pub telegram: Option<String>,
}

/// Result of an approval: the promoted identity and its first token.
#[derive(Debug, Clone)]
pub struct ApprovedAdmin {
    pub request: AdminRequest,
    pub identity_id: IdentityId,
    pub token: IssuedToken,
}

fn validate_signup(signup: &AdminSignup) -> Result<String, AuthError> {
    let name = signup.name.trim();
    if name.is_empty() {
        return Err(AuthError::Validation("Name is required".to_string()));
    }
    validate_email(&signup.email)?;
    validate_phone(&signup.phone)?;
    if signup.secret.as_str().chars().count() < MIN_SECRET_LENGTH {
        return Err(AuthError::Validation(format!(
            "Password must be at least {} characters",
            MIN_SECRET_LENGTH
        )));
    }
    Ok(name.to_string())
}

fn normalize_channel(channel: Option<String>) -> Option<String> {
    channel
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn admin_record(id: IdentityId, request: &AdminRequest, level: AdminLevel) -> IdentityRecord {
    let record = IdentityRecord::new(
        id,
        request.name.clone(),
        IdentityProfile::Admin {
            level,
            branch_id: None,
        },
    )
    .with_email(request.email.clone())
    .with_phone(request.phone.clone())
    .with_secret_hash(request.secret_hash.clone());
    match &request.telegram {
        Some(channel) => record.with_telegram_channel(channel.clone()),
        None => record,
    }
}

pub struct AdminRequestWorkflow {
    requests: Arc<dyn AdminRequestStore>,
    identities: Arc<dyn IdentityStore>,
    tokens: TokenIssuer,
    clock: Arc<dyn Clock>,
    notifier: Option<Arc<dyn NotificationGateway>>,
    // Serialises decisions so two deciders cannot both see `pending`.
    decisions: Mutex<()>,
}

impl AdminRequestWorkflow {
    pub fn new(
        requests: Arc<dyn AdminRequestStore>,
        identities: Arc<dyn IdentityStore>,
        tokens: TokenIssuer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            requests,
            identities,
            tokens,
            clock,
            notifier: None,
            decisions: Mutex::new(()),
        }
    }

    /// Tell applicants about the outcome on their Telegram channel, if they gave one.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationGateway>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[tracing::instrument(skip(self, signup), fields(email = %signup.email))]
    pub async fn request_signup(&self, signup: AdminSignup) -> Result<AdminRequest, AuthError> {
        let name = validate_signup(&signup)?;
        self.ensure_no_admin_with(&signup.email).await?;
        if self
            .requests
            .find_pending_by_email(&signup.email)
            .await?
            .is_some()
        {
            return Err(AuthError::Conflict(
                "A request for this email is already awaiting review".to_string(),
            ));
        }

        let secret_hash = hash_secret(&signup.secret)?;
        let telegram = normalize_channel(signup.telegram);

        let request = AdminRequest::new(
            name,
            signup.email,
            signup.phone,
            secret_hash,
            telegram,
            self.clock.now(),
        );
        self.requests.save(request.clone()).await?;

        tracing::info!(request_id = %request.id, "Admin signup requested");
        Ok(request)
    }

    pub async fn list_pending(&self) -> Result<Vec<AdminRequest>, AuthError> {
        Ok(self.requests.list_pending().await?)
    }

    /// Promote the request to a branch-admin identity holding a fresh standard token.
    #[tracing::instrument(skip(self), fields(request_id = %id))]
    pub async fn approve(&self, id: AdminRequestId) -> Result<ApprovedAdmin, AuthError> {
        let _guard = self.decisions.lock().await;

        let mut request = self.load_pending(id).await?;
        let now = self.clock.now();

        let identity_id = self.identities.next_id().await?;
        let mut record = admin_record(identity_id, &request, AdminLevel::Branch);
        record.created_at = now;

        // Everything that can fail runs before the first write.
        let token = self.tokens.stamp(&mut record, TokenKind::Standard).await?;
        request
            .decide(Decision::Approve, now)
            .map_err(AuthError::AlreadyProcessed)?;

        self.persist_approval(record, &request).await?;

        tracing::info!(identity_id = %identity_id, "Admin request approved");
        self.notify(&request, "Your administrator request was approved. You can now sign in.")
            .await;

        Ok(ApprovedAdmin {
            request,
            identity_id,
            token,
        })
    }

    #[tracing::instrument(skip(self), fields(request_id = %id))]
    pub async fn reject(&self, id: AdminRequestId) -> Result<AdminRequest, AuthError> {
        let _guard = self.decisions.lock().await;

        let mut request = self.load_pending(id).await?;
        request
            .decide(Decision::Reject, self.clock.now())
            .map_err(AuthError::AlreadyProcessed)?;
        self.requests.save(request.clone()).await?;

        tracing::info!("Admin request rejected");
        self.notify(&request, "Your administrator request was declined.")
            .await;
        Ok(request)
    }

    /// Seed the first super admin so someone can approve requests.
    /// Returns `Conflict` once an administrator with the email exists.
    #[tracing::instrument(skip(self, signup), fields(email = %signup.email))]
    pub async fn bootstrap_super_admin(
        &self,
        signup: AdminSignup,
    ) -> Result<ApprovedAdmin, AuthError> {
        let _guard = self.decisions.lock().await;

        let name = validate_signup(&signup)?;
        self.ensure_no_admin_with(&signup.email).await?;

        let now = self.clock.now();
        let secret_hash = hash_secret(&signup.secret)?;
        let mut request = AdminRequest::new(
            name,
            signup.email,
            signup.phone,
            secret_hash,
            normalize_channel(signup.telegram),
            now,
        );
        request
            .decide(Decision::Approve, now)
            .map_err(AuthError::AlreadyProcessed)?;

        let identity_id = self.identities.next_id().await?;
        let mut record = admin_record(identity_id, &request, AdminLevel::Super);
        record.created_at = now;
        let token = self.tokens.stamp(&mut record, TokenKind::Admin).await?;

        self.persist_approval(record, &request).await?;

        tracing::info!(identity_id = %identity_id, "Super admin bootstrapped");
        Ok(ApprovedAdmin {
            request,
            identity_id,
            token,
        })
    }

    /// Writes the identity and the decided request as one unit. If the request
    /// cannot be stored the identity is removed again, so the request stays
    /// pending and no orphaned admin can sign in.
    async fn persist_approval(
        &self,
        record: IdentityRecord,
        request: &AdminRequest,
    ) -> Result<(), AuthError> {
        let identity_id = record.id;
        self.identities.save(record).await?;

        if let Err(e) = self.requests.save(request.clone()).await {
            tracing::error!(
                error = %e,
                identity_id = %identity_id,
                "Storing the decision failed; removing the new identity"
            );
            if let Err(rollback) = self.identities.remove(identity_id).await {
                tracing::error!(
                    error = %rollback,
                    identity_id = %identity_id,
                    "Rollback failed; identity exists without an approved request"
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn ensure_no_admin_with(&self, email: &str) -> Result<(), AuthError> {
        for role in [Role::BranchAdmin, Role::SuperAdmin] {
            if self.identities.find_by_email(email, role).await?.is_some() {
                return Err(AuthError::Conflict(
                    "An administrator with this email already exists".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn load_pending(&self, id: AdminRequestId) -> Result<AdminRequest, AuthError> {
        let request = self
            .requests
            .find(id)
            .await?
            .ok_or_else(|| AuthError::NotFound("Admin request".to_string()))?;

        if request.status.is_terminal() {
            tracing::warn!(status = %request.status, "Decision on a settled admin request");
            return Err(AuthError::AlreadyProcessed(request.status));
        }
        Ok(request)
    }

    /// Best effort; the decision stands whether or not the notice arrives.
    async fn notify(&self, request: &AdminRequest, text: &str) {
        let (Some(notifier), Some(channel)) = (&self.notifier, &request.telegram) else {
            return;
        };
        if let Err(e) = notifier.send(channel, text).await {
            tracing::warn!(error = %e, "Could not notify applicant");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AdminRequestStatus;
    use crate::services::{
        InMemoryAdminRequestStore, InMemoryIdentityStore, MockClock, MockNotificationGateway,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Harness {
        workflow: AdminRequestWorkflow,
        identities: Arc<InMemoryIdentityStore>,
        tokens: TokenIssuer,
        gateway: Arc<MockNotificationGateway>,
    }

    fn harness() -> Harness {
        harness_with_requests(Arc::new(InMemoryAdminRequestStore::new()))
    }

    fn harness_with_requests(requests: Arc<dyn AdminRequestStore>) -> Harness {
        let clock = Arc::new(MockClock::default());
        let identities = Arc::new(InMemoryIdentityStore::new());
        let tokens = TokenIssuer::new(identities.clone(), clock.clone());
        let gateway = Arc::new(MockNotificationGateway::new());
        let workflow = AdminRequestWorkflow::new(
            requests,
            identities.clone(),
            tokens.clone(),
            clock,
        )
        .with_notifier(gateway.clone());
        Harness {
            workflow,
            identities,
            tokens,
            gateway,
        }
    }

    /// Request store whose writes start failing once `fail_saves` is set.
    #[derive(Default)]
    struct FlakyRequestStore {
        inner: InMemoryAdminRequestStore,
        fail_saves: AtomicBool,
    }

    impl FlakyRequestStore {
        fn set_failing(&self, failing: bool) {
            self.fail_saves.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl AdminRequestStore for FlakyRequestStore {
        async fn find(&self, id: AdminRequestId) -> Result<Option<AdminRequest>, anyhow::Error> {
            self.inner.find(id).await
        }

        async fn find_pending_by_email(
            &self,
            email: &str,
        ) -> Result<Option<AdminRequest>, anyhow::Error> {
            self.inner.find_pending_by_email(email).await
        }

        async fn list_pending(&self) -> Result<Vec<AdminRequest>, anyhow::Error> {
            self.inner.list_pending().await
        }

        async fn save(&self, request: AdminRequest) -> Result<(), anyhow::Error> {
            if self.fail_saves.load(Ordering::SeqCst) {
                anyhow::bail!("request store unavailable");
            }
            self.inner.save(request).await
        }
    }

    fn signup(email: &str) -> AdminSignup {
        AdminSignup {
            name: "Aziz Karimov".into(),
            email: email.into(),
            phone: "+998901112233".into(),
            secret: PlainSecret::new("branch-admin-pass"),
            telegram: Some("777".into()),
        }
    }

    #[tokio::test]
    async fn approval_creates_branch_admin_with_live_token() {
        let h = harness();
        let request = h.workflow.request_signup(signup("aziz@clinic.uz")).await.unwrap();

        let approved = h.workflow.approve(request.id).await.unwrap();
        assert_eq!(approved.request.status, AdminRequestStatus::Approved);

        let record = h.identities.find_by_id(approved.identity_id).await.unwrap().unwrap();
        assert_eq!(record.role(), Role::BranchAdmin);
        assert_eq!(record.token_kind(), Some(TokenKind::Standard));

        let resolved = h.tokens.resolve(&approved.token.value).await.unwrap().unwrap();
        assert_eq!(resolved.id, approved.identity_id);
        assert_eq!(h.gateway.sent().len(), 1);
    }

    #[tokio::test]
    async fn second_decision_is_already_processed() {
        let h = harness();
        let request = h.workflow.request_signup(signup("aziz@clinic.uz")).await.unwrap();
        h.workflow.approve(request.id).await.unwrap();

        let err = h.workflow.reject(request.id).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::AlreadyProcessed(AdminRequestStatus::Approved)
        ));
        let err = h.workflow.approve(request.id).await.unwrap_err();
        assert!(matches!(err, AuthError::AlreadyProcessed(_)));
        assert_eq!(h.identities.len(), 1);
    }

    #[tokio::test]
    async fn rejection_creates_no_identity() {
        let h = harness();
        let request = h.workflow.request_signup(signup("aziz@clinic.uz")).await.unwrap();

        let rejected = h.workflow.reject(request.id).await.unwrap();
        assert_eq!(rejected.status, AdminRequestStatus::Rejected);
        assert!(h.identities.is_empty());
        assert!(h.workflow.list_pending().await.unwrap().is_empty());

        let err = h.workflow.approve(request.id).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::AlreadyProcessed(AdminRequestStatus::Rejected)
        ));
    }

    #[tokio::test]
    async fn duplicate_emails_conflict() {
        let h = harness();
        let first = h.workflow.request_signup(signup("aziz@clinic.uz")).await.unwrap();

        let pending_dup = h.workflow.request_signup(signup("AZIZ@clinic.uz")).await.unwrap_err();
        assert!(matches!(pending_dup, AuthError::Conflict(_)));

        h.workflow.approve(first.id).await.unwrap();
        let existing_dup = h.workflow.request_signup(signup("aziz@clinic.uz")).await.unwrap_err();
        assert!(matches!(existing_dup, AuthError::Conflict(_)));
    }

    #[tokio::test]
    async fn signup_fields_are_validated() {
        let h = harness();

        let mut bad_phone = signup("a@clinic.uz");
        bad_phone.phone = "12345".into();
        let mut short_secret = signup("b@clinic.uz");
        short_secret.secret = PlainSecret::new("short");
        let mut blank_name = signup("c@clinic.uz");
        blank_name.name = "  ".into();

        for input in [signup("not-an-email"), bad_phone, short_secret, blank_name] {
            let err = h.workflow.request_signup(input).await.unwrap_err();
            assert!(matches!(err, AuthError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let h = harness();
        let err = h.workflow.approve(AdminRequestId::new()).await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }

    #[tokio::test]
    async fn bootstrap_seeds_super_admin_once() {
        let h = harness();
        let seeded = h
            .workflow
            .bootstrap_super_admin(signup("root@clinic.uz"))
            .await
            .unwrap();

        let record = h.identities.find_by_id(seeded.identity_id).await.unwrap().unwrap();
        assert_eq!(record.role(), Role::SuperAdmin);
        assert_eq!(seeded.token.kind, TokenKind::Admin);
        assert!(h.workflow.list_pending().await.unwrap().is_empty());

        let again = h
            .workflow
            .bootstrap_super_admin(signup("root@clinic.uz"))
            .await
            .unwrap_err();
        assert!(matches!(again, AuthError::Conflict(_)));
        assert_eq!(h.identities.len(), 1);
    }

    #[tokio::test]
    async fn failed_decision_write_leaves_no_identity_and_request_pending() {
        let store = Arc::new(FlakyRequestStore::default());
        let h = harness_with_requests(store.clone());
        let request = h.workflow.request_signup(signup("aziz@clinic.uz")).await.unwrap();

        store.set_failing(true);
        let err = h.workflow.approve(request.id).await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
        assert!(h.identities.is_empty());
        assert!(h.gateway.sent().is_empty());

        let stored = store.find(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AdminRequestStatus::Pending);

        store.set_failing(false);
        let approved = h.workflow.approve(request.id).await.unwrap();
        assert_eq!(approved.request.status, AdminRequestStatus::Approved);
        assert_eq!(h.identities.len(), 1);
    }

    #[tokio::test]
    async fn failed_bootstrap_write_can_be_retried() {
        let store = Arc::new(FlakyRequestStore::default());
        let h = harness_with_requests(store.clone());

        store.set_failing(true);
        let err = h
            .workflow
            .bootstrap_super_admin(signup("root@clinic.uz"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
        assert!(h.identities.is_empty());

        store.set_failing(false);
        let seeded = h
            .workflow
            .bootstrap_super_admin(signup("root@clinic.uz"))
            .await
            .unwrap();
        assert_eq!(h.identities.len(), 1);
        assert!(h.tokens.resolve(&seeded.token.value).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn pending_list_holds_undecided_requests() {
        let h = harness();
        let a = h.workflow.request_signup(signup("a@clinic.uz")).await.unwrap();
        let b = h.workflow.request_signup(signup("b@clinic.uz")).await.unwrap();

        let ids: Vec<_> = h
            .workflow
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a.id) && ids.contains(&b.id));
    }
}
