//! Session store
//!
//! Tracks who is signed in and whether their profile is set up. The state is
//! derived from the gateway's auth events plus a server-side re-validation
//! whenever the app starts or returns to the foreground, so a token revoked
//! elsewhere is noticed.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use greensight_gateway::rows::{columns, ProfileRow, ProfileSetupPatch};
use greensight_gateway::{Auth, AuthChange, AuthEvent, GatewayError, Query, Session, Storage, Tables};
use greensight_model::{validate_username, Profile};
use tokio::sync::{broadcast, mpsc, watch};

use crate::error::SessionError;
use crate::mapper;
use crate::notify::{Notice, NoticeLevel, Notifier};
use crate::upload::{upload_image, Bucket};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub session: Option<Session>,
    pub profile: Option<Profile>,
    pub is_profile_setup_complete: bool,
    /// True until the first session check has finished.
    pub initializing: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session: None,
            profile: None,
            is_profile_setup_complete: false,
            initializing: true,
        }
    }
}

impl SessionState {
    pub fn user_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.user.id.as_str())
    }

    pub fn flow(&self) -> AuthFlow {
        match (&self.session, self.initializing) {
            (_, true) => AuthFlow::Initializing,
            (None, false) => AuthFlow::SignedOut,
            (Some(_), false) if !self.is_profile_setup_complete => AuthFlow::ProfileSetup,
            (Some(_), false) => AuthFlow::Main,
        }
    }
}

/// Which top-level navigation flow the host should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlow {
    Initializing,
    SignedOut,
    ProfileSetup,
    Main,
}

/// App foreground/background transitions reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Active,
    Background,
}

/// Result of a sign-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn,
    /// The account exists but the email address must be confirmed first.
    ConfirmationRequired,
}

pub struct SessionStore<G> {
    gateway: Arc<G>,
    notifier: Arc<dyn Notifier>,
    max_upload_bytes: u64,
    state: watch::Sender<SessionState>,
}

impl<G> SessionStore<G>
where
    G: Auth + Tables + Storage + 'static,
{
    pub fn new(gateway: Arc<G>, notifier: Arc<dyn Notifier>, max_upload_bytes: u64) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            gateway,
            notifier,
            max_upload_bytes,
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn flow(&self) -> AuthFlow {
        self.state.borrow().flow()
    }

    pub fn user_id(&self) -> Option<String> {
        self.state.borrow().user_id().map(str::to_string)
    }

    /// First session check: read the locally held session, then confirm it
    /// with the server.
    pub async fn initialize(&self) {
        let session = match self.gateway.get_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read the stored session");
                None
            }
        };
        match session {
            Some(session) => self.revalidate(session).await,
            None => self.clear(),
        }
        self.mark_initialized();
        tracing::info!(flow = ?self.flow(), "Session initialized");
    }

    /// Re-check the current session when the app returns to the foreground.
    pub async fn on_app_active(&self) {
        let session = self.state.borrow().session.clone();
        if let Some(session) = session {
            self.revalidate(session).await;
        }
    }

    pub async fn handle_auth_event(&self, event: AuthEvent) {
        tracing::debug!(change = ?event.change, "Auth event");
        match (event.change, event.session) {
            (AuthChange::SignedOut, _) | (_, None) => self.clear(),
            (
                AuthChange::SignedIn | AuthChange::InitialSession | AuthChange::UserUpdated,
                Some(session),
            ) => self.apply_session(session).await,
            (AuthChange::TokenRefreshed, Some(session)) => {
                self.state.send_modify(|s| s.session = Some(session));
            }
        }
        self.mark_initialized();
    }

    /// Drive the store from auth events and app lifecycle changes until either
    /// source closes.
    pub async fn run(&self, mut lifecycle: mpsc::Receiver<AppLifecycle>) {
        let mut events = self.gateway.subscribe();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.handle_auth_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Auth events dropped, re-validating session");
                        self.on_app_active().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                change = lifecycle.recv() => match change {
                    Some(AppLifecycle::Active) => self.on_app_active().await,
                    Some(AppLifecycle::Background) => {}
                    None => break,
                },
            }
        }
        tracing::debug!("Session store stopped");
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), SessionError> {
        match self.gateway.sign_in_with_password(email.trim(), password).await {
            Ok(session) => {
                tracing::info!(user_id = %session.user.id, "Signed in");
                self.apply_session(session).await;
                self.mark_initialized();
                Ok(())
            }
            Err(e) => Err(self.report("Sign In Error", e.into())),
        }
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, SessionError> {
        match self.gateway.sign_up(email.trim(), password).await {
            Ok(Some(session)) => {
                tracing::info!(user_id = %session.user.id, "Signed up");
                self.apply_session(session).await;
                self.mark_initialized();
                Ok(SignUpOutcome::SignedIn)
            }
            Ok(None) => {
                self.notifier.notify(Notice::new(
                    NoticeLevel::Info,
                    "Check Your Email",
                    "Confirm your address to finish signing up.",
                ));
                Ok(SignUpOutcome::ConfirmationRequired)
            }
            Err(e) => Err(self.report("Sign Up Error", e.into())),
        }
    }

    pub async fn sign_out(&self) -> Result<(), SessionError> {
        let result = self.gateway.sign_out().await;
        // Local state is cleared even when the server call fails.
        self.clear();
        result.map_err(|e| self.report("Sign Out Error", e.into()))
    }

    /// Set the username and optional avatar, completing profile setup.
    pub async fn complete_profile(
        &self,
        username: &str,
        avatar: Option<&Path>,
    ) -> Result<Profile, SessionError> {
        let Some(user_id) = self.user_id() else {
            return Err(self.report("Profile Error", SessionError::NotSignedIn));
        };
        let username = validate_username(username)
            .map_err(|errors| self.report("Validation Error", errors.into()))?;

        let avatar_url = match avatar {
            Some(path) => {
                upload_image(
                    self.gateway.as_ref(),
                    self.notifier.as_ref(),
                    Bucket::Avatars,
                    &user_id,
                    path,
                    "avatar",
                    self.max_upload_bytes,
                )
                .await
            }
            None => None,
        };

        let patch = ProfileSetupPatch {
            username,
            avatar_url,
            updated_at: Utc::now(),
        };
        match self.gateway.update(&user_id, &patch).await {
            Ok(()) => {}
            Err(e) if e.is_unique_violation() => {
                return Err(self.report("Username Taken", SessionError::UsernameTaken));
            }
            Err(e @ GatewayError::PermissionDenied(_)) => {
                return Err(self.report("Permission Denied", e.into()));
            }
            Err(e) => return Err(self.report("Profile Error", e.into())),
        }

        let profile = match self.fetch_profile(&user_id).await {
            Ok(Some(profile)) => profile,
            // Written but not readable back; fall back to what was sent.
            Ok(None) | Err(_) => Profile {
                id: user_id.clone(),
                username: Some(patch.username.clone()),
                avatar_url: patch.avatar_url.clone(),
                streak: Default::default(),
                updated_at: Some(patch.updated_at),
            },
        };
        self.set_profile(&user_id, Some(profile.clone()));
        tracing::info!(user_id = %user_id, username = %patch.username, "Profile set up");
        self.notifier
            .notify(Notice::success("Profile Saved!", "Your profile is now set up."));
        Ok(profile)
    }

    /// Confirm `session` with the server; a rejected session is dropped.
    async fn revalidate(&self, session: Session) {
        match self.gateway.get_user().await {
            Ok(user) if user.id == session.user.id => self.apply_session(session).await,
            Ok(user) => {
                tracing::warn!(
                    held = %session.user.id,
                    server = %user.id,
                    "Server reports a different user, dropping session"
                );
                self.clear();
            }
            Err(e) => {
                tracing::warn!(user_id = %session.user.id, error = %e, "Session is no longer valid");
                self.clear();
            }
        }
    }

    async fn apply_session(&self, session: Session) {
        let user_id = session.user.id.clone();
        self.state.send_modify(|s| {
            if s.user_id() != Some(user_id.as_str()) {
                s.profile = None;
                s.is_profile_setup_complete = false;
            }
            s.session = Some(session);
        });

        match self.fetch_profile(&user_id).await {
            Ok(profile) => self.set_profile(&user_id, profile),
            // Keep whatever profile was known for this user.
            Err(e) => tracing::error!(user_id = %user_id, error = %e, "Failed to fetch profile"),
        }
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, GatewayError> {
        let query = Query::new().eq(columns::ID, user_id).limit(1);
        let rows = self.gateway.select::<ProfileRow>(&query).await?;
        Ok(rows.into_iter().next().map(mapper::profile_from_row))
    }

    /// Store `profile` unless the session moved on to another user meanwhile.
    fn set_profile(&self, user_id: &str, profile: Option<Profile>) {
        self.state.send_if_modified(|s| {
            if s.user_id() != Some(user_id) {
                return false;
            }
            s.is_profile_setup_complete = profile.as_ref().is_some_and(Profile::is_setup_complete);
            s.profile = profile;
            true
        });
    }

    fn mark_initialized(&self) {
        self.state.send_if_modified(|s| std::mem::replace(&mut s.initializing, false));
    }

    fn clear(&self) {
        self.state.send_if_modified(|s| {
            if s.session.is_none() && s.profile.is_none() {
                return false;
            }
            s.session = None;
            s.profile = None;
            s.is_profile_setup_complete = false;
            true
        });
    }

    fn report(&self, title: &str, error: SessionError) -> SessionError {
        match &error {
            SessionError::Validation(_) | SessionError::UsernameTaken => {
                tracing::debug!(error = %error, "{}", title)
            }
            _ => tracing::error!(error = %error, "{}", title),
        }
        self.notifier.notify(Notice::error(title, error.to_string()));
        error
    }
}
