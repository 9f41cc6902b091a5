use std::sync::Arc;
use std::time::Duration;

use greensight_gateway::mock::{MemoryGateway, MockCall};
use greensight_gateway::rows::ProfileSetupPatch;
use greensight_gateway::{Auth, AuthChange, AuthEvent, Table, Tables};
use greensight_sync::{
    AppLifecycle, AuthFlow, CollectingNotifier, NoticeLevel, SessionError, SessionStore,
    SignUpOutcome,
};
use tokio::sync::mpsc;

const MAX_UPLOAD: u64 = 1024 * 1024;

fn store(gw: &Arc<MemoryGateway>) -> (SessionStore<MemoryGateway>, Arc<CollectingNotifier>) {
    let notifier = Arc::new(CollectingNotifier::new());
    let store = SessionStore::new(Arc::clone(gw), notifier.clone(), MAX_UPLOAD);
    (store, notifier)
}

mod initialize {
    use super::*;

    #[tokio::test]
    async fn no_stored_session_means_signed_out() {
        let gw = Arc::new(MemoryGateway::new());
        let (store, _) = store(&gw);
        assert_eq!(store.flow(), AuthFlow::Initializing);

        store.initialize().await;
        assert_eq!(store.flow(), AuthFlow::SignedOut);
        assert!(!gw.get_calls().contains(&MockCall::GetUser));
    }

    #[tokio::test]
    async fn valid_session_without_username_needs_setup() {
        let gw = Arc::new(MemoryGateway::new());
        gw.register("a@example.com", "secret123");
        let session = gw.sign_in_with_password("a@example.com", "secret123").await.unwrap();
        let (store, _) = store(&gw);

        store.initialize().await;
        let state = store.state();
        assert_eq!(state.session.as_ref(), Some(&session));
        assert!(state.profile.is_some());
        assert!(!state.is_profile_setup_complete);
        assert_eq!(store.flow(), AuthFlow::ProfileSetup);
    }

    #[tokio::test]
    async fn revoked_session_is_dropped() {
        let gw = Arc::new(MemoryGateway::new());
        gw.register("a@example.com", "secret123");
        gw.sign_in_with_password("a@example.com", "secret123").await.unwrap();
        gw.revoke_session();
        let (store, _) = store(&gw);

        store.initialize().await;
        assert_eq!(store.flow(), AuthFlow::SignedOut);
        assert!(store.state().session.is_none());
    }

    #[tokio::test]
    async fn app_returning_to_foreground_revalidates() {
        let gw = Arc::new(MemoryGateway::new());
        gw.register("a@example.com", "secret123");
        let (store, _) = store(&gw);
        store.initialize().await;
        store.sign_in("a@example.com", "secret123").await.unwrap();
        assert_eq!(store.flow(), AuthFlow::ProfileSetup);

        gw.revoke_session();
        store.on_app_active().await;
        assert_eq!(store.flow(), AuthFlow::SignedOut);
    }
}

mod auth_events {
    use super::*;

    #[tokio::test]
    async fn signed_in_event_fetches_profile() {
        let gw = Arc::new(MemoryGateway::new());
        gw.register("a@example.com", "secret123");
        let session = gw.sign_in_with_password("a@example.com", "secret123").await.unwrap();
        let (store, _) = store(&gw);

        store
            .handle_auth_event(AuthEvent {
                change: AuthChange::SignedIn,
                session: Some(session.clone()),
            })
            .await;
        assert_eq!(store.user_id().as_deref(), Some(session.user.id.as_str()));
        assert_eq!(store.flow(), AuthFlow::ProfileSetup);
        assert!(gw
            .get_calls()
            .iter()
            .any(|c| matches!(c, MockCall::Select { table: Table::Profiles, .. })));
    }

    #[tokio::test]
    async fn signed_out_event_clears_state() {
        let gw = Arc::new(MemoryGateway::new());
        gw.register("a@example.com", "secret123");
        let (store, _) = store(&gw);
        store.sign_in("a@example.com", "secret123").await.unwrap();

        store
            .handle_auth_event(AuthEvent {
                change: AuthChange::SignedOut,
                session: None,
            })
            .await;
        let state = store.state();
        assert!(state.session.is_none());
        assert!(state.profile.is_none());
        assert_eq!(store.flow(), AuthFlow::SignedOut);
    }

    #[tokio::test]
    async fn run_follows_events_and_lifecycle() {
        let gw = Arc::new(MemoryGateway::new());
        gw.register("a@example.com", "secret123");
        let (store, _) = store(&gw);
        let store = Arc::new(store);
        let (tx, rx) = mpsc::channel(4);

        let runner = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.run(rx).await })
        };
        tokio::task::yield_now().await;

        let mut states = store.subscribe();
        gw.sign_in_with_password("a@example.com", "secret123").await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(1),
            states.wait_for(|s| s.session.is_some() && s.profile.is_some()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(store.flow(), AuthFlow::ProfileSetup);

        gw.revoke_session();
        tx.send(AppLifecycle::Active).await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(1),
            states.wait_for(|s| s.session.is_none()),
        )
        .await
        .unwrap()
        .unwrap();

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .unwrap()
            .unwrap();
    }
}

mod account {
    use super::*;

    #[tokio::test]
    async fn wrong_password_is_reported() {
        let gw = Arc::new(MemoryGateway::new());
        gw.register("a@example.com", "secret123");
        let (store, notifier) = store(&gw);

        let err = store.sign_in("a@example.com", "nope").await.unwrap_err();
        assert!(matches!(err, SessionError::Gateway(_)));
        assert_eq!(notifier.count(NoticeLevel::Error), 1);
        assert!(store.state().session.is_none());
    }

    #[tokio::test]
    async fn sign_up_may_await_confirmation() {
        let gw = Arc::new(MemoryGateway::new().with_email_confirmation());
        let (store, notifier) = store(&gw);

        let outcome = store.sign_up("new@example.com", "secret123").await.unwrap();
        assert_eq!(outcome, SignUpOutcome::ConfirmationRequired);
        assert!(store.state().session.is_none());
        assert_eq!(notifier.count(NoticeLevel::Info), 1);
    }

    #[tokio::test]
    async fn sign_up_signs_in() {
        let gw = Arc::new(MemoryGateway::new());
        let (store, _) = store(&gw);
        let outcome = store.sign_up("new@example.com", "secret123").await.unwrap();
        assert_eq!(outcome, SignUpOutcome::SignedIn);
        assert_eq!(store.flow(), AuthFlow::ProfileSetup);
    }

    #[tokio::test]
    async fn sign_out_clears_session() {
        let gw = Arc::new(MemoryGateway::new());
        gw.register("a@example.com", "secret123");
        let (store, _) = store(&gw);
        store.sign_in("a@example.com", "secret123").await.unwrap();

        store.sign_out().await.unwrap();
        assert_eq!(store.flow(), AuthFlow::SignedOut);
        assert!(gw.get_session().await.unwrap().is_none());
    }
}

mod profile_setup {
    use super::*;

    async fn signed_in(
        gw: &Arc<MemoryGateway>,
        email: &str,
    ) -> (SessionStore<MemoryGateway>, Arc<CollectingNotifier>) {
        gw.register(email, "secret123");
        let (store, notifier) = store(gw);
        store.sign_in(email, "secret123").await.unwrap();
        (store, notifier)
    }

    #[tokio::test]
    async fn username_completes_setup() {
        let gw = Arc::new(MemoryGateway::new());
        let (store, notifier) = signed_in(&gw, "a@example.com").await;

        let profile = store.complete_profile("  sprout_fan ", None).await.unwrap();
        assert_eq!(profile.username.as_deref(), Some("sprout_fan"));
        assert_eq!(store.flow(), AuthFlow::Main);
        assert_eq!(notifier.notices().last().unwrap().title, "Profile Saved!");
    }

    #[tokio::test]
    async fn invalid_username_is_not_written() {
        let gw = Arc::new(MemoryGateway::new());
        let (store, _) = signed_in(&gw, "a@example.com").await;

        let err = store.complete_profile("no spaces!", None).await.unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
        assert!(!gw
            .get_calls()
            .iter()
            .any(|c| matches!(c, MockCall::Update { .. })));
        assert_eq!(store.flow(), AuthFlow::ProfileSetup);
    }

    #[tokio::test]
    async fn taken_username_is_distinguished() {
        let gw = Arc::new(MemoryGateway::new());
        let other = gw.register("b@example.com", "secret123");
        gw.update(
            &other.id,
            &ProfileSetupPatch {
                username: "sprout_fan".into(),
                avatar_url: None,
                updated_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();
        let (store, notifier) = signed_in(&gw, "a@example.com").await;

        let err = store.complete_profile("sprout_fan", None).await.unwrap_err();
        assert!(matches!(err, SessionError::UsernameTaken));
        assert_eq!(
            err.to_string(),
            "Username already taken. Please choose another."
        );
        assert_eq!(notifier.notices().last().unwrap().title, "Username Taken");
        assert_eq!(store.flow(), AuthFlow::ProfileSetup);
    }

    #[tokio::test]
    async fn avatar_upload_failure_still_saves_profile() {
        let gw = Arc::new(MemoryGateway::new());
        let (store, notifier) = signed_in(&gw, "a@example.com").await;

        let dir = tempfile::tempdir().unwrap();
        let avatar = dir.path().join("me.png");
        std::fs::write(&avatar, [0x89, b'P', b'N', b'G']).unwrap();

        let profile = store.complete_profile("sprout_fan", Some(&avatar)).await.unwrap();
        assert_eq!(profile.avatar_url, None);
        assert_eq!(notifier.count(NoticeLevel::Warning), 1);
        assert_eq!(store.flow(), AuthFlow::Main);
    }

    #[tokio::test]
    async fn avatar_is_uploaded_to_avatars_bucket() {
        let gw = Arc::new(MemoryGateway::new().with_buckets(&["avatars"]));
        let (store, _) = signed_in(&gw, "a@example.com").await;

        let dir = tempfile::tempdir().unwrap();
        let avatar = dir.path().join("me.png");
        std::fs::write(&avatar, [0x89, b'P', b'N', b'G']).unwrap();

        let profile = store.complete_profile("sprout_fan", Some(&avatar)).await.unwrap();
        let url = profile.avatar_url.unwrap();
        assert!(url.starts_with("memory://storage/avatars/"));
    }

    #[tokio::test]
    async fn requires_a_session() {
        let gw = Arc::new(MemoryGateway::new());
        let (store, _) = store(&gw);
        assert!(matches!(
            store.complete_profile("sprout_fan", None).await,
            Err(SessionError::NotSignedIn)
        ));
    }
}
