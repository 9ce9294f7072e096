mod common;

use std::sync::Arc;

use quillgate::auth::user::IdentityProvider;
use quillgate::config::AuthConfig;
use quillgate::core::AuthGateway;
use quillgate::error::QuillgateError;
use quillgate::storage::{create_memory_session_store, MemoryUserStore};

use common::{auto_link_gateway, gateway, google_token, google_token_signed_with};

#[tokio::test]
async fn test_register_login_refresh_once() {
    let (gateway, _) = gateway();
    let user = gateway
        .register("a@x.com", "pw1-secret", Some("Ada".to_string()))
        .await
        .unwrap();
    assert_eq!(user.email, "a@x.com");
    assert!(user.has_password());

    let pair = gateway.login("a@x.com", "pw1-secret").await.unwrap();
    assert_eq!(pair.user_id, user.id);
    assert_eq!(
        gateway.tokens().verify_access_token(&pair.access.token).unwrap(),
        user.id
    );

    let rotated = gateway.refresh(&pair.refresh.token).await.unwrap();
    assert_ne!(rotated.refresh.token_id, pair.refresh.token_id);

    // Second use of the same refresh token
    assert!(matches!(
        gateway.refresh(&pair.refresh.token).await,
        Err(QuillgateError::RevokedToken)
    ));

    // The rotated token is still good
    assert!(gateway.refresh(&rotated.refresh.token).await.is_ok());
}

#[tokio::test]
async fn test_login_returns_same_error_for_every_failure() {
    let (gateway, _) = gateway();
    gateway.register("a@x.com", "pw1-secret", None).await.unwrap();

    let wrong_password = gateway.login("a@x.com", "not-it").await.unwrap_err();
    let unknown_email = gateway.login("nobody@x.com", "pw1-secret").await.unwrap_err();

    assert!(matches!(wrong_password, QuillgateError::InvalidCredentials));
    assert!(matches!(unknown_email, QuillgateError::InvalidCredentials));
    assert_eq!(wrong_password.public_code(), unknown_email.public_code());
}

#[tokio::test]
async fn test_login_normalizes_email() {
    let (gateway, _) = gateway();
    gateway.register("Writer@Example.com", "pw1-secret", None).await.unwrap();
    assert!(gateway.login("  writer@example.COM ", "pw1-secret").await.is_ok());
}

#[tokio::test]
async fn test_register_validation() {
    let (gateway, _) = gateway();
    assert!(matches!(
        gateway.register("not-an-email", "pw1-secret", None).await,
        Err(QuillgateError::ValidationError(_))
    ));
    assert!(matches!(
        gateway.register("a@x.com", "short", None).await,
        Err(QuillgateError::ValidationError(_))
    ));

    gateway.register("a@x.com", "pw1-secret", None).await.unwrap();
    assert!(matches!(
        gateway.register("A@X.com", "another-pw", None).await,
        Err(QuillgateError::EmailTaken)
    ));
}

#[tokio::test]
async fn test_display_names_may_repeat() {
    let (gateway, _) = gateway();
    let first = gateway
        .register("ada@x.com", "pw1-secret", Some("Ada".to_string()))
        .await
        .unwrap();
    let second = gateway
        .register("lovelace@x.com", "pw2-secret", Some("Ada".to_string()))
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(second.display_name.as_deref(), Some("Ada"));
    assert!(gateway.login("lovelace@x.com", "pw2-secret").await.is_ok());

    assert!(matches!(
        gateway.register("x@x.com", "pw1-secret", Some("a".repeat(51))).await,
        Err(QuillgateError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_concurrent_refresh_has_one_winner() {
    let (gateway, _) = gateway();
    gateway.register("a@x.com", "pw1-secret", None).await.unwrap();
    let pair = gateway.login("a@x.com", "pw1-secret").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gateway = Arc::clone(&gateway);
        let token = pair.refresh.token.clone();
        handles.push(tokio::spawn(async move { gateway.refresh(&token).await }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert!(matches!(e, QuillgateError::RevokedToken)),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let (gateway, _) = gateway();
    gateway.register("a@x.com", "pw1-secret", None).await.unwrap();
    let pair = gateway.login("a@x.com", "pw1-secret").await.unwrap();

    gateway.logout(&pair.refresh.token).await;
    gateway.logout(&pair.refresh.token).await;
    gateway.logout("garbage").await;
    gateway.logout("").await;

    assert!(matches!(
        gateway.refresh(&pair.refresh.token).await,
        Err(QuillgateError::RevokedToken)
    ));
}

#[tokio::test]
async fn test_logout_all_revokes_every_session() {
    let (gateway, _) = gateway();
    gateway.register("a@x.com", "pw1-secret", None).await.unwrap();
    let first = gateway.login("a@x.com", "pw1-secret").await.unwrap();
    let second = gateway.login("a@x.com", "pw1-secret").await.unwrap();

    assert_eq!(gateway.logout_all(&second.access.token).await.unwrap(), 2);
    assert!(gateway.refresh(&first.refresh.token).await.is_err());
    assert!(gateway.refresh(&second.refresh.token).await.is_err());
}

#[tokio::test]
async fn test_google_sign_in_creates_account_once() {
    let (gateway, users) = gateway();
    let token = google_token("g-100", "writer@example.com");

    let first = gateway.login_with_provider(&token).await.unwrap();
    let second = gateway.login_with_provider(&token).await.unwrap();
    assert_eq!(first.user_id, second.user_id);

    let user = users.find_by_id(&first.user_id).await.unwrap().unwrap();
    assert_eq!(user.email, "writer@example.com");
    assert!(!user.has_password());

    let identities = users.identities_for(&user.id).await.unwrap();
    assert_eq!(identities.len(), 1);
    assert_eq!(identities[0].provider, IdentityProvider::Google);
    assert_eq!(identities[0].subject, "g-100");
}

#[tokio::test]
async fn test_google_account_cannot_use_password_login() {
    let (gateway, _) = gateway();
    gateway
        .login_with_provider(&google_token("g-100", "writer@example.com"))
        .await
        .unwrap();

    assert!(matches!(
        gateway.login("writer@example.com", "anything-at-all").await,
        Err(QuillgateError::InvalidCredentials)
    ));
}

#[tokio::test]
async fn test_tampered_google_token_issues_nothing() {
    let (gateway, users) = gateway();
    let forged = google_token_signed_with("g-666", "victim@example.com", b"not-the-provider-key");

    assert!(matches!(
        gateway.login_with_provider(&forged).await,
        Err(QuillgateError::InvalidToken(_))
    ));
    assert!(users.find_by_email("victim@example.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_conflicting_account_then_explicit_link() {
    let (gateway, users) = gateway();
    let account = gateway.register("a@x.com", "pw1-secret", None).await.unwrap();
    let provider_token = google_token("g-200", "a@x.com");

    assert!(matches!(
        gateway.login_with_provider(&provider_token).await,
        Err(QuillgateError::ConflictingAccount)
    ));
    assert!(users
        .find_by_identity(IdentityProvider::Google, "g-200")
        .await
        .unwrap()
        .is_none());

    let session = gateway.login("a@x.com", "pw1-secret").await.unwrap();
    let identity = gateway
        .link_provider(&session.access.token, &provider_token)
        .await
        .unwrap();
    assert_eq!(identity.user_id, account.id);

    // Linking again is a no-op
    let again = gateway
        .link_provider(&session.access.token, &provider_token)
        .await
        .unwrap();
    assert_eq!(again.subject, identity.subject);

    let pair = gateway.login_with_provider(&provider_token).await.unwrap();
    assert_eq!(pair.user_id, account.id);
}

#[tokio::test]
async fn test_auto_link_policy_merges_accounts() {
    let (gateway, users) = auto_link_gateway();
    let account = gateway.register("a@x.com", "pw1-secret", None).await.unwrap();

    let pair = gateway
        .login_with_provider(&google_token("g-300", "a@x.com"))
        .await
        .unwrap();
    assert_eq!(pair.user_id, account.id);
    assert_eq!(users.identities_for(&account.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_identity_owned_by_another_user_cannot_be_linked() {
    let (gateway, _) = gateway();
    let provider_token = google_token("g-400", "owner@example.com");
    gateway.login_with_provider(&provider_token).await.unwrap();

    gateway.register("other@example.com", "pw1-secret", None).await.unwrap();
    let session = gateway.login("other@example.com", "pw1-secret").await.unwrap();

    assert!(matches!(
        gateway.link_provider(&session.access.token, &provider_token).await,
        Err(QuillgateError::ConflictingAccount)
    ));
}

#[tokio::test]
async fn test_password_change_revokes_sessions() {
    let (gateway, _) = gateway();
    gateway.register("a@x.com", "pw1-secret", None).await.unwrap();
    let laptop = gateway.login("a@x.com", "pw1-secret").await.unwrap();
    let phone = gateway.login("a@x.com", "pw1-secret").await.unwrap();

    let revoked = gateway
        .change_password(&laptop.access.token, "pw1-secret", "pw2-secret")
        .await
        .unwrap();
    assert_eq!(revoked, 2);

    for token in [&laptop.refresh.token, &phone.refresh.token] {
        assert!(matches!(
            gateway.refresh(token).await,
            Err(QuillgateError::RevokedToken)
        ));
    }

    assert!(gateway.login("a@x.com", "pw1-secret").await.is_err());
    assert!(gateway.login("a@x.com", "pw2-secret").await.is_ok());
}

#[tokio::test]
async fn test_password_change_requires_current_password() {
    let (gateway, _) = gateway();
    gateway.register("a@x.com", "pw1-secret", None).await.unwrap();
    let session = gateway.login("a@x.com", "pw1-secret").await.unwrap();

    assert!(matches!(
        gateway
            .change_password(&session.access.token, "wrong-one", "pw2-secret")
            .await,
        Err(QuillgateError::InvalidCredentials)
    ));
    // Session untouched
    assert!(gateway.refresh(&session.refresh.token).await.is_ok());
}

#[tokio::test]
async fn test_current_user_requires_access_token() {
    let (gateway, _) = gateway();
    let account = gateway.register("a@x.com", "pw1-secret", None).await.unwrap();
    let pair = gateway.login("a@x.com", "pw1-secret").await.unwrap();

    let me = gateway.current_user(&pair.access.token).await.unwrap();
    assert_eq!(me.id, account.id);

    assert!(gateway.current_user(&pair.refresh.token).await.is_err());
    assert!(gateway.current_user("nonsense").await.is_err());
}

#[tokio::test]
async fn test_google_sign_in_without_configuration() {
    let config = AuthConfig::new(common::SECRET).unwrap();
    let gateway = AuthGateway::new(
        &config,
        Arc::new(MemoryUserStore::new()),
        create_memory_session_store(),
        None,
    );

    assert!(matches!(
        gateway
            .login_with_provider(&google_token("g-1", "writer@example.com"))
            .await,
        Err(QuillgateError::ConfigError(_))
    ));
}
