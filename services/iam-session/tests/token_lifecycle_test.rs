//! 令牌生命周期测试：刷新、重放、登出与撤销

mod common;

use std::sync::Arc;

use common::{ADMIN, ALICE, BOB, Harness, base_config, failing_lifecycle, user_id_for};
use iam_auth_core::TokenSubject;
use iam_common::{DeviceType, SessionId};
use iam_ports::SessionStore;
use iam_session::AuthError;

#[tokio::test]
async fn test_validate_returns_principal() {
    let h = Harness::new(base_config());
    let pair = h.login(ALICE, DeviceType::Mobile).await.unwrap();

    let principal = h.lifecycle.validate(&pair.access_token).await.unwrap();
    assert_eq!(principal.user_id, user_id_for(ALICE));
    assert_eq!(principal.session_id, pair.session_id);
    assert_eq!(principal.device_type, DeviceType::Mobile);
    assert_eq!(principal.roles, vec!["user".to_string()]);
}

#[tokio::test]
async fn test_validate_rejects_garbage_and_foreign_tokens() {
    let h = Harness::new(base_config());
    assert!(matches!(
        h.lifecycle.validate("not-a-token").await,
        Err(AuthError::InvalidAccessToken)
    ));

    // 签名有效但会话从未创建
    let issued = h
        .lifecycle
        .tokens()
        .issue_access_token(&TokenSubject {
            user_id: user_id_for(ALICE),
            username: ALICE.into(),
            session_id: SessionId::new(),
            device_type: DeviceType::Web,
            roles: vec![],
            permissions: vec![],
        })
        .unwrap();
    assert!(matches!(
        h.lifecycle.validate(&issued.token).await,
        Err(AuthError::InvalidAccessToken)
    ));
}

#[tokio::test]
async fn test_refresh_rotates_tokens() {
    let h = Harness::new(base_config());
    let first = h.login(ALICE, DeviceType::Web).await.unwrap();

    let second = h.lifecycle.refresh(&first.refresh_token).await.unwrap();
    assert_eq!(second.session_id, first.session_id);
    assert_ne!(second.refresh_token, first.refresh_token);
    assert_ne!(second.access_token, first.access_token);
    assert_eq!(second.refresh_expires_at, first.refresh_expires_at);

    // 旧访问令牌立即失效，新令牌可用
    assert!(h.lifecycle.validate(&first.access_token).await.is_err());
    let principal = h.lifecycle.validate(&second.access_token).await.unwrap();
    assert_eq!(principal.roles, vec!["user".to_string()]);

    let third = h.lifecycle.refresh(&second.refresh_token).await.unwrap();
    assert!(h.lifecycle.validate(&third.access_token).await.is_ok());
}

#[tokio::test]
async fn test_reused_refresh_token_terminates_session() {
    let h = Harness::new(base_config());
    let first = h.login(ALICE, DeviceType::Web).await.unwrap();
    let other = h.login(ALICE, DeviceType::Mobile).await.unwrap();

    let second = h.lifecycle.refresh(&first.refresh_token).await.unwrap();

    assert!(matches!(
        h.lifecycle.refresh(&first.refresh_token).await,
        Err(AuthError::InvalidRefreshToken)
    ));

    // 被盗会话整体终止，其他会话不受影响
    assert!(h.lifecycle.validate(&second.access_token).await.is_err());
    assert!(h.lifecycle.refresh(&second.refresh_token).await.is_err());
    assert!(h.store.get(&first.session_id).await.unwrap().is_none());
    assert!(h.lifecycle.validate(&other.access_token).await.is_ok());
}

#[tokio::test]
async fn test_reuse_can_revoke_every_session() {
    let mut config = base_config();
    config.session.revoke_all_on_refresh_reuse = true;
    let h = Harness::new(config);

    let first = h.login(ALICE, DeviceType::Web).await.unwrap();
    let other = h.login(ALICE, DeviceType::Mobile).await.unwrap();
    let bob = h.login(BOB, DeviceType::Web).await.unwrap();

    h.lifecycle.refresh(&first.refresh_token).await.unwrap();
    assert!(h.lifecycle.refresh(&first.refresh_token).await.is_err());

    assert!(h.lifecycle.validate(&other.access_token).await.is_err());
    assert!(h.lifecycle.validate(&bob.access_token).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_has_single_winner() {
    let h = Arc::new(Harness::new(base_config()));
    let pair = h.login(ALICE, DeviceType::Web).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let h = h.clone();
            let token = pair.refresh_token.clone();
            tokio::spawn(async move { h.lifecycle.refresh(&token).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert!(matches!(e, AuthError::InvalidRefreshToken), "{e:?}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_refresh_without_rotation_keeps_refresh_token() {
    let mut config = base_config();
    config.session.rotate_refresh_token = false;
    let h = Harness::new(config);

    let first = h.login(ALICE, DeviceType::Web).await.unwrap();
    let second = h.lifecycle.refresh(&first.refresh_token).await.unwrap();
    assert_eq!(second.refresh_token, first.refresh_token);
    assert!(h.lifecycle.validate(&first.access_token).await.is_err());
    assert!(h.lifecycle.validate(&second.access_token).await.is_ok());

    let third = h.lifecycle.refresh(&first.refresh_token).await.unwrap();
    assert!(h.lifecycle.validate(&third.access_token).await.is_ok());
}

#[tokio::test]
async fn test_refresh_rejects_unknown_and_malformed_tokens() {
    let h = Harness::new(base_config());
    let oversized = "x".repeat(500);
    for token in [
        "",
        "short",
        oversized.as_str(),
        "dGhpcyBpcyBub3QgYSByZWFsIHJlZnJlc2ggdG9rZW4",
    ] {
        assert!(matches!(
            h.lifecycle.refresh(token).await,
            Err(AuthError::InvalidRefreshToken)
        ));
    }
}

#[tokio::test]
async fn test_logout_is_idempotent_and_revokes() {
    let h = Harness::new(base_config());
    let pair = h.login(ALICE, DeviceType::Web).await.unwrap();

    h.lifecycle.logout(&pair.access_token).await.unwrap();
    assert!(matches!(
        h.lifecycle.validate(&pair.access_token).await,
        Err(AuthError::InvalidAccessToken)
    ));
    assert!(h.lifecycle.refresh(&pair.refresh_token).await.is_err());

    h.lifecycle.logout(&pair.access_token).await.unwrap();
}

#[tokio::test]
async fn test_logout_with_rotated_out_token_keeps_session() {
    let h = Harness::new(base_config());
    let first = h.login(ALICE, DeviceType::Web).await.unwrap();
    let second = h.lifecycle.refresh(&first.refresh_token).await.unwrap();

    h.lifecycle.logout(&first.access_token).await.unwrap();

    let principal = h.lifecycle.validate(&second.access_token).await.unwrap();
    assert_eq!(principal.session_id, first.session_id);

    let third = h.lifecycle.refresh(&second.refresh_token).await.unwrap();
    h.lifecycle.logout(&third.access_token).await.unwrap();
    assert!(h.lifecycle.validate(&third.access_token).await.is_err());
    assert!(h.lifecycle.refresh(&third.refresh_token).await.is_err());
}

#[tokio::test]
async fn test_logout_rejects_forged_token() {
    let h = Harness::new(base_config());
    assert!(matches!(
        h.lifecycle.logout("forged.token.value").await,
        Err(AuthError::InvalidAccessToken)
    ));
}

#[tokio::test]
async fn test_revoke_all_terminates_every_session() {
    let h = Harness::new(base_config());
    let web = h.login(ALICE, DeviceType::Web).await.unwrap();
    let mobile = h.login(ALICE, DeviceType::Mobile).await.unwrap();
    let bob = h.login(BOB, DeviceType::Web).await.unwrap();

    let revoked = h.lifecycle.revoke_all(&user_id_for(ALICE)).await.unwrap();
    assert_eq!(revoked, 2);

    assert!(h.lifecycle.validate(&web.access_token).await.is_err());
    assert!(h.lifecycle.validate(&mobile.access_token).await.is_err());
    assert!(h.lifecycle.refresh(&mobile.refresh_token).await.is_err());
    assert!(h.lifecycle.validate(&bob.access_token).await.is_ok());

    assert_eq!(h.lifecycle.revoke_all(&user_id_for(ALICE)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_session_management_permissions() {
    let h = Harness::new(base_config());
    let alice = h.login(ALICE, DeviceType::Web).await.unwrap();
    let bob = h.login(BOB, DeviceType::Web).await.unwrap();
    let admin = h.login(ADMIN, DeviceType::Desktop).await.unwrap();

    let bob_principal = h.lifecycle.validate(&bob.access_token).await.unwrap();
    assert!(matches!(
        h.lifecycle
            .terminate_session(&bob_principal, &alice.session_id)
            .await,
        Err(AuthError::Forbidden(_))
    ));
    assert!(matches!(
        h.lifecycle
            .revoke_user_sessions(&bob_principal, &user_id_for(ALICE))
            .await,
        Err(AuthError::Forbidden(_))
    ));
    assert!(matches!(
        h.lifecycle
            .terminate_session(&bob_principal, &SessionId::new())
            .await,
        Err(AuthError::SessionNotFound)
    ));

    let admin_principal = h.lifecycle.validate(&admin.access_token).await.unwrap();
    h.lifecycle
        .terminate_session(&admin_principal, &alice.session_id)
        .await
        .unwrap();
    assert!(h.lifecycle.validate(&alice.access_token).await.is_err());

    let sessions = h.lifecycle.list_sessions(&bob_principal).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, bob.session_id);
}

#[tokio::test]
async fn test_store_outage_fails_closed() {
    let config = base_config();
    let lifecycle = failing_lifecycle(&config);

    let err = lifecycle
        .login(common::command(ALICE, &common::password_for(ALICE), DeviceType::Web))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InfrastructureUnavailable(_)));
    assert_eq!(err.status_code().as_u16(), 503);

    let issued = lifecycle
        .tokens()
        .issue_access_token(&TokenSubject {
            user_id: user_id_for(ALICE),
            username: ALICE.into(),
            session_id: SessionId::new(),
            device_type: DeviceType::Web,
            roles: vec![],
            permissions: vec![],
        })
        .unwrap();
    assert!(matches!(
        lifecycle.validate(&issued.token).await,
        Err(AuthError::InfrastructureUnavailable(_))
    ));
}
