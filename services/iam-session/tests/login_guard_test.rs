//! 登录防护测试：失败锁定、登录频率、验证码与审计

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    ALICE, BOB, Harness, LOCKED, SlowRegionResolver, base_config, command, password_for,
};
use iam_common::DeviceType;
use iam_session::AuthError;

#[tokio::test]
async fn test_sixth_attempt_locked_without_verifying() {
    let h = Harness::new(base_config());

    for _ in 0..5 {
        assert!(matches!(
            h.login_with_password(ALICE, "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
    }
    assert_eq!(h.verifier.calls(), 5);

    // 即使密码正确也在校验凭证之前被拒绝
    let err = h.login(ALICE, DeviceType::Web).await.unwrap_err();
    match err {
        AuthError::AccountLocked { retry_after_secs } => {
            let secs = retry_after_secs.unwrap();
            assert!(secs > 0 && secs <= 900);
        }
        other => panic!("expected AccountLocked, got {other:?}"),
    }
    assert_eq!(h.verifier.calls(), 5);

    // 其他账户不受影响
    assert!(h.login(BOB, DeviceType::Web).await.is_ok());
}

#[tokio::test]
async fn test_successful_login_resets_failures() {
    let h = Harness::new(base_config());

    for _ in 0..4 {
        let _ = h.login_with_password(ALICE, "wrong").await;
    }
    assert_eq!(h.failed_attempts(ALICE).await, 4);

    h.login(ALICE, DeviceType::Web).await.unwrap();
    assert_eq!(h.failed_attempts(ALICE).await, 0);

    // 计数已清零，可以再失败 4 次而不被锁定
    for _ in 0..4 {
        let _ = h.login_with_password(ALICE, "wrong").await;
    }
    assert!(h.login(ALICE, DeviceType::Web).await.is_ok());
}

#[tokio::test]
async fn test_username_case_shares_failure_counter() {
    let mut config = base_config();
    config.login.max_failed_attempts = 2;
    let h = Harness::new(config);

    let _ = h.login_with_password("Alice", "wrong").await;
    let _ = h.login_with_password(" ALICE ", "wrong").await;

    assert!(matches!(
        h.login(ALICE, DeviceType::Web).await,
        Err(AuthError::AccountLocked { .. })
    ));
}

#[tokio::test]
async fn test_disabled_account_is_locked() {
    let h = Harness::new(base_config());
    let err = h.login(LOCKED, DeviceType::Web).await.unwrap_err();
    assert!(matches!(
        err,
        AuthError::AccountLocked {
            retry_after_secs: None
        }
    ));
}

#[tokio::test]
async fn test_frequency_guard_counts_only_successes() {
    let mut config = base_config();
    config.login.frequency_max_logins = 2;
    config.login.frequency_window_secs = 60;
    let h = Harness::new(config);

    // 失败不消耗频率额度
    for _ in 0..3 {
        let _ = h.login_with_password(ALICE, "wrong").await;
    }

    h.login(ALICE, DeviceType::Web).await.unwrap();
    h.login(ALICE, DeviceType::Mobile).await.unwrap();

    let err = h.login(ALICE, DeviceType::Desktop).await.unwrap_err();
    assert!(matches!(
        err,
        AuthError::TooManyLoginAttempts {
            retry_after_secs: Some(60)
        }
    ));
    assert_eq!(err.status_code().as_u16(), 429);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_frequency_guard_holds_under_concurrent_logins() {
    let mut config = base_config();
    config.login.frequency_max_logins = 2;
    config.login.frequency_window_secs = 60;
    let h = Harness::with_region(
        config,
        Arc::new(SlowRegionResolver(Duration::from_millis(20))),
    );

    let mut handles = Vec::new();
    for _ in 0..16 {
        let lifecycle = h.lifecycle.clone();
        handles.push(tokio::spawn(async move {
            lifecycle
                .login(command(ALICE, &password_for(ALICE), DeviceType::Web))
                .await
        }));
    }

    let mut succeeded = 0;
    let mut throttled = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(AuthError::TooManyLoginAttempts { .. }) => throttled += 1,
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
    assert_eq!(succeeded, 2);
    assert_eq!(throttled, 14);
}

#[tokio::test]
async fn test_rejected_admission_does_not_use_frequency_quota() {
    let mut config = base_config();
    config.login.frequency_max_logins = 2;
    config.login.frequency_window_secs = 60;
    config.session.max_sessions.insert("web".into(), 1);
    let h = Harness::new(config);

    h.login(ALICE, DeviceType::Web).await.unwrap();
    assert!(matches!(
        h.login(ALICE, DeviceType::Web).await,
        Err(AuthError::TooManyDevices { .. })
    ));

    // 被拒绝的登录已归还配额，第二次成功登录仍在上限内
    h.login(ALICE, DeviceType::Mobile).await.unwrap();
    assert!(matches!(
        h.login(ALICE, DeviceType::Desktop).await,
        Err(AuthError::TooManyLoginAttempts { .. })
    ));
}

#[tokio::test]
async fn test_captcha_is_single_use_and_case_insensitive() {
    let mut config = base_config();
    config.login.captcha_enabled = true;
    let h = Harness::new(config);
    h.store.put_captcha("c-1", "AbCd", Duration::from_secs(60));

    let mut login = command(ALICE, &password_for(ALICE), DeviceType::Web);
    login.captcha_id = Some("c-1".into());
    login.captcha_code = Some("abcd".into());
    h.lifecycle.login(login.clone()).await.unwrap();

    // 同一个验证码不能再用
    assert!(matches!(
        h.lifecycle.login(login).await,
        Err(AuthError::InvalidCaptcha)
    ));

    assert!(matches!(
        h.login(ALICE, DeviceType::Web).await,
        Err(AuthError::InvalidCaptcha)
    ));
}

#[tokio::test]
async fn test_wrong_captcha_does_not_reach_verifier() {
    let mut config = base_config();
    config.login.captcha_enabled = true;
    let h = Harness::new(config);
    h.store.put_captcha("c-2", "xyz1", Duration::from_secs(60));

    let mut login = command(ALICE, &password_for(ALICE), DeviceType::Web);
    login.captcha_id = Some("c-2".into());
    login.captcha_code = Some("nope".into());

    assert!(matches!(
        h.lifecycle.login(login).await,
        Err(AuthError::InvalidCaptcha)
    ));
    assert_eq!(h.verifier.calls(), 0);
}

#[tokio::test]
async fn test_empty_credentials_rejected() {
    let h = Harness::new(base_config());
    assert!(matches!(
        h.login_with_password("  ", "x").await,
        Err(AuthError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.login_with_password(ALICE, "").await,
        Err(AuthError::InvalidRequest(_))
    ));
    assert_eq!(h.verifier.calls(), 0);
}

#[tokio::test]
async fn test_login_events_are_audited() {
    let h = Harness::new(base_config());

    let _ = h.login_with_password(ALICE, "wrong").await;
    h.login(ALICE, DeviceType::Web).await.unwrap();

    let events = h.audit.wait_for(2).await;
    assert_eq!(events.len(), 2);

    let failure = events.iter().find(|e| !e.success).unwrap();
    assert_eq!(failure.username, ALICE);
    assert_eq!(failure.reason.as_deref(), Some("INVALID_CREDENTIALS"));
    assert_eq!(failure.ip, "10.0.0.8");

    let success = events.iter().find(|e| e.success).unwrap();
    assert_eq!(success.user_agent, "integration-test");
    assert!(success.reason.is_none());
}
