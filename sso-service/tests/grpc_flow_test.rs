mod common;

use common::{with_auth, TestApp, TEST_APP_ID, TEST_APP_SECRET, TEST_PASSWORD};
use secrecy::SecretString;
use sso_service::config::TokenConfig;
use sso_service::grpc::proto::{
    EmailVerifyRequest, ForgotPasswordRequest, GetUserInfoRequest, GetUserPermissionsRequest,
    GrantPermissionRequest, HasUserPermissionRequest, LoginRequest, LogoutRequest,
    RefreshTokenRequest, RegisterRequest, ResetPasswordRequest, SendEmailVerificationRequest,
};
use sso_service::services::{MailKind, TokenCodec, TokenType};
use tonic::Code;

#[tokio::test]
async fn test_register_login_and_user_info() {
    let app = TestApp::spawn().await;
    let mut client = app.auth_client().await;

    let registered = client
        .register(RegisterRequest {
            name: "Alice".to_string(),
            phone: "+1 555 0100".to_string(),
            address: "1 Main St".to_string(),
            email: "Alice@Example.com".to_string(),
            password: TEST_PASSWORD.to_string(),
        })
        .await
        .unwrap()
        .into_inner();

    assert!(registered.user_id > 0);
    assert_eq!(registered.email, "alice@example.com");
    assert!(!registered.activated);

    let tokens = app.login("alice@example.com").await;
    assert!(!tokens.access_token.is_empty());
    assert!(!tokens.refresh_token.is_empty());
    assert!(tokens.expires_at > chrono::Utc::now().timestamp());

    let info = client
        .get_user_info(with_auth(
            GetUserInfoRequest {
                access_token: tokens.access_token.clone(),
            },
            &tokens.access_token,
        ))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(info.user_id, registered.user_id);
    assert_eq!(info.name, "Alice");
    assert_eq!(info.phone, "+1 555 0100");
    assert_eq!(info.address, "1 Main St");
}

#[tokio::test]
async fn test_duplicate_email_is_rejected() {
    let app = TestApp::spawn().await;
    app.register_and_login("dup@example.com").await;

    let err = app
        .auth_client()
        .await
        .register(RegisterRequest {
            name: "Again".to_string(),
            email: "DUP@example.com".to_string(),
            password: TEST_PASSWORD.to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::AlreadyExists);
}

#[tokio::test]
async fn test_register_validates_input() {
    let app = TestApp::spawn().await;
    let mut client = app.auth_client().await;

    let short_password = client
        .register(RegisterRequest {
            name: "Short".to_string(),
            email: "short@example.com".to_string(),
            password: "seven77".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(short_password.code(), Code::InvalidArgument);

    let missing_name = client
        .register(RegisterRequest {
            email: "noname@example.com".to_string(),
            password: TEST_PASSWORD.to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(missing_name.code(), Code::InvalidArgument);
    assert_eq!(missing_name.message(), "name is required");
}

#[tokio::test]
async fn test_login_failures_do_not_reveal_which_part_was_wrong() {
    let app = TestApp::spawn().await;
    app.register_and_login("bob@example.com").await;
    let mut client = app.auth_client().await;

    let wrong_password = client
        .login(LoginRequest {
            email: "bob@example.com".to_string(),
            password: "not-the-password".to_string(),
            app_id: TEST_APP_ID,
        })
        .await
        .unwrap_err();
    let unknown_email = client
        .login(LoginRequest {
            email: "nobody@example.com".to_string(),
            password: TEST_PASSWORD.to_string(),
            app_id: TEST_APP_ID,
        })
        .await
        .unwrap_err();

    assert_eq!(wrong_password.code(), Code::Unauthenticated);
    assert_eq!(wrong_password.code(), unknown_email.code());
    assert_eq!(wrong_password.message(), unknown_email.message());
    assert_eq!(wrong_password.message(), "invalid email or password");
}

#[tokio::test]
async fn test_login_requires_known_app() {
    let app = TestApp::spawn().await;
    app.register_and_login("carol@example.com").await;
    let mut client = app.auth_client().await;

    let unknown = client
        .login(LoginRequest {
            email: "carol@example.com".to_string(),
            password: TEST_PASSWORD.to_string(),
            app_id: 77,
        })
        .await
        .unwrap_err();
    assert_eq!(unknown.code(), Code::NotFound);

    let missing = client
        .login(LoginRequest {
            email: "carol@example.com".to_string(),
            password: TEST_PASSWORD.to_string(),
            app_id: 0,
        })
        .await
        .unwrap_err();
    assert_eq!(missing.code(), Code::InvalidArgument);
    assert_eq!(missing.message(), "app_id is required");
}

#[tokio::test]
async fn test_refresh_rotates_and_old_token_is_single_use() {
    let app = TestApp::spawn().await;
    let session = app.register_and_login("dave@example.com").await;
    let mut client = app.auth_client().await;

    let rotated = client
        .refresh_token(RefreshTokenRequest {
            refresh_token: session.tokens.refresh_token.clone(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_ne!(rotated.refresh_token, session.tokens.refresh_token);
    assert_ne!(rotated.access_token, session.tokens.access_token);

    let replay = client
        .refresh_token(RefreshTokenRequest {
            refresh_token: session.tokens.refresh_token.clone(),
        })
        .await
        .unwrap_err();
    assert_eq!(replay.code(), Code::NotFound);

    assert_eq!(app.storage.refresh_token_count(session.user_id).await, 1);

    client
        .logout(with_auth(
            LogoutRequest {
                refresh_token: rotated.refresh_token.clone(),
            },
            &rotated.access_token,
        ))
        .await
        .unwrap();

    let after_logout = client
        .refresh_token(RefreshTokenRequest {
            refresh_token: rotated.refresh_token,
        })
        .await
        .unwrap_err();
    assert_eq!(after_logout.code(), Code::NotFound);
    assert_eq!(app.storage.refresh_token_count(session.user_id).await, 0);
}

#[tokio::test]
async fn test_access_token_cannot_be_used_to_refresh() {
    let app = TestApp::spawn().await;
    let session = app.register_and_login("erin@example.com").await;

    let err = app
        .auth_client()
        .await
        .refresh_token(RefreshTokenRequest {
            refresh_token: session.tokens.access_token,
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::Unauthenticated);
    assert_eq!(err.message(), "not a refresh token");
}

#[tokio::test]
async fn test_logout_requires_authentication() {
    let app = TestApp::spawn().await;
    let session = app.register_and_login("frank@example.com").await;

    let err = app
        .auth_client()
        .await
        .logout(LogoutRequest {
            refresh_token: session.tokens.refresh_token,
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn test_forgot_password_answers_identically_for_unknown_email() {
    let app = TestApp::spawn().await;
    app.register_and_login("grace@example.com").await;
    let mut client = app.auth_client().await;

    let known = client
        .forgot_password(ForgotPasswordRequest {
            email: "grace@example.com".to_string(),
            app_id: TEST_APP_ID,
        })
        .await
        .unwrap()
        .into_inner();
    let unknown = client
        .forgot_password(ForgotPasswordRequest {
            email: "stranger@example.com".to_string(),
            app_id: TEST_APP_ID,
        })
        .await
        .unwrap()
        .into_inner();

    assert!(known.success && unknown.success);
    assert_eq!(known.message, unknown.message);
    assert!(known.expires_at > chrono::Utc::now().timestamp());
    assert!(unknown.expires_at > chrono::Utc::now().timestamp());

    let resets: Vec<_> = app
        .mailer
        .sent()
        .into_iter()
        .filter(|m| m.kind == MailKind::Reset)
        .collect();
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].to_email, "grace@example.com");
}

#[tokio::test]
async fn test_password_reset_flow() {
    let app = TestApp::spawn().await;
    let session = app.register_and_login("heidi@example.com").await;
    let mut client = app.auth_client().await;

    client
        .forgot_password(ForgotPasswordRequest {
            email: session.email.clone(),
            app_id: TEST_APP_ID,
        })
        .await
        .unwrap();
    let token = app
        .mailer
        .last_token(MailKind::Reset, &session.email)
        .expect("reset mail not sent");

    let reset = client
        .reset_password(ResetPasswordRequest {
            token: token.clone(),
            new_password: "brand-new-password".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(reset.success);
    assert_eq!(reset.message, "Password reset successfully");

    let old = client
        .login(LoginRequest {
            email: session.email.clone(),
            password: TEST_PASSWORD.to_string(),
            app_id: TEST_APP_ID,
        })
        .await
        .unwrap_err();
    assert_eq!(old.code(), Code::Unauthenticated);

    client
        .login(LoginRequest {
            email: session.email.clone(),
            password: "brand-new-password".to_string(),
            app_id: TEST_APP_ID,
        })
        .await
        .unwrap();

    let reused = client
        .reset_password(ResetPasswordRequest {
            token,
            new_password: "another-password".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(reused.code(), Code::NotFound);
}

#[tokio::test]
async fn test_email_verification_flow() {
    let app = TestApp::spawn().await;
    let session = app.register_and_login("ivan@example.com").await;
    let mut client = app.auth_client().await;

    let sent = client
        .send_email_verification(with_auth(
            SendEmailVerificationRequest {
                user_id: session.user_id,
                app_id: TEST_APP_ID,
            },
            &session.tokens.access_token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(sent.success);
    assert!(sent.expires_at > 0);

    let token = app
        .mailer
        .last_token(MailKind::Verification, &session.email)
        .expect("verification mail not sent");

    let verified = client
        .email_verify(EmailVerifyRequest { token })
        .await
        .unwrap()
        .into_inner();
    assert!(verified.success);
    assert!(verified.activated);

    let info = client
        .get_user_info(with_auth(
            GetUserInfoRequest {
                access_token: session.tokens.access_token.clone(),
            },
            &session.tokens.access_token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(info.activated);

    let again = client
        .send_email_verification(with_auth(
            SendEmailVerificationRequest {
                user_id: session.user_id,
                app_id: TEST_APP_ID,
            },
            &session.tokens.access_token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(!again.success);
    assert_eq!(again.expires_at, 0);
}

#[tokio::test]
async fn test_unknown_verification_token_is_not_found() {
    let app = TestApp::spawn().await;

    let err = app
        .auth_client()
        .await
        .email_verify(EmailVerifyRequest {
            token: "no-such-token".to_string(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn test_verification_mail_only_for_own_account() {
    let app = TestApp::spawn().await;
    let judy = app.register_and_login("judy@example.com").await;
    let mallory = app.register_and_login("mallory@example.com").await;

    let err = app
        .auth_client()
        .await
        .send_email_verification(with_auth(
            SendEmailVerificationRequest {
                user_id: judy.user_id,
                app_id: TEST_APP_ID,
            },
            &mallory.tokens.access_token,
        ))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::PermissionDenied);
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_permission_rpcs_require_admin_or_staff() {
    let app = TestApp::spawn().await;
    let ken = app.register_and_login("ken@example.com").await;
    let mut client = app.permission_client().await;

    let denied = client
        .get_user_permissions(with_auth(
            GetUserPermissionsRequest {
                user_id: ken.user_id,
            },
            &ken.tokens.access_token,
        ))
        .await
        .unwrap_err();
    assert_eq!(denied.code(), Code::PermissionDenied);
    assert_eq!(denied.message(), "requires one of: admin, staff");

    let grant_denied = client
        .grant_permission(with_auth(
            GrantPermissionRequest {
                user_id: ken.user_id,
                permission_id: common::ADMIN_PERMISSION_ID,
            },
            &ken.tokens.access_token,
        ))
        .await
        .unwrap_err();
    assert_eq!(grant_denied.code(), Code::PermissionDenied);
    assert_eq!(grant_denied.message(), "missing required permission: admin");
}

#[tokio::test]
async fn test_admin_grants_and_checks_permissions() {
    let app = TestApp::spawn().await;
    let admin = app.register_and_login("root@example.com").await;
    let member = app.register_and_login("member@example.com").await;
    app.make_admin(admin.user_id).await;
    let mut client = app.permission_client().await;

    // Token predates the grant; the live lookup admits it
    let before = client
        .get_user_permissions(with_auth(
            GetUserPermissionsRequest {
                user_id: member.user_id,
            },
            &admin.tokens.access_token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(before.permissions, vec!["user".to_string()]);

    let fresh = app.login(&admin.email).await;
    let granted = client
        .grant_permission(with_auth(
            GrantPermissionRequest {
                user_id: member.user_id,
                permission_id: 3,
            },
            &fresh.access_token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(granted.success);

    let has_staff = client
        .has_user_permission(with_auth(
            HasUserPermissionRequest {
                user_id: member.user_id,
                permission: "staff".to_string(),
            },
            &fresh.access_token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(has_staff.allowed);

    let unknown = client
        .has_user_permission(with_auth(
            HasUserPermissionRequest {
                user_id: member.user_id,
                permission: "superuser".to_string(),
            },
            &fresh.access_token,
        ))
        .await
        .unwrap_err();
    assert_eq!(unknown.code(), Code::InvalidArgument);

    let bad_id = client
        .grant_permission(with_auth(
            GrantPermissionRequest {
                user_id: member.user_id,
                permission_id: 404,
            },
            &fresh.access_token,
        ))
        .await
        .unwrap_err();
    assert_eq!(bad_id.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_permission_rpcs_report_missing_target_user() {
    let app = TestApp::spawn().await;
    let admin = app.register_and_login("keeper@example.com").await;
    app.make_admin(admin.user_id).await;
    let token = app.login(&admin.email).await.access_token;
    let mut client = app.permission_client().await;

    let listed = client
        .get_user_permissions(with_auth(
            GetUserPermissionsRequest { user_id: 987_654 },
            &token,
        ))
        .await
        .unwrap_err();
    assert_eq!(listed.code(), Code::NotFound);
    assert_eq!(listed.message(), "user not found");

    let checked = client
        .has_user_permission(with_auth(
            HasUserPermissionRequest {
                user_id: 987_654,
                permission: "user".to_string(),
            },
            &token,
        ))
        .await
        .unwrap_err();
    assert_eq!(checked.code(), Code::NotFound);

    let granted = client
        .grant_permission(with_auth(
            GrantPermissionRequest {
                user_id: 987_654,
                permission_id: 3,
            },
            &token,
        ))
        .await
        .unwrap_err();
    assert_eq!(granted.code(), Code::NotFound);
}

#[tokio::test]
async fn test_refresh_picks_up_new_permissions() {
    let app = TestApp::spawn().await;
    let session = app.register_and_login("liam@example.com").await;
    app.make_admin(session.user_id).await;

    let rotated = app
        .auth_client()
        .await
        .refresh_token(RefreshTokenRequest {
            refresh_token: session.tokens.refresh_token,
        })
        .await
        .unwrap()
        .into_inner();

    let claims = TokenCodec::new(TokenConfig::default().issuer)
        .validate(
            &rotated.access_token,
            &SecretString::new(TEST_APP_SECRET.to_string()),
            TokenType::Access,
        )
        .unwrap();
    assert!(claims.has_permission("admin"));
    assert_eq!(claims.user_id, session.user_id);

    let permissions = app
        .permission_client()
        .await
        .get_user_permissions(with_auth(
            GetUserPermissionsRequest {
                user_id: session.user_id,
            },
            &rotated.access_token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(permissions.permissions.contains(&"admin".to_string()));
}

#[tokio::test]
async fn test_health_service_reports_serving() {
    use tonic_health::pb::{
        health_check_response::ServingStatus, health_client::HealthClient, HealthCheckRequest,
    };

    let app = TestApp::spawn().await;
    let channel = tonic::transport::Endpoint::from_shared(app.grpc_address.clone())
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut health = HealthClient::new(channel);

    let response = health
        .check(HealthCheckRequest {
            service: "sso.v1.Auth".to_string(),
        })
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.status(), ServingStatus::Serving);
}
