use std::time::{Duration, SystemTime};

use lockbox_client::{Error, InviteJoin};
use lockbox_core::container::Accessor;
use lockbox_core::invite::binding_proof;
use lockbox_core::org::Org;
use lockbox_types::api::ErrorCode;
use lockbox_types::api::v1::{InitAuthRequest, InitAuthResponse};

mod setup;
use setup::TestNode;

fn assert_api_code(err: Error, expected: ErrorCode) {
    match err {
        Error::Api { code, .. } => assert_eq!(code, expected),
        other => panic!("expected api error {expected}, got {other:?}"),
    }
}

#[tokio::test]
async fn signup_and_login_roundtrip() {
    let node = TestNode::start().await;
    let mut client = node.client();

    let token = node.signup_token(&client, "a@x").await;
    let (account, _) = client
        .signup("a@x", "Ada", "pw1", &token, None)
        .await
        .expect("signup succeeds");

    let session = client.login("a@x", "pw1").await.expect("login succeeds");
    assert_eq!(session.account, account.id);

    let me = client.account().await.expect("session works");
    assert_eq!(me.email, "a@x");

    // the fetched envelope unlocks with the password it was sealed under
    let unlocked = client.unlock_account("pw1").await.expect("unlock works");
    assert_eq!(unlocked.id, account.id);
}

#[tokio::test]
async fn wrong_password_and_unknown_account_fail_alike() {
    let node = TestNode::start().await;
    let mut client = node.client();

    let token = node.signup_token(&client, "a@x").await;
    client
        .signup("a@x", "Ada", "pw1", &token, None)
        .await
        .expect("signup succeeds");

    let wrong_password = client.login("a@x", "pw2").await.expect_err("must fail");
    let unknown_account = client.login("ghost@x", "pw1").await.expect_err("must fail");

    let code_of = |err: Error| match err {
        Error::Api { code, message } => (code, message),
        other => panic!("expected api error, got {other:?}"),
    };
    let (wrong_code, wrong_msg) = code_of(wrong_password);
    let (unknown_code, unknown_msg) = code_of(unknown_account);
    assert_eq!(wrong_code, ErrorCode::AuthenticationFailed);
    assert_eq!(unknown_code, ErrorCode::AuthenticationFailed);
    assert_eq!(wrong_msg, unknown_msg);
}

#[tokio::test]
async fn init_auth_simulates_unknown_accounts() {
    let node = TestNode::start().await;
    let client = node.client();

    let token = node.signup_token(&client, "real@x").await;
    client
        .signup("real@x", "Real", "pw1", &token, None)
        .await
        .expect("signup succeeds");

    let fetch = |email: &str| {
        let server = &node.server;
        let email = email.to_owned();
        async move {
            let response = server
                .post("/api/v1/init_auth")
                .json(&InitAuthRequest { email })
                .await;
            response.assert_status_ok();
            response.json::<InitAuthResponse>()
        }
    };
    let real = fetch("real@x").await;
    let simulated = fetch("ghost@x").await;
    let simulated_again = fetch("ghost@x").await;

    // same shape as a real response, stable across requests
    assert_eq!(
        simulated.auth.auth_kdf.salt.len(),
        real.auth.auth_kdf.salt.len()
    );
    assert_eq!(
        simulated.auth.master_kdf.salt.len(),
        real.auth.master_kdf.salt.len()
    );
    assert_eq!(
        simulated.auth.auth_kdf.iterations,
        real.auth.auth_kdf.iterations
    );
    assert!(simulated.b_pub.len() >= 255 && real.b_pub.len() >= 255);
    assert_eq!(simulated.auth.account, simulated_again.auth.account);
    assert_eq!(simulated.auth.auth_kdf.salt, simulated_again.auth.auth_kdf.salt);
}

#[tokio::test]
async fn unverified_signup_is_rejected() {
    let node = TestNode::start().await;
    let client = node.client();

    let err = client
        .signup("a@x", "Ada", "pw1", "not-a-token", None)
        .await
        .expect_err("must fail");
    assert_api_code(err, ErrorCode::VerificationRequired);
}

#[tokio::test]
async fn revoked_sessions_stop_authenticating() {
    let node = TestNode::start().await;
    let (mut client, _, _) = node.onboard("a@x", "Ada", "pw1").await;

    let session = client.session().expect("logged in");
    client.account().await.expect("session works");
    client.logout().await.expect("logout succeeds");

    let response = node
        .server
        .get("/api/v1/accounts/me")
        .authorization_bearer(session.to_string())
        .await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn failed_proofs_are_rate_limited() {
    let node = TestNode::start().await;
    let mut client = node.client();

    let token = node.signup_token(&client, "a@x").await;
    client
        .signup("a@x", "Ada", "pw1", &token, None)
        .await
        .expect("signup succeeds");

    for _ in 0..3 {
        let err = client.login("a@x", "wrong").await.expect_err("bad proof");
        assert_api_code(err, ErrorCode::AuthenticationFailed);
    }
    // the window is full now; even a correct password is refused
    let err = client.login("a@x", "pw1").await.expect_err("limited");
    assert_api_code(err, ErrorCode::RateLimited);
}

#[tokio::test]
async fn org_membership_grants_vault_access() {
    let node = TestNode::start().await;
    let (admin_client, admin_account, admin_keys) = node.onboard("admin@x", "Admin", "pw-a").await;
    let (b_client, b_account, b_keys) = node.onboard("b@x", "B", "pw-b").await;

    let mut rng = rand::thread_rng();
    let mut org =
        Org::initialize(&mut rng, "Acme", &admin_account, &admin_keys).expect("org initializes");
    admin_client.create_org(&org).await.expect("org stored");

    // admin admits B and shares a vault with the whole org
    org.add_member(&mut rng, &b_account).expect("b added");
    let mut vault = org.create_vault(&mut rng, "Secrets").expect("vault created");
    let everyone = org.everyone_group().clone();
    vault
        .update_accessors(&mut rng, &[org.admin_group() as &dyn Accessor, &everyone])
        .expect("everyone granted");
    vault
        .set_data(&mut rng, b"top secret records")
        .expect("records sealed");
    admin_client.update_org(&org).await.expect("org updated");
    admin_client.create_vault(&vault).await.expect("vault stored");

    // B fetches the org, checks the signatures, and walks the chain:
    // own key -> everyone group -> vault data key -> plaintext
    let mut fetched_org = b_client.org(org.id()).await.expect("b sees the org");
    let member = fetched_org
        .member(b_account.id)
        .expect("b is a member")
        .clone();
    assert!(fetched_org.verify_member(&member));
    assert!(fetched_org.verify_group(fetched_org.everyone_group()));

    let mut fetched_vault = b_client.vault(vault.id()).await.expect("b sees the vault");
    fetched_org
        .everyone_group_mut()
        .unlock(&b_keys)
        .expect("b unlocks everyone group");
    fetched_vault
        .access(fetched_org.everyone_group())
        .expect("group opens the vault");
    assert_eq!(&fetched_vault.data().expect("plaintext")[..], b"top secret records");

    // an outsider is turned away at the API already
    let (outsider_client, _, _) = node.onboard("outsider@x", "O", "pw-o").await;
    let err = outsider_client
        .vault(vault.id())
        .await
        .expect_err("no access");
    assert_api_code(err, ErrorCode::InsufficientPermissions);
}

#[tokio::test]
async fn invite_flow_admits_and_burns() {
    let node = TestNode::start().await;
    let (admin_client, admin_account, admin_keys) = node.onboard("admin@x", "Admin", "pw-a").await;

    let mut rng = rand::thread_rng();
    let mut org =
        Org::initialize(&mut rng, "Acme", &admin_account, &admin_keys).expect("org initializes");
    admin_client.create_org(&org).await.expect("org stored");

    let now = SystemTime::now();
    let invite = org
        .create_invite(&mut rng, "c@x", None, Duration::from_secs(3600), now)
        .expect("invite minted");
    admin_client
        .publish_invite(&invite)
        .await
        .expect("invite published");

    // the public record never exposes the token
    let c_client = node.client();
    let public_invite = c_client
        .invite(org.id(), invite.id)
        .await
        .expect("invite visible");
    assert!(public_invite.token.is_empty());

    // the invitee signs up, answering the invite instead of an email token
    let (c_account, _) = c_client
        .signup(
            "c@x",
            "C",
            "pw-c",
            "",
            Some(InviteJoin {
                org: org.id(),
                id: invite.id,
                token: invite.token.clone(),
            }),
        )
        .await
        .expect("invited signup succeeds");

    // the admin completes the membership from the accepted invite
    let mut stored_invite = admin_client
        .invite(org.id(), invite.id)
        .await
        .expect("accepted invite visible");
    org.confirm_invite(&mut rng, &mut stored_invite, &c_account, now)
        .expect("invite confirms");
    admin_client.update_org(&org).await.expect("org updated");
    let member = org.member(c_account.id).expect("c is a member");
    assert!(org.verify_member(member));

    // invites are one-shot; a replayed acceptance fails like an expired one
    let err = c_client
        .accept_invite(
            org.id(),
            invite.id,
            c_account.id,
            binding_proof(&invite.token, "c@x", c_account.id),
        )
        .await
        .expect_err("replay rejected");
    assert_api_code(err, ErrorCode::InviteExpired);
}

#[tokio::test]
async fn health_and_version_respond() {
    let node = TestNode::start().await;
    node.server.get("/health").await.assert_status_ok();
    let version = node.server.get("/version").await;
    version.assert_status_ok();
    assert!(version.text().contains("lockbox-service"));
}
