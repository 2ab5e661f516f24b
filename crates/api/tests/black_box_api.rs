use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm as JwtAlgorithm, EncodingKey, Header};
use paybridge_api::app::{self, cookies::CookiePolicy, services};
use paybridge_auth::{
    Algorithm, FederationConfig, Hs256HrSessionValidator, LockoutPolicy, PinHasher, PrivateKeySigner, TrustedKeySet,
};
use paybridge_infra::FederationStores;
use reqwest::StatusCode;
use serde_json::json;

const KID: &str = "hr-2026a";
const PRIVATE_PEM: &str = include_str!("../../auth/testdata/hr-2026a.private.pem");
const PUBLIC_PEM: &str = include_str!("../../auth/testdata/hr-2026a.public.pem");
const OTHER_PRIVATE_PEM: &str = include_str!("../../auth/testdata/hr-2026b.private.pem");

const HR_LOGIN_SECRET: &str = "hr-login-secret";
const SESSION_SECRET: &str = "payroll-session-secret-for-tests-0123456789";
const PIN: &str = "482913";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn serve(app: axum::Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One HR gateway and one Payroll gateway wired to each other.
struct Federation {
    hr: TestServer,
    payroll: TestServer,
}

impl Federation {
    async fn spawn() -> Self {
        Self::spawn_with(FederationConfig::default(), PRIVATE_PEM).await
    }

    async fn spawn_with(config: FederationConfig, signing_pem: &str) -> Self {
        let keys = TrustedKeySet::new()
            .with_pem(KID, Algorithm::EdDSA, PUBLIC_PEM.as_bytes())
            .unwrap();
        let payroll_services = services::PayrollServices::new(
            Arc::new(keys),
            FederationStores::in_memory(),
            PinHasher::with_params(256, 1, 1).unwrap(),
            SESSION_SECRET.as_bytes(),
            &config,
            CookiePolicy { secure: false },
        );
        let payroll = TestServer::serve(app::build_payroll_app(Arc::new(payroll_services))).await;

        let signer = PrivateKeySigner::from_pem(KID, Algorithm::EdDSA, signing_pem.as_bytes()).unwrap();
        let hr_services = services::HrServices::new(
            Arc::new(signer),
            Arc::new(Hs256HrSessionValidator::new(HR_LOGIN_SECRET)),
            &config,
            payroll.base_url.clone(),
        );
        let hr = TestServer::serve(app::build_hr_app(Arc::new(hr_services))).await;

        Self { hr, payroll }
    }

    async fn payroll_link(&self, login: &str) -> String {
        let res = reqwest::Client::new()
            .get(format!("{}/sso/payroll-link", self.hr.base_url))
            .bearer_auth(login)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        body["redirect_url"].as_str().unwrap().to_string()
    }
}

fn mint_hr_login(subject: &str, email: &str, roles: &[&str]) -> String {
    let now = Utc::now();
    let claims = json!({
        "sub": subject,
        "org": "org1",
        "email": email,
        "name": "Ada Lovelace",
        "roles": roles,
        "iat": now.timestamp(),
        "exp": (now + ChronoDuration::minutes(10)).timestamp(),
    });

    jsonwebtoken::encode(
        &Header::new(JwtAlgorithm::HS256),
        &claims,
        &EncodingKey::from_secret(HR_LOGIN_SECRET.as_bytes()),
    )
    .expect("failed to encode HR login token")
}

fn browser() -> reqwest::Client {
    reqwest::Client::builder().cookie_store(true).build().unwrap()
}

async fn get_json(client: &reqwest::Client, url: &str) -> (StatusCode, serde_json::Value) {
    let res = client.get(url).send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap_or(serde_json::Value::Null))
}

async fn post_pin(client: &reqwest::Client, url: &str, pin: &str) -> (StatusCode, serde_json::Value) {
    let res = client.post(url).json(&json!({ "pin": pin })).send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap_or(serde_json::Value::Null))
}

#[tokio::test]
async fn hr_link_requires_hr_login() {
    let fed = Federation::spawn().await;

    let res = reqwest::Client::new()
        .get(format!("{}/sso/payroll-link", fed.hr.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = reqwest::Client::new()
        .get(format!("{}/sso/payroll-link", fed.hr.base_url))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = reqwest::Client::new()
        .get(format!("{}/health", fed.hr.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn hr_redirect_points_at_payroll_hand_off() {
    let fed = Federation::spawn().await;
    let login = mint_hr_login("hr-42", "a@x.com", &["hr"]);

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let res = client
        .get(format!("{}/sso/payroll", fed.hr.base_url))
        .bearer_auth(&login)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    let location = res.headers()[reqwest::header::LOCATION].to_str().unwrap();
    assert!(location.starts_with(&format!("{}/sso?token=", fed.payroll.base_url)));
}

#[tokio::test]
async fn first_arrival_sets_pin_and_second_arrival_enters_it() {
    let fed = Federation::spawn().await;
    let login = mint_hr_login("hr-42", "a@x.com", &["hr"]);
    let me_url = format!("{}/payroll/me", fed.payroll.base_url);

    // First arrival
    let first = browser();
    let (status, body) = get_json(&first, &fed.payroll_link(&login).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["next"], "setup_pin");
    assert_eq!(body["resolution"], "provisioned");
    assert_eq!(body["role"], "payroll_admin");
    assert_eq!(body["organization_id"], "org1");
    let employee_id = body["employee_id"].as_str().unwrap().to_string();

    // identity cookie alone is not enough
    let (status, body) = get_json(&first, &me_url).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "step_up_required");

    let (status, body) = post_pin(&first, &format!("{}/sso/setup-pin", fed.payroll.base_url), PIN).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "verified");

    let (status, body) = get_json(&first, &me_url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["employee_id"], employee_id.as_str());
    assert_eq!(body["role"], "payroll_admin");

    // Second arrival, new browser
    let second = browser();
    let (status, body) = get_json(&second, &fed.payroll_link(&login).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["next"], "enter_pin");
    assert_eq!(body["resolution"], "linked");
    assert_eq!(body["employee_id"], employee_id.as_str());

    let (status, _) = post_pin(&second, &format!("{}/sso/setup-pin", fed.payroll.base_url), "135790").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = post_pin(&second, &format!("{}/sso/verify-pin", fed.payroll.base_url), "000111").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "incorrect_pin");

    let (status, _) = post_pin(&second, &format!("{}/sso/verify-pin", fed.payroll.base_url), PIN).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get_json(&second, &me_url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["employee_id"], employee_id.as_str());
}

#[tokio::test]
async fn replayed_hand_off_is_rejected() {
    let fed = Federation::spawn().await;
    let link = fed.payroll_link(&mint_hr_login("hr-42", "a@x.com", &["staff"])).await;

    let (status, body) = get_json(&browser(), &link).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "payroll_employee");

    let (status, body) = get_json(&browser(), &link).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_assertion");
}

#[tokio::test]
async fn tampered_or_foreign_assertions_are_rejected() {
    let fed = Federation::spawn().await;
    let link = fed.payroll_link(&mint_hr_login("hr-42", "a@x.com", &["hr"])).await;

    // change one character in the middle of the signature
    let at = link.rfind('.').unwrap() + 10;
    let replacement = if &link[at..at + 1] == "A" { "B" } else { "A" };
    let tampered = format!("{}{}{}", &link[..at], replacement, &link[at + 1..]);
    let (status, body) = get_json(&browser(), &tampered).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_assertion");

    let (status, _) = get_json(&browser(), &format!("{}/sso", fed.payroll.base_url)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // signed with a key Payroll does not trust
    let rogue = Federation::spawn_with(FederationConfig::default(), OTHER_PRIVATE_PEM).await;
    let rogue_link = rogue.payroll_link(&mint_hr_login("hr-42", "a@x.com", &["hr"])).await;
    let (status, body) = get_json(&browser(), &rogue_link).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_assertion");
}

#[tokio::test]
async fn repeated_wrong_pins_lock_the_identity() {
    let mut config = FederationConfig::default();
    config.lockout = LockoutPolicy {
        threshold: 3,
        duration: ChronoDuration::minutes(15),
    };
    let fed = Federation::spawn_with(config, PRIVATE_PEM).await;
    let login = mint_hr_login("hr-7", "b@x.com", &["staff"]);
    let verify_url = format!("{}/sso/verify-pin", fed.payroll.base_url);

    let setup = browser();
    get_json(&setup, &fed.payroll_link(&login).await).await;
    let (status, _) = post_pin(&setup, &format!("{}/sso/setup-pin", fed.payroll.base_url), PIN).await;
    assert_eq!(status, StatusCode::OK);

    let client = browser();
    get_json(&client, &fed.payroll_link(&login).await).await;

    let (status, body) = post_pin(&client, &verify_url, "12ab").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_pin");

    for _ in 0..3 {
        let (status, _) = post_pin(&client, &verify_url, "000111").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, body) = post_pin(&client, &verify_url, PIN).await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(body["error"], "pin_locked");
    assert!(body["locked_until"].is_string());

    let (status, body) = get_json(&client, &format!("{}/sso/status", fed.payroll.base_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "awaiting_pin");
    assert!(body["locked_until"].is_string());

    let (status, _) = get_json(&client, &format!("{}/payroll/me", fed.payroll.base_url)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn pin_endpoints_need_identity_cookie_and_logout_clears_sessions() {
    let fed = Federation::spawn().await;
    let client = browser();

    let (status, body) = post_pin(&client, &format!("{}/sso/setup-pin", fed.payroll.base_url), PIN).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "identity_required");

    get_json(&client, &fed.payroll_link(&mint_hr_login("hr-9", "c@x.com", &["ceo"])).await).await;
    let (status, _) = post_pin(&client, &format!("{}/sso/setup-pin", fed.payroll.base_url), PIN).await;
    assert_eq!(status, StatusCode::OK);

    let me_url = format!("{}/payroll/me", fed.payroll.base_url);
    assert_eq!(get_json(&client, &me_url).await.0, StatusCode::OK);

    let res = client
        .post(format!("{}/sso/logout", fed.payroll.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    assert_eq!(get_json(&client, &me_url).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(
        get_json(&client, &format!("{}/sso/status", fed.payroll.base_url)).await.0,
        StatusCode::UNAUTHORIZED
    );
}
