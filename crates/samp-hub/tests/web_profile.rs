mod support;

use anyhow::Result;
use reqwest::header::ORIGIN;
use reqwest::StatusCode;
use serde_json::{json, Value as JsonValue};

use samp_hub::broker::Registration;
use support::{error_code, spawn_static, start_hub_with_web, web_settings, WireClient};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn web_registration_issues_web_scoped_keys() -> Result<()> {
    let hub = start_hub_with_web(web_settings()).await?;
    let web = WireClient::new(hub.web_url());

    let registration: Registration = web
        .post_ok("register", json!({ "app_name": "browser-app" }))
        .await?;
    assert!(registration.private_key.starts_with("wk:"));

    // The web key works for web-profile operations.
    let listed: Vec<JsonValue> = web
        .post_ok(
            "get_registered_clients",
            json!({ "private_key": registration.private_key }),
        )
        .await?;
    assert!(!listed.is_empty());
    hub.runtime.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn secrets_do_not_cross_transports() -> Result<()> {
    let hub = start_hub_with_web(web_settings()).await?;
    let std_client = WireClient::new(hub.std_url());
    let web_client = WireClient::new(hub.web_url());

    let std_reg = std_client.register(hub.secret()).await?;
    let web_reg: Registration = web_client
        .post_ok("register", json!({ "app_name": "browser-app" }))
        .await?;

    // A standard-profile key replayed on the web transport fails
    // authentication, and vice versa.
    let rejected = web_client
        .post_raw(
            "get_registered_clients",
            json!({ "private_key": std_reg.private_key }),
        )
        .await?;
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(rejected).await?, "authentication_failure");

    let rejected = std_client
        .post_raw(
            "get_registered_clients",
            json!({ "private_key": web_reg.private_key }),
        )
        .await?;
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(rejected).await?, "authentication_failure");
    hub.runtime.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn origin_allow_list_gates_registration() -> Result<()> {
    let mut settings = web_settings();
    settings.origins = vec!["http://app.example".to_owned()];
    let hub = start_hub_with_web(settings).await?;
    let web = WireClient::new(hub.web_url());

    let admitted = web
        .http
        .post(format!("{}register", web.base))
        .header(ORIGIN, "http://app.example")
        .json(&json!({ "app_name": "trusted" }))
        .send()
        .await?;
    assert_eq!(admitted.status(), StatusCode::OK);

    let rejected = web
        .http
        .post(format!("{}register", web.base))
        .header(ORIGIN, "http://evil.example")
        .json(&json!({ "app_name": "untrusted" }))
        .send()
        .await?;
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);

    // No Origin header at all is rejected too.
    let rejected = web
        .post_raw("register", json!({ "app_name": "headless" }))
        .await?;
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    hub.runtime.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cross_origin_headers_are_emitted() -> Result<()> {
    let hub = start_hub_with_web(web_settings()).await?;
    let web = WireClient::new(hub.web_url());

    let response = web
        .http
        .get(format!("{}ping", web.base))
        .header(ORIGIN, "http://anywhere.example")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key("access-control-allow-origin"));
    hub.runtime.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crossdomain_policy_is_opt_in() -> Result<()> {
    let hub = start_hub_with_web(web_settings()).await?;
    let web = WireClient::new(hub.web_url());
    let response = web.http.get(format!("{}crossdomain.xml", web.base)).send().await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    hub.runtime.shutdown().await?;

    let mut settings = web_settings();
    settings.allow_flash = true;
    let hub = start_hub_with_web(settings).await?;
    let web = WireClient::new(hub.web_url());
    let response = web.http.get(format!("{}crossdomain.xml", web.base)).send().await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.text().await?.contains("cross-domain-policy"));
    hub.runtime.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn translation_serves_only_hub_mentioned_urls() -> Result<()> {
    let hub = start_hub_with_web(web_settings()).await?;
    let std_client = WireClient::new(hub.std_url());
    let web_client = WireClient::new(hub.web_url());

    let icon = spawn_static("image/png", "not really a png").await?;

    // A local client advertises the icon; a web client asks about it.
    let desktop = std_client.register(hub.secret()).await?;
    std_client
        .post_ok::<JsonValue>(
            "declare_metadata",
            json!({
                "private_key": desktop.private_key,
                "metadata": { "samp.name": "desktop", "samp.icon.url": icon.url.clone() },
            }),
        )
        .await?;

    let browser: Registration = web_client
        .post_ok("register", json!({ "app_name": "browser-app" }))
        .await?;

    // Before the hub has mentioned the URL to any web client,
    // translation is refused.
    let refused = web_client
        .http
        .get(format!("{}translate", web_client.base))
        .query(&[("url", icon.url.as_str())])
        .send()
        .await?;
    assert_eq!(refused.status(), StatusCode::FORBIDDEN);

    let _metadata: JsonValue = web_client
        .post_ok(
            "get_metadata",
            json!({ "private_key": browser.private_key, "client_id": desktop.self_id }),
        )
        .await?;

    let served = web_client
        .http
        .get(format!("{}translate", web_client.base))
        .query(&[("url", icon.url.as_str())])
        .send()
        .await?;
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.text().await?, "not really a png");
    hub.runtime.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn urls_volunteered_by_web_clients_stay_blocked() -> Result<()> {
    let hub = start_hub_with_web(web_settings()).await?;
    let std_client = WireClient::new(hub.std_url());
    let web_client = WireClient::new(hub.web_url());

    let probe = spawn_static("text/plain", "internal resource").await?;

    // The web client mentions the URL first.
    let browser: Registration = web_client
        .post_ok("register", json!({ "app_name": "browser-app" }))
        .await?;
    web_client
        .post_ok::<JsonValue>(
            "declare_metadata",
            json!({
                "private_key": browser.private_key,
                "metadata": { "samp.name": "browser", "samp.icon.url": probe.url.clone() },
            }),
        )
        .await?;

    // Even after a trusted client advertises the same URL and the hub
    // serves it back, translation stays refused.
    let desktop = std_client.register(hub.secret()).await?;
    std_client
        .post_ok::<JsonValue>(
            "declare_metadata",
            json!({
                "private_key": desktop.private_key,
                "metadata": { "samp.name": "desktop", "samp.icon.url": probe.url.clone() },
            }),
        )
        .await?;
    let _metadata: JsonValue = web_client
        .post_ok(
            "get_metadata",
            json!({ "private_key": browser.private_key, "client_id": desktop.self_id }),
        )
        .await?;

    let refused = web_client
        .http
        .get(format!("{}translate", web_client.base))
        .query(&[("url", probe.url.as_str())])
        .send()
        .await?;
    assert_eq!(refused.status(), StatusCode::FORBIDDEN);
    hub.runtime.shutdown().await?;
    Ok(())
}
