// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end credential scenarios against a fake provider: the full
//! browser login (with a driven callback), the expired-account refresh
//! arms, and the multi-account fan-out.

use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use keyrack::{AccountType, AuthorizeOptions, Credential};
use keyrack_specs::{query_param, test_client, FakeProvider, FakeProviderConfig};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn oauth_blob(access: &str, refresh: &str, expires_at: Option<u64>) -> anyhow::Result<String> {
    Ok(Credential::OAuth {
        access_token: access.to_owned(),
        refresh_token: refresh.to_owned(),
        expires_at,
    }
    .to_blob()?)
}

/// Options whose "browser" immediately drives the loopback callback with
/// the given authorization code.
fn driven_options(code: &'static str, require_long_lived: bool) -> AuthorizeOptions {
    AuthorizeOptions {
        timeout: Duration::from_secs(10),
        require_long_lived,
        opener: Some(Box::new(move |url: &str| {
            let redirect = query_param(url, "redirect_uri")
                .ok_or_else(|| anyhow::anyhow!("authorize URL missing redirect_uri"))?;
            let state = query_param(url, "state")
                .ok_or_else(|| anyhow::anyhow!("authorize URL missing state"))?;
            tokio::spawn(async move {
                let _ = reqwest::get(format!("{redirect}?code={code}&state={state}")).await;
            });
            Ok(())
        })),
    }
}

#[tokio::test]
async fn browser_login_stores_a_long_lived_key() -> anyhow::Result<()> {
    let (provider, endpoints) = FakeProvider::start(FakeProviderConfig {
        grant_api_key: Some("sk-ant-api03-longlived".to_owned()),
        ..Default::default()
    })
    .await?;
    let (client, _dir) = test_client(endpoints, None)?;

    let account = client.authenticate("Work", driven_options("e2e-code", false)).await?;

    assert_eq!(account.account_type, AccountType::Oauth);
    match Credential::parse(&account.credentials)? {
        Credential::OAuth { access_token, refresh_token, expires_at } => {
            assert_eq!(access_token, "sk-ant-api03-longlived");
            assert!(refresh_token.is_empty(), "long-lived keys carry no refresh token");
            assert_eq!(expires_at, None, "long-lived keys never expire");
        }
        other => anyhow::bail!("unexpected credential: {other:?}"),
    }
    assert_eq!(provider.exchanges.load(Ordering::SeqCst), 1);
    assert_eq!(provider.upgrades.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn browser_login_falls_back_to_the_short_lived_pair() -> anyhow::Result<()> {
    let (provider, endpoints) = FakeProvider::start(FakeProviderConfig {
        grant_api_key: None,
        ..Default::default()
    })
    .await?;
    let (client, _dir) = test_client(endpoints, None)?;

    let account = client.authenticate("Work", driven_options("e2e-code", false)).await?;

    match Credential::parse(&account.credentials)? {
        Credential::OAuth { access_token, refresh_token, expires_at } => {
            assert_eq!(access_token, "exchanged-access");
            assert_eq!(refresh_token, "exchanged-refresh");
            let expires_at = expires_at.ok_or_else(|| anyhow::anyhow!("missing expiry"))?;
            assert!(expires_at > now_ms(), "expiry must be in the future");
        }
        other => anyhow::bail!("unexpected credential: {other:?}"),
    }
    assert_eq!(provider.upgrades.load(Ordering::SeqCst), 1, "upgrade was attempted");
    Ok(())
}

#[tokio::test]
async fn required_long_lived_upgrade_failure_fails_the_login() -> anyhow::Result<()> {
    let (_provider, endpoints) = FakeProvider::start(FakeProviderConfig {
        grant_api_key: None,
        ..Default::default()
    })
    .await?;
    let (client, _dir) = test_client(endpoints, None)?;

    let err = match client.authenticate("Work", driven_options("e2e-code", true)).await {
        Ok(_) => anyhow::bail!("login must fail when the required upgrade is refused"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("create_api_key"), "got: {err}");
    assert!(
        client.list_accounts()?.accounts.is_empty(),
        "nothing may be persisted on a failed login"
    );
    Ok(())
}

#[tokio::test]
async fn rejected_authorization_code_surfaces_the_provider_body() -> anyhow::Result<()> {
    let (_provider, endpoints) = FakeProvider::start(FakeProviderConfig::default()).await?;
    let (client, _dir) = test_client(endpoints, None)?;

    let err = match client.authenticate("Work", driven_options("wrong-code", false)).await {
        Ok(_) => anyhow::bail!("exchange of an unknown code must fail"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("invalid_grant"), "got: {err}");
    Ok(())
}

#[tokio::test]
async fn expired_account_refreshes_exactly_once_and_persists() -> anyhow::Result<()> {
    let (provider, endpoints) = FakeProvider::start(FakeProviderConfig {
        accept_tokens: vec!["refreshed-access".to_owned()],
        ..Default::default()
    })
    .await?;
    let (client, _dir) = test_client(endpoints, None)?;

    let stale = oauth_blob("stale-access", "old-refresh", Some(now_ms() - 60_000))?;
    client.save_account("Work", Some(&stale)).await?;

    let result = client.get_account_usage("Work").await?;
    assert_eq!(result.error, None);
    let usage = result.usage.ok_or_else(|| anyhow::anyhow!("missing usage"))?;
    let five_hour = usage.five_hour.ok_or_else(|| anyhow::anyhow!("missing window"))?;
    assert_eq!(five_hour.utilization, 33.0);

    assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1, "exactly one refresh");
    assert_eq!(provider.bearers(), vec!["refreshed-access".to_owned()]);

    // The rotated pair is what survives on disk.
    let data = client.list_accounts()?;
    let work = data.get("Work").ok_or_else(|| anyhow::anyhow!("account lost"))?;
    match Credential::parse(&work.credentials)? {
        Credential::OAuth { access_token, refresh_token, .. } => {
            assert_eq!(access_token, "refreshed-access");
            assert_eq!(refresh_token, "refreshed-rotated");
        }
        other => anyhow::bail!("unexpected credential: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn expired_account_failed_refresh_reports_the_error() -> anyhow::Result<()> {
    let (provider, endpoints) = FakeProvider::start(FakeProviderConfig {
        refresh_ok: false,
        ..Default::default()
    })
    .await?;
    let (client, _dir) = test_client(endpoints, None)?;

    let stale = oauth_blob("stale-access", "old-refresh", Some(now_ms() - 60_000))?;
    client.save_account("Work", Some(&stale)).await?;

    let result = client.get_account_usage("Work").await?;
    assert_eq!(result.error.as_deref(), Some("Token expired — refresh failed"));
    assert_eq!(result.usage, None);
    assert_eq!(provider.usage_calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn fan_out_isolates_oauth_and_admin_accounts() -> anyhow::Result<()> {
    let (provider, endpoints) = FakeProvider::start(FakeProviderConfig {
        accept_tokens: vec!["good-access".to_owned()],
        refresh_ok: false,
        probe_ok: true,
        ..Default::default()
    })
    .await?;
    let (client, _dir) = test_client(endpoints, None)?;

    let future = Some(now_ms() + 3_600_000);
    client.save_account("A", Some(&oauth_blob("good-access", "r", future)?)).await?;
    client.save_account("B", Some(&oauth_blob("bad-access", "r", future)?)).await?;
    client.save_admin_account("Org", "sk-ant-admin01-e2e").await?;
    assert_eq!(provider.report_calls.load(Ordering::SeqCst), 1, "save probes once");

    let results = client.get_all_accounts_usage().await?;
    assert_eq!(results.len(), 3);
    let by_name = |name: &str| {
        results
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| anyhow::anyhow!("missing result for {name}"))
    };

    let a = by_name("A")?;
    assert!(a.usage.is_some() && a.error.is_none(), "A must succeed: {:?}", a.error);

    let b = by_name("B")?;
    assert!(b.usage.is_none() && b.error.is_some(), "B must fail without sinking the rest");

    let org = by_name("Org")?;
    assert_eq!(org.account_type, AccountType::Admin);
    assert!(org.usage.is_some(), "admin usage flows through the report endpoint");
    assert_eq!(provider.report_calls.load(Ordering::SeqCst), 2);
    Ok(())
}
