use std::sync::Arc;
use std::time::Duration;

use tessera::prelude::*;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// App payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Visit {
    theme: String,
    page_views: u32,
}

type VisitStore = MemoryStore<Visit>;

// ---------------------------------------------------------------------------
// Pretend HTTP client
// ---------------------------------------------------------------------------

/// Browser-side cookie handling: the `name=value` part of the last
/// `Set-Cookie` goes back on the next request, unless it was cleared.
fn browser_echo(resp: &HeaderMap, jar: &mut Option<String>) -> HeaderMap {
    for raw in resp.get_all("set-cookie") {
        let Some(pair) = raw.to_str().ok().and_then(|s| s.split(';').next()) else {
            continue;
        };
        *jar = pair.split_once('=').filter(|(_, v)| !v.is_empty()).map(|_| pair.to_owned());
    }

    let mut req = HeaderMap::new();
    req.insert("user-agent", HeaderValue::from_static("login-flow-demo/0.1"));
    req.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.10"));
    if let Some(cookie) = jar.as_deref().and_then(|c| c.parse().ok()) {
        req.insert("cookie", cookie);
    }
    req
}

fn bearer(jwt: &str) -> Result<HeaderMap, TesseraError> {
    let mut req = HeaderMap::new();
    let value = format!("Bearer {jwt}")
        .parse()
        .map_err(|_| TesseraError::Config("token is not a valid header value".into()))?;
    req.insert("authorization", value);
    Ok(req)
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

/// What a flow ended with, for the log and the tests.
#[derive(Debug)]
struct Outcome {
    logged_in_as: UserId,
    device_kept: bool,
    theme_after_logout: String,
    authenticated_after_logout: bool,
}

/// Browser session: anonymous browsing, login, logout.
async fn cookie_flow(
    sessions: &Sessions<Visit, VisitStore, CookieTransport>,
) -> Result<Outcome, TesseraError> {
    let mut jar = None;

    // First visit: no cookie yet.
    let mut resp = HeaderMap::new();
    let mut session = sessions.load(&browser_echo(&resp, &mut jar)).await?;
    session.data.page_views += 1;
    let session = sessions.save(&mut resp, session).await?;
    let device = session.device_id;
    tracing::info!(session_id = %session.id, state = %session.state(), "first visit");

    // Second visit comes back with the cookie.
    let req = browser_echo(&resp, &mut jar);
    let mut session = sessions.load(&req).await?;
    session.data.page_views += 1;
    let mut resp = HeaderMap::new();
    let session = sessions.save(&mut resp, session).await?;
    tracing::info!(page_views = session.data.page_views, "return visit");

    // Login.
    let user = UserId::from(Uuid::new_v4());
    let req = browser_echo(&resp, &mut jar);
    let mut resp = HeaderMap::new();
    let prefs = Visit {
        theme: "dark".into(),
        ..session.data
    };
    let (session, ()) = sessions.authenticate(&req, &mut resp, user, Some(prefs)).await?;
    tracing::info!(user_id = %session.user_id, "logged in");

    // An authenticated request with a sliding expiry.
    let req = browser_echo(&resp, &mut jar);
    let session = sessions.load(&req).await?;
    let mut resp = HeaderMap::new();
    let session = sessions.touch(&mut resp, session).await;
    tracing::info!(remaining = ?session.remaining(), "touched");

    // Logout keeps the theme, drops everything else.
    let req = browser_echo(&resp, &mut jar);
    let mut resp = HeaderMap::new();
    let (fresh, ()) = sessions
        .logout_with(&req, &mut resp, |old| Visit {
            theme: old.theme.clone(),
            page_views: 0,
        })
        .await?;
    browser_echo(&resp, &mut jar);

    let authenticated_after_logout = fresh.is_authenticated();
    Ok(Outcome {
        logged_in_as: user,
        device_kept: fresh.device_id == device,
        theme_after_logout: fresh.data.theme,
        authenticated_after_logout,
    })
}

/// API client: bearer tokens, refresh, logout with revocation.
async fn jwt_flow(
    sessions: &Sessions<Visit, VisitStore, JwtTransport<MemoryRevoker>>,
) -> Result<Outcome, TesseraError> {
    let user = UserId::from(Uuid::new_v4());
    let (session, pair) = sessions
        .authenticate(&HeaderMap::new(), &mut HeaderMap::new(), user, None)
        .await?;
    let device = session.device_id;
    match serde_json::to_string_pretty(&pair) {
        Ok(body) => tracing::info!(%body, "token response"),
        Err(e) => tracing::warn!(error = %e, "could not render token response"),
    }

    let session = sessions.load(&bearer(&pair.access_token)?).await?;
    tracing::info!(user_id = %session.user_id, "access token accepted");

    let (_, pair) = sessions
        .refresh(&bearer(&pair.refresh_token)?, &mut HeaderMap::new())
        .await?;
    tracing::info!(expires_in = pair.expires_in, "tokens refreshed");

    let (fresh, _) = sessions
        .logout(&bearer(&pair.access_token)?, &mut HeaderMap::new())
        .await?;
    let after = sessions.load(&bearer(&pair.access_token)?).await?;
    tracing::info!(
        revoked = after.id != session.id,
        "old access token after logout"
    );

    let authenticated_after_logout = fresh.is_authenticated();
    Ok(Outcome {
        logged_in_as: user,
        device_kept: fresh.device_id == device,
        theme_after_logout: fresh.data.theme,
        authenticated_after_logout,
    })
}

fn report(flow: &str, outcome: &Outcome) {
    tracing::info!(
        flow,
        user_id = %outcome.logged_in_as,
        device_kept = outcome.device_kept,
        theme = %outcome.theme_after_logout,
        authenticated = outcome.authenticated_after_logout,
        "flow finished"
    );
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Periodically deletes expired records until the task is aborted.
fn spawn_sweeper<T: Transport>(
    sessions: Arc<Sessions<Visit, VisitStore, T>>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match sessions.cleanup_expired().await {
                Ok(removed) => tracing::debug!(removed, "sweep finished"),
                Err(e) => tracing::warn!(error = %e, "sweep failed"),
            }
        }
    })
}

fn jwt_secret() -> Vec<u8> {
    std::env::var("TESSERA_JWT_SECRET")
        .map(String::into_bytes)
        .unwrap_or_else(|_| b"login-flow-demo-secret-do-not-deploy".to_vec())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tessera_session=debug".into()),
        )
        .init();

    let cookie_sessions = Arc::new(
        Sessions::builder()
            .store(VisitStore::new())
            .transport(CookieTransport::new(
                Key::generate(),
                CookieConfig {
                    secure: false,
                    ..CookieConfig::default()
                },
            ))
            .build()?,
    );
    let sweeper = spawn_sweeper(Arc::clone(&cookie_sessions), Duration::from_secs(60));

    report("cookie", &cookie_flow(&cookie_sessions).await?);

    let jwt_sessions = Sessions::builder()
        .store(VisitStore::new())
        .transport(
            JwtTransport::new(JwtConfig::default(), &jwt_secret())
                .with_revoker(MemoryRevoker::new()),
        )
        .build()?;
    report("jwt", &jwt_flow(&jwt_sessions).await?);

    sweeper.abort();
    Ok(())
}
