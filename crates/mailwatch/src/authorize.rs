//! One-shot provisioning of an account's credential.

use anyhow::{Context, Result, bail};
use mailwatch_core::{AccountId, Config, TokenStorage};
use mailwatch_oauth::AuthorizationCodeFlow;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Runs the browser grant for `account` and stores the resulting token.
pub async fn authorize(config: &Config, account: &str, open_browser: bool) -> Result<()> {
    let account = AccountId::new(account);
    if !config.account_ids().contains(&account) {
        warn!(account = %account, "Account is not listed in the configuration; it will not be polled");
    }

    let http = config.http_client()?;
    let client = config.oauth_client(http).context("building OAuth client")?;
    let flow = AuthorizationCodeFlow::new(client).with_pkce();
    let url = flow.authorization_url(None, None)?;

    println!("Authorize mailwatch to read {account}:\n\n  {url}\n");
    if open_browser {
        if let Err(e) = opener::open_browser(url.as_str()) {
            warn!(error = %e, "Could not open a browser; open the URL above manually");
        }
    }
    println!("After granting access, paste the code (or the full URL you were redirected to):");

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("reading authorization code")?;
    let code = parse_code(&line)?;

    let token = flow.exchange_code(&code, None).await.context("exchanging code")?;
    if token.refresh_token.is_none() {
        warn!(account = %account, "No refresh token issued; polling will stop when the access token expires");
    }

    config
        .token_storage()
        .store(&account, &token)
        .await
        .with_context(|| format!("storing credential for {account}"))?;

    info!(account = %account, "Credential stored");
    println!("Done. {account} is ready to be polled.");
    Ok(())
}

/// Accepts either a bare code or a redirect URL carrying `code=`.
fn parse_code(input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        bail!("no authorization code given");
    }

    let Ok(url) = url::Url::parse(input) else {
        return Ok(input.to_string());
    };
    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => bail!("authorization denied: {value}"),
            _ => {}
        }
    }
    code.context("redirect URL carries no code")
}
