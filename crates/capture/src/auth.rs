use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::info;

use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};

const GQL_URL: &str = "https://gql.twitch.tv/gql";

const PLAYBACK_ACCESS_TOKEN_QUERY: &str = r#"query PlaybackAccessToken_Template($login: String!, $isLive: Boolean!, $vodID: ID!, $isVod: Boolean!, $playerType: String!) { streamPlaybackAccessToken(channelName: $login, params: {platform: "web", playerBackend: "mediaplayer", playerType: $playerType}) @include(if: $isLive) {    value    signature    __typename  }  videoPlaybackAccessToken(id: $vodID, params: {platform: "web", playerBackend: "mediaplayer", playerType: $playerType}) @include(if: $isVod) {    value    signature    __typename  }}"#;

/// Playback token/signature pair authorizing master-manifest requests.
/// Produced once per session and never refreshed afterwards.
#[derive(Debug, Clone)]
pub struct AccessCredential {
    pub token: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
struct GqlResponse {
    data: Option<GqlData>,
}

#[derive(Debug, Deserialize)]
struct GqlData {
    #[serde(rename = "streamPlaybackAccessToken")]
    stream_playback_access_token: Option<PlaybackAccessToken>,
}

#[derive(Debug, Deserialize)]
struct PlaybackAccessToken {
    value: Option<String>,
    signature: Option<String>,
}

/// Requests a playback access token for the configured channel.
///
/// Every failure is fatal for the session: transport errors, non-success
/// statuses, and missing or blank token fields all map to
/// [`CaptureError::Auth`]. There is no retry at this layer.
pub async fn resolve_credential(
    client: &reqwest::Client,
    config: &CaptureConfig,
) -> Result<AccessCredential> {
    if config.channel.trim().is_empty() {
        return Err(CaptureError::auth("channel login is empty"));
    }
    let login = config.channel.to_lowercase();

    let body = serde_json::json!({
        "operationName": "PlaybackAccessToken_Template",
        "query": PLAYBACK_ACCESS_TOKEN_QUERY,
        "variables": {
            "isLive": true,
            "login": login,
            "isVod": false,
            "vodID": "",
            "playerType": "site",
        }
    });

    let response = client
        .post(GQL_URL)
        .header("Client-ID", &config.client_id)
        .header(AUTHORIZATION, format!("OAuth {}", config.auth_token))
        .json(&body)
        .send()
        .await
        .map_err(|e| CaptureError::auth(format!("token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(CaptureError::auth(format!(
            "token request returned HTTP {status}"
        )));
    }

    let text = response
        .text()
        .await
        .map_err(|e| CaptureError::auth(format!("token response unreadable: {e}")))?;
    let credential = credential_from_response(&text)?;
    info!("resolved playback access credential for {}", login);
    Ok(credential)
}

fn credential_from_response(body: &str) -> Result<AccessCredential> {
    let response: GqlResponse = serde_json::from_str(body)
        .map_err(|e| CaptureError::auth(format!("token response is not valid JSON: {e}")))?;

    let token = response
        .data
        .and_then(|data| data.stream_playback_access_token)
        .ok_or_else(|| CaptureError::auth("response carries no stream playback access token"))?;

    let value = token.value.unwrap_or_default();
    if value.trim().is_empty() {
        return Err(CaptureError::auth("stream access token is empty"));
    }

    let signature = token.signature.unwrap_or_default();
    if signature.trim().is_empty() {
        return Err(CaptureError::auth("stream signature is empty"));
    }

    Ok(AccessCredential {
        token: value,
        signature,
    })
}
