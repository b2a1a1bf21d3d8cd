use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::error::Result;

pub type ProviderSocket = MaybeTlsStream<TcpStream>;

pub const DEFAULT_ENDPOINT: &str = "wss://api.openai.com/v1/realtime";

/// Establish a WebSocket connection to a Realtime endpoint for `model`.
///
/// # Errors
/// Returns an error if the endpoint is not a valid URL or the handshake fails.
pub async fn connect(endpoint: &str, api_key: &str, model: &str) -> Result<WebSocketStream<ProviderSocket>> {
    let mut url = Url::parse(endpoint)?;
    url.query_pairs_mut().append_pair("model", model);

    let auth_header = HeaderValue::from_str(&format!("Bearer {api_key}"))?;

    let mut req = url.as_str().into_client_request()?;
    req.headers_mut().insert(AUTHORIZATION, auth_header);
    let (ws_stream, _) = connect_async(req).await?;

    tracing::info!(%model, host = url.host_str().unwrap_or_default(), "Connected to realtime provider");

    Ok(ws_stream)
}
