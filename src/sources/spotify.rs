// Cliente mínimo de Spotify: sólo el endpoint oEmbed, que no necesita credenciales

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const OEMBED_ENDPOINT: &str = "https://open.spotify.com/oembed";

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    #[serde(default)]
    title: String,
}

pub struct SpotifyClient {
    client: reqwest::Client,
    endpoint: String,
}

impl SpotifyClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stream-queue/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: OEMBED_ENDPOINT.to_string(),
        })
    }

    /// URL de oEmbed para un link de Spotify
    pub fn oembed_url(&self, url: &str) -> String {
        format!("{}?url={}", self.endpoint, urlencoding::encode(url))
    }

    /// Obtiene el título ("Canción - Artista" normalmente) de un track
    pub async fn track_title(&self, url: &str) -> Result<String> {
        let oembed_url = self.oembed_url(url);
        debug!("🎧 Consultando oEmbed de Spotify: {}", oembed_url);

        let response = self
            .client
            .get(&oembed_url)
            .send()
            .await
            .context("Error al consultar Spotify")?
            .error_for_status()
            .context("Spotify rechazó la consulta oEmbed")?;

        let body = response.text().await?;
        let title = parse_title(&body)?;

        info!("🎧 Spotify: {}", title);
        Ok(title)
    }
}

fn parse_title(body: &str) -> Result<String> {
    let data: OEmbedResponse = serde_json::from_str(body).context("Respuesta oEmbed inválida")?;
    let title = data.title.trim();
    if title.is_empty() {
        anyhow::bail!("oEmbed sin título");
    }
    Ok(title.to_string())
}
