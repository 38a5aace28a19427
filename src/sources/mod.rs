pub mod spotify;

use anyhow::Result;
use regex::Regex;
use std::{process::Stdio, sync::LazyLock, time::Duration};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub use spotify::SpotifyClient;

use crate::{audio::TrackDescriptor, config::Config, error::LookupError};

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:(?:www\.|m\.)?youtube\.com/(?:watch\?v=|shorts/)|youtu\.be/)[\w-]+")
        .expect("regex de YouTube válida")
});

pub fn is_youtube_url(query: &str) -> bool {
    YOUTUBE_URL.is_match(query.trim())
}

pub fn is_spotify_url(query: &str) -> bool {
    query.contains("spotify.com") || query.contains("spotify:")
}

/// Qué tipo de entrada escribió el usuario
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    YouTube(String),
    Spotify(String),
    /// Otro enlace http(s); yt-dlp decide si lo soporta
    Url(String),
    Search(String),
}

impl QueryKind {
    pub fn classify(query: &str) -> Self {
        let query = query.trim();
        if is_spotify_url(query) {
            QueryKind::Spotify(query.to_string())
        } else if is_youtube_url(query) {
            QueryKind::YouTube(query.to_string())
        } else if url::Url::parse(query).is_ok_and(|u| matches!(u.scheme(), "http" | "https")) {
            QueryKind::Url(query.to_string())
        } else {
            QueryKind::Search(query.to_string())
        }
    }
}

/// Consulta de búsqueda de yt-dlp para un texto libre
pub fn search_query(text: &str) -> String {
    format!("ytsearch:{}", text.trim())
}

/// Interpreta la salida de `--get-title --get-id`: título y luego id.
///
/// Sin id se usa la consulta original como locator.
pub fn parse_lookup_output(stdout: &str, query: &str) -> Option<TrackDescriptor> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let title = lines.next()?;
    let locator = match lines.next() {
        Some(id) => format!("https://www.youtube.com/watch?v={id}"),
        None => query.to_string(),
    };
    Some(TrackDescriptor::new(title, locator))
}

/// Convierte texto o enlaces en pistas usando yt-dlp (y oEmbed para Spotify)
pub struct TrackLookup {
    resolver_bin: String,
    timeout: Duration,
    spotify: SpotifyClient,
}

impl TrackLookup {
    pub fn new(resolver_bin: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            resolver_bin: resolver_bin.into(),
            timeout,
            spotify: SpotifyClient::new(timeout)?,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.resolver_bin.clone(), config.lookup_timeout)
    }

    pub async fn lookup(&self, query: &str) -> Result<TrackDescriptor, LookupError> {
        let resolver_query = match QueryKind::classify(query) {
            QueryKind::Spotify(url) => {
                info!("🎧 URL de Spotify detectada: {}", url);
                let title = self.spotify.track_title(&url).await.map_err(|e| {
                    warn!("❌ oEmbed de Spotify falló: {:?}", e);
                    LookupError::Spotify(e)
                })?;
                search_query(&title)
            }
            QueryKind::YouTube(url) | QueryKind::Url(url) => url,
            QueryKind::Search(text) => {
                debug!("🔍 Término de búsqueda: {}", text);
                search_query(&text)
            }
        };

        let track = self.resolve(&resolver_query).await.ok_or(LookupError::NotFound)?;
        info!("✅ Encontrado: {}", track.title());
        Ok(track)
    }

    async fn resolve(&self, query: &str) -> Option<TrackDescriptor> {
        let child = Command::new(&self.resolver_bin)
            .args(["--get-title", "--get-id", "--no-playlist", "--no-warnings", "-q", query])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!("❌ No se pudo ejecutar {}: {}", self.resolver_bin, e);
                return None;
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("❌ Error esperando a {}: {}", self.resolver_bin, e);
                return None;
            }
            Err(_) => {
                warn!("⏱️ Búsqueda excedió {:?}: {}", self.timeout, query);
                return None;
            }
        };

        if !output.status.success() {
            debug!(
                "{} terminó con {}: {}",
                self.resolver_bin,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }

        parse_lookup_output(&String::from_utf8_lossy(&output.stdout), query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn youtube_urls_are_recognised() {
        assert!(is_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://m.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://youtube.com/shorts/abc_DEF-1"));
        assert!(is_youtube_url("  https://youtu.be/dQw4w9WgXcQ "));
        assert!(!is_youtube_url("https://www.youtube.com/channel/UC123"));
        assert!(!is_youtube_url("never gonna give you up"));
    }

    #[test]
    fn queries_are_classified() {
        assert_eq!(
            QueryKind::classify("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"),
            QueryKind::Spotify("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC".into())
        );
        assert_eq!(
            QueryKind::classify("spotify:track:4uLU6hMCjMI75M1A2tKUQC"),
            QueryKind::Spotify("spotify:track:4uLU6hMCjMI75M1A2tKUQC".into())
        );
        assert_eq!(
            QueryKind::classify("https://soundcloud.com/artist/song"),
            QueryKind::Url("https://soundcloud.com/artist/song".into())
        );
        assert_eq!(
            QueryKind::classify(" lofi hip hop "),
            QueryKind::Search("lofi hip hop".into())
        );
    }

    #[test]
    fn search_query_uses_ytsearch_prefix() {
        assert_eq!(search_query("  daft punk  "), "ytsearch:daft punk");
    }

    #[test]
    fn lookup_output_yields_watch_url() {
        let track = parse_lookup_output("Rick Astley - Never Gonna Give You Up\ndQw4w9WgXcQ\n", "q").unwrap();
        assert_eq!(track.title(), "Rick Astley - Never Gonna Give You Up");
        assert_eq!(track.locator(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn lookup_output_without_id_keeps_query() {
        let track = parse_lookup_output("Some Title\n", "https://example.com/a.mp3").unwrap();
        assert_eq!(track.locator(), "https://example.com/a.mp3");
        assert!(parse_lookup_output("\n\n", "q").is_none());
    }

    #[tokio::test]
    async fn missing_resolver_means_not_found() {
        let lookup = TrackLookup::new("/nonexistent/yt-dlp", Duration::from_secs(1)).unwrap();
        let err = lookup.lookup("anything").await.unwrap_err();
        assert!(matches!(err, LookupError::NotFound));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_resolver_means_not_found() {
        let lookup = TrackLookup::new("false", Duration::from_secs(5)).unwrap();
        assert!(matches!(lookup.lookup("anything").await, Err(LookupError::NotFound)));
    }
}
