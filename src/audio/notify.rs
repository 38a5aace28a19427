use async_trait::async_trait;
use std::{fmt, sync::Arc};
use tracing::debug;

/// Mensajes de estado que la sesión envía al canal de texto
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    NowPlaying { title: String },
    QueueFinished,
    PlaybackError { reason: String },
    FailedToPlay { title: String, reason: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::NowPlaying { title } => write!(f, "Now playing: **{title}**"),
            Notice::QueueFinished => f.write_str("Queue finished."),
            Notice::PlaybackError { reason } => write!(f, "Playback error: {reason}"),
            Notice::FailedToPlay { title, reason } => write!(f, "Failed to play {title}: {reason}"),
        }
    }
}

/// Destino de los avisos (normalmente el canal donde se pidió la música)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: String) -> anyhow::Result<()>;
}

/// Envía un aviso sin propagar nunca el error de entrega.
///
/// Es el único punto por el que salen mensajes de la sesión.
pub async fn notify_best_effort(target: Option<&Arc<dyn Notifier>>, notice: Notice) {
    let Some(target) = target else {
        debug!("🔕 Sin canal de avisos: {}", notice);
        return;
    };

    if let Err(e) = target.send(notice.to_string()).await {
        debug!("📪 No se pudo entregar aviso '{}': {:?}", notice, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_render_user_text() {
        assert_eq!(
            Notice::NowPlaying { title: "Song".into() }.to_string(),
            "Now playing: **Song**"
        );
        assert_eq!(Notice::QueueFinished.to_string(), "Queue finished.");
        assert_eq!(
            Notice::FailedToPlay {
                title: "Song".into(),
                reason: "resolver failed".into()
            }
            .to_string(),
            "Failed to play Song: resolver failed"
        );
    }

    #[tokio::test]
    async fn delivery_failures_are_swallowed() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .withf(|text| text == "Queue finished.")
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("missing permissions")));

        let target: Arc<dyn Notifier> = Arc::new(notifier);
        notify_best_effort(Some(&target), Notice::QueueFinished).await;
    }

    #[tokio::test]
    async fn missing_target_is_a_no_op() {
        notify_best_effort(None, Notice::QueueFinished).await;
    }
}
