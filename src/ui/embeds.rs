use serenity::{
    all::Colour,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::audio::QueueSnapshot;

/// Paleta de colores del bot
pub mod colors {
    use serenity::all::Colour;

    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 stream-queue";

/// Texto del listado de cola: actual, hasta `limit` pendientes y el resto resumido.
///
/// `None` cuando no hay nada que mostrar.
pub fn render_queue(snapshot: &QueueSnapshot, limit: usize) -> Option<String> {
    let mut sections = Vec::new();

    if let Some(current) = &snapshot.current {
        sections.push(format!("**Now playing:** {}", current.title()));
    }

    if !snapshot.pending.is_empty() {
        let list = snapshot
            .pending
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, track)| format!("{}. {}", i + 1, track.title()))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("**Up next:**\n{list}"));

        if snapshot.pending.len() > limit {
            sections.push(format!("...and {} more", snapshot.pending.len() - limit));
        }
    }

    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

/// Embed con el listado de la cola
pub fn create_queue_embed(snapshot: &QueueSnapshot, limit: usize) -> Option<CreateEmbed> {
    let description = render_queue(snapshot, limit)?;
    Some(embed("📜 Queue", description, colors::MUSIC_PURPLE))
}

fn embed(title: &str, description: String, colour: Colour) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .description(description)
        .color(colour)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::TrackDescriptor;
    use pretty_assertions::assert_eq;

    fn snapshot(current: Option<&str>, pending: usize) -> QueueSnapshot {
        QueueSnapshot {
            current: current.map(|t| TrackDescriptor::new(t, "u")),
            pending: (1..=pending)
                .map(|i| TrackDescriptor::new(format!("Track {i}"), format!("u{i}")))
                .collect(),
        }
    }

    #[test]
    fn empty_queue_renders_nothing() {
        assert_eq!(render_queue(&QueueSnapshot::default(), 10), None);
    }

    #[test]
    fn current_and_pending_are_listed() {
        let text = render_queue(&snapshot(Some("Intro"), 2), 10).unwrap();
        assert_eq!(
            text,
            "**Now playing:** Intro\n\n**Up next:**\n1. Track 1\n2. Track 2"
        );
    }

    #[test]
    fn long_queues_are_truncated() {
        let text = render_queue(&snapshot(None, 13), 10).unwrap();
        assert!(text.starts_with("**Up next:**\n1. Track 1\n"));
        assert!(text.contains("10. Track 10"));
        assert!(!text.contains("Track 11"));
        assert!(text.ends_with("\n\n...and 3 more"));
    }
}
