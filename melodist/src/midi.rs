//! Note-event file export.
//!
//! Writes a single-track Standard MIDI File with one note-on / note-off pair
//! per token, played back to back. Tokens whose pitch or duration cannot be
//! resolved are skipped with a warning.

use std::path::Path;

use melodist_core::note::{NoteEvent, NoteTiming};
use melodist_core::token::Melody;
use midly::{
    num::{u15, u28, u4, u7},
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
};
use tracing::{info, warn};

use crate::error::{MelodyError, Result};

/// Largest delta a track event can hold.
const MAX_DELTA: u32 = (1 << 28) - 1;

/// What an export wrote and what it left out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub notes_written: usize,
    pub skipped: usize,
}

fn note_event(delta: u32, message: MidiMessage) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta.min(MAX_DELTA)),
        kind: TrackEventKind::Midi {
            channel: u4::new(0),
            message,
        },
    }
}

/// Converts a melody to an in-memory SMF.
pub fn melody_to_smf(melody: &Melody, timing: &NoteTiming) -> (Smf<'static>, ExportSummary) {
    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(timing.ticks_per_quarter.min(0x7fff))),
    ));
    let vel = u7::new(timing.velocity.min(127));
    let mut summary = ExportSummary::default();
    let mut track: Track<'static> = Vec::new();

    for (position, token) in melody.iter().enumerate() {
        let event = match NoteEvent::from_token(token) {
            Ok(event) => event,
            Err(e) => {
                warn!(position, %token, error = %e, "skipping token");
                summary.skipped += 1;
                continue;
            }
        };
        let key = u7::new(event.number);
        track.push(note_event(0, MidiMessage::NoteOn { key, vel }));
        track.push(note_event(
            timing.ticks(event.quarter_length),
            MidiMessage::NoteOff {
                key,
                vel: u7::new(0),
            },
        ));
        summary.notes_written += 1;
    }

    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    smf.tracks.push(track);
    (smf, summary)
}

/// Converts a melody and writes it to `path`.
pub fn write_midi(
    melody: &Melody,
    timing: &NoteTiming,
    path: impl AsRef<Path>,
) -> Result<ExportSummary> {
    let path = path.as_ref();
    let (smf, summary) = melody_to_smf(melody, timing);
    let mut buf = Vec::new();
    smf.write(&mut buf)
        .map_err(|e| MelodyError::Midi(e.to_string()))?;
    std::fs::write(path, &buf)?;
    info!(
        path = %path.display(),
        notes = summary.notes_written,
        skipped = summary.skipped,
        "wrote note-event file"
    );
    Ok(summary)
}
