//! Nearest-onset matching within one (piece, voice) bucket

use motif_common::Tolerance;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteOnset {
    pub note_id: i64,
    pub onset: f64,
}

/// An occurrence row still waiting for a note reference
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingRow {
    pub row_id: i64,
    pub onset: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowMatch {
    pub row: PendingRow,
    pub note_id: Option<i64>,
}

/// Match every row to the note with the closest onset within `tolerance`.
///
/// Ties on distance go to the lower note id. Both slices are sorted in place
/// (notes by onset then id, rows by onset then id) and walked with two
/// pointers, so the cost is dominated by the sorts.
pub fn match_bucket(
    notes: &mut [NoteOnset],
    rows: &mut [PendingRow],
    tolerance: Tolerance,
) -> Vec<RowMatch> {
    notes.sort_by(|a, b| {
        a.onset
            .total_cmp(&b.onset)
            .then_with(|| a.note_id.cmp(&b.note_id))
    });
    rows.sort_by(|a, b| a.onset.total_cmp(&b.onset).then_with(|| a.row_id.cmp(&b.row_id)));

    let eps = tolerance.epsilon();
    let mut lo = 0;
    let mut out = Vec::with_capacity(rows.len());

    for row in rows.iter() {
        let x = row.onset;
        // Notes left of the window can never match this or any later row
        while lo < notes.len() && x - notes[lo].onset > eps {
            lo += 1;
        }

        let mut best: Option<(f64, i64)> = None;
        let mut k = lo;
        while k < notes.len() && notes[k].onset - x <= eps {
            let distance = (notes[k].onset - x).abs();
            let candidate = (distance, notes[k].note_id);
            best = match best {
                None => Some(candidate),
                Some(current) => match distance.total_cmp(&current.0) {
                    Ordering::Less => Some(candidate),
                    Ordering::Equal if candidate.1 < current.1 => Some(candidate),
                    _ => Some(current),
                },
            };
            k += 1;
        }

        out.push(RowMatch {
            row: *row,
            note_id: best.map(|(_, id)| id),
        });
    }
    out
}
