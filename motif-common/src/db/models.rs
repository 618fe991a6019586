//! Database models

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Piece {
    pub piece_id: i64,
    pub composer: String,
    pub title: Option<String>,
    pub filename: String,
}

/// Canonical note, written once by the extraction service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Note {
    pub note_id: i64,
    pub piece_id: i64,
    pub voice: i64,
    pub voice_name: Option<String>,
    pub onset: f64,
    pub duration: Option<f64>,
    pub pitch_name: Option<String>,
    pub octave: Option<i64>,
    pub midi: Option<i64>,
}

/// One n-gram (or entry) observed at a piece/voice/onset under one Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PatternOccurrence {
    pub occurrence_id: i64,
    pub piece_id: i64,
    pub config_id: i64,
    pub voice: i64,
    pub voice_name: Option<String>,
    pub onset: f64,
    pub pattern: String,
    pub pattern_length: i64,
    pub is_thematic: Option<bool>,
    pub from_rest: Option<bool>,
    pub note_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IntervalOccurrence {
    pub interval_id: i64,
    pub piece_id: i64,
    pub config_id: i64,
    pub voice: i64,
    pub voice_name: Option<String>,
    pub onset: f64,
    pub interval: String,
    pub note_id: Option<i64>,
}
