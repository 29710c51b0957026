//! JSON track document exchanged with command plugins
//!
//! Command plugins agree on one project shape: an object with a `tracks`
//! array. Every other top-level key (tempo map, time signatures, ...) is
//! carried along untouched.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use svbatch_core::Project;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackDocument {
    #[serde(default)]
    pub tracks: Vec<Value>,
    /// Song-level fields other than `tracks`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TrackDocument {
    pub fn new(tracks: Vec<Value>) -> Self {
        Self {
            tracks,
            extra: Map::new(),
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

impl Project for TrackDocument {
    /// Tracks are concatenated in source order; song-level fields come from
    /// the first document
    fn merge(projects: Vec<Self>) -> anyhow::Result<Self> {
        let mut projects = projects.into_iter();
        let Some(mut merged) = projects.next() else {
            bail!("nothing to merge");
        };
        for project in projects {
            merged.tracks.extend(project.tracks);
        }
        Ok(merged)
    }

    /// Chunks of at most `max_track_count` tracks, each keeping the
    /// song-level fields
    fn split(self, max_track_count: usize) -> anyhow::Result<Vec<Self>> {
        if max_track_count == 0 {
            bail!("max_track_count must be at least 1");
        }
        if self.tracks.is_empty() {
            return Ok(vec![self]);
        }

        Ok(self
            .tracks
            .chunks(max_track_count)
            .map(|chunk| TrackDocument {
                tracks: chunk.to_vec(),
                extra: self.extra.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> TrackDocument {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_extra_fields_round_trip() {
        let original = json!({ "tracks": [{ "name": "lead" }], "tempo": 120 });
        let parsed = doc(original.clone());
        assert_eq!(parsed.track_count(), 1);
        assert_eq!(parsed.extra["tempo"], 120);
        assert_eq!(serde_json::to_value(&parsed).unwrap(), original);
    }

    #[test]
    fn test_merge_keeps_first_song_fields() {
        let merged = TrackDocument::merge(vec![
            doc(json!({ "tracks": ["a"], "tempo": 120 })),
            doc(json!({ "tracks": ["b", "c"], "tempo": 90 })),
        ])
        .unwrap();

        assert_eq!(merged.tracks, vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(merged.extra["tempo"], 120);
        assert!(TrackDocument::merge(Vec::new()).is_err());
    }

    #[test]
    fn test_split_chunks_tracks() {
        let parts = doc(json!({ "tracks": [1, 2, 3, 4, 5], "tempo": 120 }))
            .split(2)
            .unwrap();

        let sizes: Vec<_> = parts.iter().map(|p| p.track_count()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(parts.iter().all(|p| p.extra["tempo"] == 120));
    }

    #[test]
    fn test_split_edge_cases() {
        assert!(TrackDocument::new(vec![json!(1)]).split(0).is_err());
        assert_eq!(TrackDocument::default().split(3).unwrap().len(), 1);
    }
}
