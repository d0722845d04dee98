use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::geometry::SquareId;

/// What the manifest document says about one square.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default)]
    pub has_preview: bool,
}

impl ManifestEntry {
    pub fn has_layer(&self, name: &str) -> bool {
        self.layers.iter().any(|l| l == name)
    }
}

/// Raw manifest document as served: square id -> entry.
pub type ManifestDocument = HashMap<String, ManifestEntry>;

/// Parsed, read-only tile catalog keyed by validated square ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    squares: BTreeMap<SquareId, ManifestEntry>,
    skipped: Vec<String>,
}

impl Catalog {
    /// Build from a raw document. `on_progress(parsed, total)` is called after each entry.
    /// Keys that are not grid squares are skipped and remembered.
    pub fn from_document(doc: ManifestDocument, mut on_progress: impl FnMut(usize, usize)) -> Self {
        let total = doc.len();
        let mut squares = BTreeMap::new();
        let mut skipped = Vec::new();

        for (parsed, (raw_id, entry)) in doc.into_iter().enumerate() {
            match SquareId::parse(&raw_id) {
                Some(id) => {
                    squares.insert(id, entry);
                }
                None => skipped.push(raw_id),
            }
            on_progress(parsed + 1, total);
        }
        skipped.sort();

        Self { squares, skipped }
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let doc: ManifestDocument = serde_json::from_slice(bytes)?;
        Ok(Self::from_document(doc, |_, _| {}))
    }

    pub fn len(&self) -> usize {
        self.squares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.squares.is_empty()
    }

    /// Keys from the document that were not valid square ids.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn get(&self, id: SquareId) -> Option<&ManifestEntry> {
        self.squares.get(&id)
    }

    pub fn get_str(&self, raw: &str) -> Option<&ManifestEntry> {
        SquareId::parse(raw).and_then(|id| self.get(id))
    }

    pub fn layers_for(&self, id: SquareId) -> &[String] {
        self.get(id).map(|e| e.layers.as_slice()).unwrap_or(&[])
    }

    pub fn has_preview(&self, id: SquareId) -> bool {
        self.get(id).is_some_and(|e| e.has_preview)
    }

    pub fn square_ids(&self) -> impl Iterator<Item = SquareId> + '_ {
        self.squares.keys().copied()
    }
}
