//! Class label to display glyph mapping.
//!
//! The table is built once at startup and handed to the pipeline and views by
//! reference. Lookups never fail: labels without an entry get the default glyph.

use std::collections::{BTreeSet, HashMap};

/// Glyph used for labels absent from the table.
pub const DEFAULT_GLYPH: &str = "🍏";

const BUILTIN_GLYPHS: &[(&str, &str)] = &[
    ("Apple", "🍎"),
    ("Banana", "🍌"),
    ("Carambola", "⭐"),
    ("Chilli", "🌶️"),
    ("Coconut", "🥥"),
    ("Dragon fruit", "🐉"),
    ("Black berry", "🫐"),
    ("Fig", "🍈"),
    ("Grapes", "🍇"),
    ("Lemon", "🍋"),
    ("Lychee", "🍒"),
    ("Papaya", "🥭"),
    ("Persimmon", "🍑"),
    ("Pomegranate", "🍎"),
    ("Raspberry", "🍓"),
    ("Tomato", "🍅"),
];

/// Read-only label → glyph table.
#[derive(Clone, Debug)]
pub struct LabelEmojiTable {
    glyphs: HashMap<String, String>,
    default_glyph: String,
}

impl LabelEmojiTable {
    /// Table containing only the built-in fruit glyphs.
    pub fn builtin() -> Self {
        Self {
            glyphs: BUILTIN_GLYPHS
                .iter()
                .map(|(label, glyph)| (label.to_string(), glyph.to_string()))
                .collect(),
            default_glyph: DEFAULT_GLYPH.to_string(),
        }
    }

    /// Built-in table with configured entries layered on top.
    pub fn with_overrides<I, K, V>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut table = Self::builtin();
        for (label, glyph) in overrides {
            table.glyphs.insert(label.into(), glyph.into());
        }
        table
    }

    /// Replace the fallback glyph.
    pub fn with_default_glyph(mut self, glyph: impl Into<String>) -> Self {
        self.default_glyph = glyph.into();
        self
    }

    pub fn glyph(&self, label: &str) -> &str {
        self.glyphs
            .get(label)
            .map(String::as_str)
            .unwrap_or(&self.default_glyph)
    }

    pub fn default_glyph(&self) -> &str {
        &self.default_glyph
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    /// Format every label as `"<glyph> <label>"`.
    ///
    /// The input is a set, so entries are unique; output is sorted by label so
    /// repeated calls agree regardless of how the set was built.
    pub fn map_all(&self, labels: &BTreeSet<String>) -> Vec<String> {
        labels
            .iter()
            .map(|label| format!("{} {}", self.glyph(label), label))
            .collect()
    }
}

impl Default for LabelEmojiTable {
    fn default() -> Self {
        Self::builtin()
    }
}
