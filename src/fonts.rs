//! Font discovery and metrics.
//!
//! The [`FontManager`] owns a `fontdb` database (system fonts plus an optional
//! font directory) and is built once per process. A batch resolves its font
//! family once into a [`ResolvedFont`], which owns the face bytes so that
//! rendering never touches the shared database.

use std::path::Path;

use fontdb::{Database, Family, Query};

/// A font face selected for a batch.
#[derive(Clone)]
pub struct ResolvedFont {
    /// Family name as reported by the face itself.
    pub family: String,
    /// Raw font bytes (kept alive for the zero-copy parsers).
    bytes: Vec<u8>,
    /// Face index inside a collection file.
    index: u32,
}

impl std::fmt::Debug for ResolvedFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedFont")
            .field("family", &self.family)
            .field("index", &self.index)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl ResolvedFont {
    /// Parse the face for shaping and outlining.
    pub fn face(&self) -> Option<rustybuzz::Face<'_>> {
        rustybuzz::Face::from_slice(&self.bytes, self.index)
    }

    /// Distance from the top of the em box to the baseline, in px.
    pub fn ascender_px(&self, font_size: f32) -> f32 {
        match ttf_parser::Face::parse(&self.bytes, self.index) {
            Ok(face) => face.ascender() as f32 * font_size / face.units_per_em() as f32,
            // Helvetica-like fallback
            Err(_) => font_size * 0.75,
        }
    }
}

/// Loaded font faces, shared read-only by every batch.
pub struct FontManager {
    db: Database,
}

impl FontManager {
    /// An empty manager; add faces with the `load_*` methods.
    pub fn new() -> Self {
        Self {
            db: Database::new(),
        }
    }

    /// A manager populated with the host's installed fonts.
    pub fn system() -> Self {
        let mut mgr = Self::new();
        mgr.db.load_system_fonts();
        log::debug!("loaded {} system font faces", mgr.db.len());
        mgr
    }

    /// Scan a directory (recursively) for TTF/OTF/TTC files.
    pub fn load_fonts_dir(&mut self, dir: &Path) {
        let before = self.db.len();
        self.db.load_fonts_dir(dir);
        log::debug!(
            "loaded {} font faces from {}",
            self.db.len() - before,
            dir.display()
        );
    }

    /// Load a TTF/OTF font from bytes.
    pub fn load_font(&mut self, bytes: Vec<u8>) -> Result<(), String> {
        ttf_parser::Face::parse(&bytes, 0).map_err(|e| format!("Failed to parse font: {e}"))?;
        self.db.load_font_data(bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// All family names known to the manager, deduplicated and sorted.
    pub fn families(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .db
            .faces()
            .filter_map(|f| f.families.first().map(|(name, _)| name.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Pick a regular-weight face for `family`.
    ///
    /// Falls back to the generic sans-serif family and then to whatever face
    /// was loaded first, so a batch always gets text as long as any font is
    /// installed. Returns `None` only when the manager is empty.
    pub fn resolve(&self, family: &str) -> Option<ResolvedFont> {
        let family = family.trim().trim_matches(|c| c == '"' || c == '\'');
        let families = [Family::Name(family), Family::SansSerif];
        let query = Query {
            families: &families,
            ..Query::default()
        };

        let id = self
            .db
            .query(&query)
            .or_else(|| self.db.faces().next().map(|f| f.id))?;

        let info = self.db.face(id)?;
        let resolved_family = info
            .families
            .first()
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| info.post_script_name.clone());

        if !resolved_family.eq_ignore_ascii_case(family) {
            log::debug!("font family {family:?} not installed, using {resolved_family:?}");
        }

        self.db
            .with_face_data(id, |data, index| ResolvedFont {
                family: resolved_family,
                bytes: data.to_vec(),
                index,
            })
    }
}

impl Default for FontManager {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_manager_resolves_nothing() {
        let mgr = FontManager::new();
        assert!(mgr.is_empty());
        assert!(mgr.resolve("Arial").is_none());
        assert!(mgr.families().is_empty());
    }

    #[test]
    fn rejects_non_font_bytes() {
        let mut mgr = FontManager::new();
        assert!(mgr.load_font(b"definitely not a font".to_vec()).is_err());
        assert!(mgr.is_empty());
    }

    #[test]
    fn unknown_family_falls_back_when_fonts_exist() {
        let mgr = FontManager::system();
        if mgr.is_empty() {
            return;
        }
        let font = mgr
            .resolve("No Such Family 7f3a")
            .expect("fallback face when fonts are installed");
        assert!(font.face().is_some());
        assert!(font.ascender_px(24.0) > 0.0);
    }
}
