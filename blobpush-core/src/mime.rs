//! Content-type resolution for uploaded files.
//!
//! Order: the `mimes` map from the settings file, then a guess from the file
//! extension, then nothing (the blob is stored without an explicit type).

use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct ContentTypeResolver {
    overrides: HashMap<String, String>,
}

impl ContentTypeResolver {
    pub fn new(overrides: HashMap<String, String>) -> Self {
        Self { overrides }
    }

    pub fn resolve(&self, path: &Path) -> Option<String> {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            let dotted = format!(".{ext}");
            if let Some(mime) = self
                .overrides
                .get(&dotted)
                .or_else(|| self.overrides.get(ext))
            {
                return Some(mime.clone());
            }
        }
        mime_guess::from_path(path).first_raw().map(str::to_owned)
    }
}
