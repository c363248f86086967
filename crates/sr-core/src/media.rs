use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// An in-memory media payload plus its container extension.
#[derive(Debug, Clone, PartialEq)]
pub struct Media {
    pub bytes: Bytes,
    pub extension: String,
}

impl Media {
    pub fn new(bytes: impl Into<Bytes>, extension: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            extension: extension.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAudio {
    pub media: Media,
    pub duration_secs: f64,
}

/// Location of a finished story video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}
