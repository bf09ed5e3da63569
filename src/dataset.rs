use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context as AnyhowContext, Result};
use log::{debug, warn};

use crate::frame::Frame;

const EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Image files of a directory, read in file name order as consecutive frames
pub struct Dataset {
    paths: Vec<PathBuf>,
    next: usize,
    first_size: Option<(usize, usize)>,
}

impl Dataset {
    pub fn new(path: &Path) -> Result<Dataset> {
        let mut paths = vec![];
        for entry in fs::read_dir(path).with_context(|| format!("cannot list {}", path.display()))? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image {
                paths.push(path);
            } else {
                debug!("skipping {}", path.display());
            }
        }
        paths.sort();
        if paths.is_empty() {
            bail!("no image files in {}", path.display());
        }
        Ok(Dataset {
            paths,
            next: 0,
            first_size: None,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Decode the next frame, or None once every file was read
    pub fn next(&mut self) -> Result<Option<(PathBuf, Frame)>> {
        let Some(path) = self.paths.get(self.next).cloned() else {
            return Ok(None);
        };
        self.next += 1;
        let bytes = fs::read(&path).with_context(|| format!("cannot read {}", path.display()))?;
        let frame = Frame::decode(&bytes).with_context(|| format!("cannot decode {}", path.display()))?;
        match self.first_size {
            None => self.first_size = Some(frame.size()),
            Some(size) if size != frame.size() => {
                warn!("{} has a different size than the first frame", path.display())
            }
            _ => {}
        }
        Ok(Some((path, frame)))
    }
}
